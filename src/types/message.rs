use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// === Conversation primitives ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            AuthorRole::System => "system",
            AuthorRole::User => "user",
            AuthorRole::Assistant => "assistant",
            AuthorRole::Tool => "tool",
        };
        f.write_str(role)
    }
}

/// One ordered part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
}

// === Chat message ===

/// A single conversation message.
///
/// Messages are values: once published they are only ever cloned, never
/// mutated in place by another actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageContent {
    pub role: AuthorRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatMessageContent {
    pub fn new(role: AuthorRole, content: impl Into<String>) -> Self {
        Self {
            role,
            name: None,
            content: content.into(),
            items: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::System, content)
    }

    pub fn assistant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(AuthorRole::Assistant, content).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_item(mut self, item: ContentItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Plain text of the message: the `content` field, or the text items
    /// joined by newlines when `content` is empty.
    pub fn to_text(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        self.items
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// === Chat history ===

/// Append-only ordered sequence of messages.
///
/// `Clone` is a deep copy; that is how snapshots are handed to code that must
/// not touch the owner's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    messages: Vec<ChatMessageContent>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessageContent>) -> Self {
        Self { messages }
    }

    pub fn add_message(&mut self, message: ChatMessageContent) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessageContent] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessageContent> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Moves every message out, leaving the history empty.
    pub fn take(&mut self) -> Vec<ChatMessageContent> {
        std::mem::take(&mut self.messages)
    }

    pub fn into_messages(self) -> Vec<ChatMessageContent> {
        self.messages
    }
}

impl IntoIterator for ChatHistory {
    type Item = ChatMessageContent;
    type IntoIter = std::vec::IntoIter<ChatMessageContent>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
