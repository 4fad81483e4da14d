use serde::{Deserialize, Serialize};

use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::message::ChatMessageContent;

// === Event trait, used to label messages in logs ===

pub trait Event: Send + Sync {
    fn event_type(&self) -> &'static str;
}

// === Group chat events ===

/// Body of a start message: one message or an ordered list of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartBody {
    Single(ChatMessageContent),
    Many(Vec<ChatMessageContent>),
}

impl StartBody {
    pub fn into_messages(self) -> Vec<ChatMessageContent> {
        match self {
            StartBody::Single(message) => vec![message],
            StartBody::Many(messages) => messages,
        }
    }
}

impl From<ChatMessageContent> for StartBody {
    fn from(message: ChatMessageContent) -> Self {
        StartBody::Single(message)
    }
}

impl From<Vec<ChatMessageContent>> for StartBody {
    fn from(messages: Vec<ChatMessageContent>) -> Self {
        StartBody::Many(messages)
    }
}

impl From<&str> for StartBody {
    fn from(task: &str) -> Self {
        StartBody::Single(ChatMessageContent::user(task))
    }
}

impl From<String> for StartBody {
    fn from(task: String) -> Self {
        StartBody::Single(ChatMessageContent::user(task))
    }
}

/// Seeds the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChatStartMessage {
    pub body: StartBody,
}

impl GroupChatStartMessage {
    pub fn new(body: impl Into<StartBody>) -> Self {
        Self { body: body.into() }
    }

    /// Decodes a start message whose body arrived as untyped JSON.
    pub fn from_json(value: serde_json::Value) -> GroupChatResult<Self> {
        serde_json::from_value(value).map_err(|e| {
            GroupChatError::Protocol(format!(
                "start message body must be a message or a list of messages: {e}"
            ))
        })
    }
}

impl Event for GroupChatStartMessage {
    fn event_type(&self) -> &'static str {
        "GroupChatStartMessage"
    }
}

/// "It is this agent's turn."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChatRequestMessage {
    pub agent_name: String,
}

impl GroupChatRequestMessage {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }
}

impl Event for GroupChatRequestMessage {
    fn event_type(&self) -> &'static str {
        "GroupChatRequestMessage"
    }
}

/// A reply broadcast to every subscriber of the internal topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChatResponseMessage {
    pub body: ChatMessageContent,
}

impl GroupChatResponseMessage {
    pub fn new(body: ChatMessageContent) -> Self {
        Self { body }
    }
}

impl Event for GroupChatResponseMessage {
    fn event_type(&self) -> &'static str {
        "GroupChatResponseMessage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::AuthorRole;
    use serde_json::json;

    #[test]
    fn string_task_becomes_user_message() {
        let start = GroupChatStartMessage::new("write a slogan");
        let messages = start.body.into_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, AuthorRole::User);
        assert_eq!(messages[0].content, "write a slogan");
    }

    #[test]
    fn from_json_accepts_single_and_list() {
        let single = GroupChatStartMessage::from_json(json!({
            "body": {"role": "user", "content": "T"}
        }))
        .expect("single body");
        assert!(matches!(single.body, StartBody::Single(_)));

        let many = GroupChatStartMessage::from_json(json!({
            "body": [{"role": "system", "content": "S"}, {"role": "user", "content": "T"}]
        }))
        .expect("list body");
        assert_eq!(many.body.into_messages().len(), 2);
    }

    #[test]
    fn from_json_rejects_other_shapes() {
        let err = GroupChatStartMessage::from_json(json!({"body": 42})).unwrap_err();
        assert!(matches!(err, GroupChatError::Protocol(_)));

        let err = GroupChatStartMessage::from_json(json!({
            "body": [{"role": "user", "content": "T"}, "not a message"]
        }))
        .unwrap_err();
        assert!(matches!(err, GroupChatError::Protocol(_)));
    }
}
