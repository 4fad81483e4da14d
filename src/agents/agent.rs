use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use crate::types::message::{ChatHistory, ChatMessageContent};

/// An agent's private view of the conversation.
#[async_trait]
pub trait AgentThread: Send + Sync {
    fn id(&self) -> &str;

    async fn on_new_message(&mut self, message: ChatMessageContent) -> anyhow::Result<()>;

    async fn get_messages(&self) -> anyhow::Result<Vec<ChatMessageContent>>;

    async fn delete(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Thread backed by an in-memory chat history.
#[derive(Debug, Clone)]
pub struct ChatHistoryAgentThread {
    id: String,
    history: ChatHistory,
}

impl ChatHistoryAgentThread {
    pub fn new() -> Self {
        Self::with_history(ChatHistory::new())
    }

    pub fn with_history(history: ChatHistory) -> Self {
        Self {
            id: format!("thread_{}", Uuid::new_v4().simple()),
            history,
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }
}

impl Default for ChatHistoryAgentThread {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentThread for ChatHistoryAgentThread {
    fn id(&self) -> &str {
        &self.id
    }

    async fn on_new_message(&mut self, message: ChatMessageContent) -> anyhow::Result<()> {
        self.history.add_message(message);
        Ok(())
    }

    async fn get_messages(&self) -> anyhow::Result<Vec<ChatMessageContent>> {
        Ok(self.history.messages().to_vec())
    }

    async fn delete(&mut self) -> anyhow::Result<()> {
        self.history.clear();
        Ok(())
    }
}

/// A complete response together with the thread that now holds the conversation.
pub struct AgentResponseItem {
    pub message: ChatMessageContent,
    pub thread: Box<dyn AgentThread>,
}

/// One chunk of a streamed response. Only the final chunk carries the thread.
pub struct StreamingAgentResponseItem {
    pub message: ChatMessageContent,
    pub thread: Option<Box<dyn AgentThread>>,
}

/// The capability a group chat participant must provide.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str>;

    /// Produces a response to `messages`, which are new since the last call.
    /// Earlier context lives in `thread`; with no thread the agent starts one.
    async fn invoke(
        &self,
        messages: Vec<ChatMessageContent>,
        thread: Option<Box<dyn AgentThread>>,
    ) -> anyhow::Result<AgentResponseItem>;

    fn invoke_stream<'a>(
        &'a self,
        messages: Vec<ChatMessageContent>,
        thread: Option<Box<dyn AgentThread>>,
    ) -> BoxStream<'a, anyhow::Result<StreamingAgentResponseItem>> {
        stream::once(self.invoke(messages, thread))
            .map(|result| {
                result.map(|item| StreamingAgentResponseItem {
                    message: item.message,
                    thread: Some(item.thread),
                })
            })
            .boxed()
    }
}
