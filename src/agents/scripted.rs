//! A deterministic participant that answers from a fixed script.
//!
//! Useful for demos and for exercising orchestration logic without a model
//! provider: every invocation is recorded in a shared [`InvocationLog`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::agents::agent::{
    Agent, AgentResponseItem, AgentThread, ChatHistoryAgentThread, StreamingAgentResponseItem,
};
use crate::types::message::ChatMessageContent;

#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent: String,
    /// The full conversation the agent saw, its own reply excluded.
    pub seen: Vec<ChatMessageContent>,
}

pub type InvocationLog = Arc<Mutex<Vec<Invocation>>>;

pub struct ScriptedAgent {
    name: String,
    description: Option<String>,
    replies: Vec<String>,
    turn: AtomicUsize,
    log: InvocationLog,
    fail_on_turn: Option<usize>,
    latency: Option<Duration>,
    streaming: bool,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            replies: Vec::new(),
            turn: AtomicUsize::new(0),
            log: InvocationLog::default(),
            fail_on_turn: None,
            latency: None,
            streaming: false,
        }
    }

    pub fn without_description(name: impl Into<String>) -> Self {
        Self {
            description: None,
            ..Self::new(name, "")
        }
    }

    /// Replies are used in order and wrap around.
    pub fn with_replies<I, S>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies = replies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log(mut self, log: InvocationLog) -> Self {
        self.log = log;
        self
    }

    /// Fails the `turn`-th invocation (zero based).
    pub fn failing_on_turn(mut self, turn: usize) -> Self {
        self.fail_on_turn = Some(turn);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stream replies word by word instead of as a single chunk.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn log(&self) -> InvocationLog {
        self.log.clone()
    }

    fn reply_for(&self, turn: usize) -> String {
        if self.replies.is_empty() {
            format!("{} turn {}", self.name, turn + 1)
        } else {
            self.replies[turn % self.replies.len()].clone()
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn invoke(
        &self,
        messages: Vec<ChatMessageContent>,
        thread: Option<Box<dyn AgentThread>>,
    ) -> anyhow::Result<AgentResponseItem> {
        let turn = self.turn.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on_turn == Some(turn) {
            return Err(anyhow!("scripted failure on turn {}", turn + 1));
        }

        let mut thread = thread.unwrap_or_else(|| Box::new(ChatHistoryAgentThread::new()));
        for message in messages {
            thread.on_new_message(message).await?;
        }
        let seen = thread.get_messages().await?;
        self.log
            .lock()
            .map_err(|_| anyhow!("invocation log poisoned"))?
            .push(Invocation {
                agent: self.name.clone(),
                seen,
            });

        let reply = ChatMessageContent::assistant(self.name.clone(), self.reply_for(turn));
        thread
            .on_new_message(reply.clone())
            .await
            .context("failed to record reply in thread")?;

        Ok(AgentResponseItem {
            message: reply,
            thread,
        })
    }

    fn invoke_stream<'a>(
        &'a self,
        messages: Vec<ChatMessageContent>,
        thread: Option<Box<dyn AgentThread>>,
    ) -> BoxStream<'a, anyhow::Result<StreamingAgentResponseItem>> {
        let streaming = self.streaming;
        stream::once(self.invoke(messages, thread))
            .flat_map(move |result| {
                let chunks = match result {
                    Ok(item) if streaming => split_into_chunks(item),
                    Ok(item) => vec![Ok(StreamingAgentResponseItem {
                        message: item.message,
                        thread: Some(item.thread),
                    })],
                    Err(err) => vec![Err(err)],
                };
                stream::iter(chunks)
            })
            .boxed()
    }
}

fn split_into_chunks(item: AgentResponseItem) -> Vec<anyhow::Result<StreamingAgentResponseItem>> {
    let AgentResponseItem { message, thread } = item;
    let words: Vec<String> = message.content.split_inclusive(' ').map(str::to_string).collect();
    let mut thread = Some(thread);
    let last = words.len().saturating_sub(1);

    if words.is_empty() {
        return vec![Ok(StreamingAgentResponseItem { message, thread })];
    }

    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            let mut chunk = message.clone();
            chunk.content = word;
            Ok(StreamingAgentResponseItem {
                message: chunk,
                thread: if i == last { thread.take() } else { None },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_cycle_and_thread_accumulates() {
        let agent = ScriptedAgent::new("Writer", "writes").with_replies(["a", "b"]);

        let first = agent
            .invoke(vec![ChatMessageContent::user("task")], None)
            .await
            .unwrap();
        assert_eq!(first.message.content, "a");
        assert_eq!(first.message.name.as_deref(), Some("Writer"));

        let second = agent.invoke(Vec::new(), Some(first.thread)).await.unwrap();
        let third = agent.invoke(Vec::new(), Some(second.thread)).await.unwrap();
        assert_eq!(third.message.content, "a");

        let history = third.thread.get_messages().await.unwrap();
        assert_eq!(history.len(), 4);

        let log = agent.log();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].seen.len(), 3);
    }

    #[tokio::test]
    async fn streaming_splits_words_and_hands_back_thread_last() {
        let agent = ScriptedAgent::new("Writer", "writes")
            .with_replies(["fast fresh food"])
            .streaming(true);

        let chunks: Vec<_> = agent
            .invoke_stream(vec![ChatMessageContent::user("task")], None)
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);

        let mut text = String::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let chunk = chunk.unwrap();
            assert_eq!(chunk.thread.is_some(), i == 2);
            text.push_str(&chunk.message.content);
        }
        assert_eq!(text, "fast fresh food");
    }

    #[tokio::test]
    async fn failing_turn_returns_error() {
        let agent = ScriptedAgent::new("Writer", "writes").failing_on_turn(0);
        let err = agent.invoke(Vec::new(), None).await.err().unwrap();
        assert!(err.to_string().contains("scripted failure"));
    }
}
