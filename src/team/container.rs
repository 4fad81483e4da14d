//! The actor that hosts one group chat participant.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::agents::agent::{Agent, AgentResponseItem, AgentThread};
use crate::orchestrator::orchestration::{
    AgentResponseCallback, ExceptionCallback, StreamingAgentResponseCallback,
};
use crate::team::context::MessageContext;
use crate::team::routed::{downcast, on_unhandled_message, ActorBinding};
use crate::team::runtime::{Actor, Payload};
use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::event::{
    Event, GroupChatRequestMessage, GroupChatResponseMessage, GroupChatStartMessage,
};
use crate::types::message::{ChatHistory, ChatMessageContent};

/// Buffers what the participant hears and invokes it when the manager names it.
///
/// Messages accumulate in a local buffer until the agent hands back a thread;
/// from then on they go straight to the thread.
pub struct GroupChatAgentActor {
    agent: Arc<dyn Agent>,
    internal_topic_type: String,
    message_buffer: ChatHistory,
    agent_thread: Option<Box<dyn AgentThread>>,
    agent_response_callback: Option<AgentResponseCallback>,
    streaming_agent_response_callback: Option<StreamingAgentResponseCallback>,
    exception_callback: Option<ExceptionCallback>,
    binding: Option<ActorBinding>,
}

impl GroupChatAgentActor {
    pub fn new(agent: Arc<dyn Agent>, internal_topic_type: impl Into<String>) -> Self {
        Self {
            agent,
            internal_topic_type: internal_topic_type.into(),
            message_buffer: ChatHistory::new(),
            agent_thread: None,
            agent_response_callback: None,
            streaming_agent_response_callback: None,
            exception_callback: None,
            binding: None,
        }
    }

    pub fn with_agent_response_callback(mut self, callback: Option<AgentResponseCallback>) -> Self {
        self.agent_response_callback = callback;
        self
    }

    pub fn with_streaming_agent_response_callback(
        mut self,
        callback: Option<StreamingAgentResponseCallback>,
    ) -> Self {
        self.streaming_agent_response_callback = callback;
        self
    }

    pub fn with_exception_callback(mut self, callback: Option<ExceptionCallback>) -> Self {
        self.exception_callback = callback;
        self
    }

    async fn absorb(&mut self, message: ChatMessageContent) -> GroupChatResult<()> {
        match self.agent_thread.as_mut() {
            Some(thread) => thread
                .on_new_message(message)
                .await
                .map_err(|e| GroupChatError::agent(self.agent.name(), e)),
            None => {
                self.message_buffer.add_message(message);
                Ok(())
            }
        }
    }

    async fn handle_start(&mut self, message: &GroupChatStartMessage) -> GroupChatResult<()> {
        for msg in message.body.clone().into_messages() {
            self.absorb(msg).await?;
        }
        Ok(())
    }

    async fn handle_response(&mut self, message: &GroupChatResponseMessage) -> GroupChatResult<()> {
        self.absorb(message.body.clone()).await
    }

    async fn handle_request(
        &mut self,
        message: &GroupChatRequestMessage,
        ctx: &MessageContext,
    ) -> GroupChatResult<()> {
        if message.agent_name != self.agent.name() {
            return Ok(());
        }
        info!(agent = %self.agent.name(), "agent invoked");

        // Replayed into the buffer if this turn fails or is cancelled.
        let replay = self.conversation().await?;
        let pending = self.message_buffer.take();
        let thread = self.agent_thread.take();
        let token = ctx.cancellation_token.clone();

        let invocation = async {
            if self.streaming_agent_response_callback.is_some() {
                self.invoke_streaming(pending, thread).await
            } else {
                self.agent
                    .invoke(pending, thread)
                    .await
                    .map_err(|e| GroupChatError::agent(self.agent.name(), e))
            }
        };

        let outcome = tokio::select! {
            item = invocation => item,
            _ = token.cancelled() => Err(GroupChatError::Cancelled),
        };
        let AgentResponseItem { message: response, thread } = match outcome {
            Ok(item) => item,
            Err(err) => {
                debug!(agent = %self.agent.name(), replayed = replay.len(), "turn failed, conversation kept");
                self.message_buffer = ChatHistory::from_messages(replay);
                self.agent_thread = None;
                return Err(err);
            }
        };
        self.agent_thread = Some(thread);

        if let Some(callback) = &self.agent_response_callback {
            callback(&response);
        }

        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| GroupChatError::Runtime("agent actor is not bound".to_string()))?;
        let topic = binding.topic(&self.internal_topic_type)?;
        binding
            .publish_message(GroupChatResponseMessage::new(response), topic, &token)
            .await
    }

    /// Everything the participant has heard so far: its thread, then the buffer.
    async fn conversation(&self) -> GroupChatResult<Vec<ChatMessageContent>> {
        let mut messages = match &self.agent_thread {
            Some(thread) => thread
                .get_messages()
                .await
                .map_err(|e| GroupChatError::agent(self.agent.name(), e))?,
            None => Vec::new(),
        };
        messages.extend(self.message_buffer.messages().iter().cloned());
        Ok(messages)
    }

    /// Forwards each chunk as it arrives, then folds them into one message.
    /// The chunk that hands back the thread is the final one.
    async fn invoke_streaming(
        &self,
        pending: Vec<ChatMessageContent>,
        thread: Option<Box<dyn AgentThread>>,
    ) -> GroupChatResult<AgentResponseItem> {
        let name = self.agent.name();
        let mut stream = self.agent.invoke_stream(pending, thread);
        let mut chunks: Vec<ChatMessageContent> = Vec::new();
        let mut final_thread = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GroupChatError::agent(name, e))?;
            let is_final = chunk.thread.is_some();
            if let Some(callback) = &self.streaming_agent_response_callback {
                callback(&chunk.message, is_final);
            }
            if let Some(thread) = chunk.thread {
                final_thread = Some(thread);
            }
            chunks.push(chunk.message);
        }

        let thread = final_thread.ok_or_else(|| GroupChatError::Agent {
            agent: name.to_string(),
            message: "streamed response did not return a thread".to_string(),
        })?;
        let mut chunks = chunks.into_iter();
        let mut message = chunks.next().ok_or_else(|| GroupChatError::Agent {
            agent: name.to_string(),
            message: "streamed response was empty".to_string(),
        })?;
        for chunk in chunks {
            message.content.push_str(&chunk.content);
            message.items.extend(chunk.items);
        }

        Ok(AgentResponseItem { message, thread })
    }

    async fn dispatch(&mut self, message: &Payload, ctx: &MessageContext) -> GroupChatResult<()> {
        if let Some(start) = downcast::<GroupChatStartMessage>(message) {
            debug!(agent = %self.agent.name(), event = start.event_type(), "received");
            return self.handle_start(start).await;
        }
        if let Some(response) = downcast::<GroupChatResponseMessage>(message) {
            debug!(agent = %self.agent.name(), event = response.event_type(), "received");
            return self.handle_response(response).await;
        }
        if let Some(request) = downcast::<GroupChatRequestMessage>(message) {
            return self.handle_request(request, ctx).await;
        }
        match &self.binding {
            Some(binding) => on_unhandled_message(binding.id(), ctx).map(|_| ()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Actor for GroupChatAgentActor {
    fn description(&self) -> &str {
        self.agent.description().unwrap_or_default()
    }

    fn bind(&mut self, binding: ActorBinding) {
        self.binding = Some(binding);
    }

    async fn on_message(
        &mut self,
        message: Payload,
        ctx: MessageContext,
    ) -> GroupChatResult<Option<Payload>> {
        match self.dispatch(&message, &ctx).await {
            Ok(()) => Ok(None),
            Err(err) => {
                if let Some(callback) = &self.exception_callback {
                    callback(err.clone());
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::agent::{ChatHistoryAgentThread, StreamingAgentResponseItem};
    use crate::agents::scripted::ScriptedAgent;
    use futures::stream::{self, BoxStream};
    use crate::team::agent_id::{AgentType, TopicId};
    use crate::team::runtime::{ActorFactory, CoreRuntime, InProcessRuntime};
    use crate::team::subscription::TypeSubscription;
    use std::sync::Mutex;
    use std::time::Instant;
    use tokio::time::{timeout, Duration};
    use tokio_util::sync::CancellationToken;

    /// Captures every response broadcast on the topic.
    struct Recorder {
        seen: Arc<Mutex<Vec<ChatMessageContent>>>,
    }

    #[async_trait]
    impl Actor for Recorder {
        fn description(&self) -> &str {
            "recorder"
        }

        async fn on_message(
            &mut self,
            message: Payload,
            _ctx: MessageContext,
        ) -> GroupChatResult<Option<Payload>> {
            if let Some(response) = downcast::<GroupChatResponseMessage>(&message) {
                self.seen.lock().unwrap().push(response.body.clone());
            }
            Ok(None)
        }
    }

    /// Streams three chunks, the later ones 200 ms apart.
    struct DelayedStreamer;

    #[async_trait]
    impl Agent for DelayedStreamer {
        fn name(&self) -> &str {
            "Writer"
        }

        fn description(&self) -> Option<&str> {
            Some("writes slowly")
        }

        async fn invoke(
            &self,
            messages: Vec<ChatMessageContent>,
            thread: Option<Box<dyn AgentThread>>,
        ) -> anyhow::Result<AgentResponseItem> {
            let mut thread = thread.unwrap_or_else(|| Box::new(ChatHistoryAgentThread::new()));
            for message in messages {
                thread.on_new_message(message).await?;
            }
            Ok(AgentResponseItem {
                message: ChatMessageContent::assistant("Writer", "c0 c1 c2 "),
                thread,
            })
        }

        fn invoke_stream<'a>(
            &'a self,
            _messages: Vec<ChatMessageContent>,
            thread: Option<Box<dyn AgentThread>>,
        ) -> BoxStream<'a, anyhow::Result<StreamingAgentResponseItem>> {
            let thread: Box<dyn AgentThread> =
                thread.unwrap_or_else(|| Box::new(ChatHistoryAgentThread::new()));
            stream::unfold((0usize, Some(thread)), |(i, mut thread)| async move {
                if i == 3 {
                    return None;
                }
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                let item = StreamingAgentResponseItem {
                    message: ChatMessageContent::assistant("Writer", format!("c{i} ")),
                    thread: if i == 2 { thread.take() } else { None },
                };
                Some((Ok(item), (i + 1, thread)))
            })
            .boxed()
        }
    }

    async fn setup(
        agent: Arc<dyn Agent>,
        callback: Option<AgentResponseCallback>,
        streaming: Option<StreamingAgentResponseCallback>,
    ) -> (InProcessRuntime, crate::team::agent_id::AgentId, Arc<Mutex<Vec<ChatMessageContent>>>) {
        let runtime = InProcessRuntime::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let agent_type = AgentType::new("Writer_topic").unwrap();
        let factory: ActorFactory = Arc::new(move || {
            Box::new(
                GroupChatAgentActor::new(agent.clone(), "topic")
                    .with_agent_response_callback(callback.clone())
                    .with_streaming_agent_response_callback(streaming.clone()),
            ) as Box<dyn Actor>
        });
        runtime.register_factory(agent_type.clone(), factory).await.unwrap();

        let recorder_type = AgentType::new("Recorder_topic").unwrap();
        let log = seen.clone();
        let recorder: ActorFactory =
            Arc::new(move || Box::new(Recorder { seen: log.clone() }) as Box<dyn Actor>);
        runtime.register_factory(recorder_type.clone(), recorder).await.unwrap();

        for ty in [agent_type.clone(), recorder_type] {
            runtime
                .add_subscription(TypeSubscription::new("topic", ty).into())
                .await
                .unwrap();
        }
        let id = runtime.get(&agent_type, "default").await.unwrap();
        (runtime, id, seen)
    }

    async fn publish<M: std::any::Any + Send + Sync>(runtime: &InProcessRuntime, message: M) {
        runtime
            .publish_message(
                Arc::new(message),
                TopicId::new("topic", "default").unwrap(),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        timeout(Duration::from_secs(2), runtime.wait_idle()).await.expect("idle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_for_other_agent_is_ignored() {
        let agent = Arc::new(ScriptedAgent::new("Writer", "writes"));
        let log = agent.log();
        let (runtime, _, seen) = setup(agent, None, None).await;

        publish(&runtime, GroupChatRequestMessage::new("Reviewer")).await;

        assert!(log.lock().unwrap().is_empty());
        assert!(seen.lock().unwrap().is_empty());
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_then_request_invokes_and_broadcasts() {
        let agent = Arc::new(ScriptedAgent::new("Writer", "writes").with_replies(["draft"]));
        let log = agent.log();
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = responses.clone();
        let callback: AgentResponseCallback =
            Arc::new(move |m: &ChatMessageContent| sink.lock().unwrap().push(m.content.clone()));
        let (runtime, id, seen) = setup(agent, Some(callback), None).await;

        runtime
            .send_message(
                Arc::new(GroupChatStartMessage::new("slogan")),
                id,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        publish(
            &runtime,
            GroupChatResponseMessage::new(ChatMessageContent::assistant("Reviewer", "go")),
        )
        .await;
        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;

        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 1);
            let seen_text: Vec<_> = log[0].seen.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(seen_text, vec!["slogan", "go"]);
        }
        assert_eq!(*responses.lock().unwrap(), vec!["draft".to_string()]);
        let broadcast: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name.as_deref() == Some("Writer"))
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(broadcast, vec!["draft".to_string()]);

        // The second turn only hands over what arrived since the first one.
        publish(
            &runtime,
            GroupChatResponseMessage::new(ChatMessageContent::assistant("Reviewer", "again")),
        )
        .await;
        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;
        assert_eq!(log.lock().unwrap()[1].seen.len(), 4);
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streaming_callback_sees_chunks_and_final_flag() {
        let agent = Arc::new(
            ScriptedAgent::new("Writer", "writes")
                .with_replies(["one two three"])
                .streaming(true),
        );
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        let streaming: StreamingAgentResponseCallback = Arc::new(move |m: &ChatMessageContent, is_final| {
            sink.lock().unwrap().push((m.content.clone(), is_final));
        });
        let (runtime, _, seen) = setup(agent, None, Some(streaming)).await;

        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;

        let chunks = chunks.lock().unwrap().clone();
        assert_eq!(
            chunks,
            vec![
                ("one ".to_string(), false),
                ("two ".to_string(), false),
                ("three".to_string(), true),
            ]
        );
        assert_eq!(seen.lock().unwrap()[0].content, "one two three");
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_streamed_chunks_are_forwarded_as_they_arrive() {
        let started = Instant::now();
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let sink = arrivals.clone();
        let streaming: StreamingAgentResponseCallback = Arc::new(move |m: &ChatMessageContent, is_final| {
            sink.lock()
                .unwrap()
                .push((m.content.clone(), is_final, started.elapsed()));
        });
        let (runtime, _, seen) = setup(Arc::new(DelayedStreamer), None, Some(streaming)).await;

        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;

        let arrivals = arrivals.lock().unwrap().clone();
        let labels: Vec<_> = arrivals.iter().map(|(c, f, _)| (c.as_str(), *f)).collect();
        assert_eq!(labels, vec![("c0 ", false), ("c1 ", false), ("c2 ", true)]);
        assert!(arrivals[0].2 < Duration::from_millis(400), "first chunk at {:?}", arrivals[0].2);
        assert!(arrivals[2].2 >= Duration::from_millis(400));
        assert_eq!(seen.lock().unwrap()[0].content, "c0 c1 c2 ");
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_turn_keeps_conversation_for_next_request() {
        let agent = Arc::new(
            ScriptedAgent::new("Writer", "writes")
                .with_replies(["draft"])
                .failing_on_turn(0),
        );
        let log = agent.log();
        let (runtime, id, seen) = setup(agent, None, None).await;

        runtime
            .send_message(
                Arc::new(GroupChatStartMessage::new("the task")),
                id.clone(),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let err = runtime
            .send_message(
                Arc::new(GroupChatRequestMessage::new("Writer")),
                id,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GroupChatError::Agent { .. }));
        assert!(log.lock().unwrap().is_empty());

        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;

        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 1);
            let seen_text: Vec<_> = log[0].seen.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(seen_text, vec!["the task"]);
        }
        assert_eq!(seen.lock().unwrap()[0].content, "draft");

        // The rebuilt thread carries on from there.
        publish(
            &runtime,
            GroupChatResponseMessage::new(ChatMessageContent::assistant("Reviewer", "shorter")),
        )
        .await;
        publish(&runtime, GroupChatRequestMessage::new("Writer")).await;
        assert_eq!(log.lock().unwrap()[1].seen.len(), 3);
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_agent_failure_reaches_exception_callback() {
        let runtime = InProcessRuntime::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let on_error: ExceptionCallback = Arc::new(move |e| sink.lock().unwrap().push(e));

        let agent: Arc<dyn Agent> = Arc::new(ScriptedAgent::new("Writer", "writes").failing_on_turn(0));
        let agent_type = AgentType::new("Writer_topic").unwrap();
        let factory: ActorFactory = Arc::new(move || {
            Box::new(
                GroupChatAgentActor::new(agent.clone(), "topic")
                    .with_exception_callback(Some(on_error.clone())),
            ) as Box<dyn Actor>
        });
        runtime.register_factory(agent_type.clone(), factory).await.unwrap();
        let id = runtime.get(&agent_type, "default").await.unwrap();

        let err = runtime
            .send_message(
                Arc::new(GroupChatRequestMessage::new("Writer")),
                id,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GroupChatError::Agent { ref agent, .. } if agent == "Writer"));
        assert_eq!(errors.lock().unwrap().as_slice(), &[err]);
        runtime.stop().await.unwrap();
    }
}
