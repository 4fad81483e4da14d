//! The actor that owns a run's canonical chat history and drives the manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::orchestrator::manager::{GroupChatManager, ParticipantDescriptions};
use crate::orchestrator::orchestration::{ExceptionCallback, ResultCallback};
use crate::team::context::MessageContext;
use crate::team::routed::{downcast, on_unhandled_message, ActorBinding};
use crate::team::runtime::{Actor, Payload};
use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::event::{
    Event, GroupChatRequestMessage, GroupChatResponseMessage, GroupChatStartMessage,
};
use crate::types::message::{AuthorRole, ChatHistory, ChatMessageContent};

pub const MANAGER_ACTOR_NAME: &str = "GroupChatManagerActor";

pub const TERMINATION_REASON_KEY: &str = "termination_reason";
pub const FILTER_RESULT_REASON_KEY: &str = "filter_result_reason";

pub struct GroupChatManagerActor {
    manager: Arc<dyn GroupChatManager>,
    internal_topic_type: String,
    participant_descriptions: ParticipantDescriptions,
    chat_history: ChatHistory,
    result_callback: Option<ResultCallback>,
    exception_callback: Option<ExceptionCallback>,
    terminated: bool,
    binding: Option<ActorBinding>,
}

impl GroupChatManagerActor {
    pub fn new(
        manager: Arc<dyn GroupChatManager>,
        internal_topic_type: impl Into<String>,
        participant_descriptions: ParticipantDescriptions,
    ) -> Self {
        Self {
            manager,
            internal_topic_type: internal_topic_type.into(),
            participant_descriptions,
            chat_history: ChatHistory::new(),
            result_callback: None,
            exception_callback: None,
            terminated: false,
            binding: None,
        }
    }

    pub fn with_result_callback(mut self, callback: Option<ResultCallback>) -> Self {
        self.result_callback = callback;
        self
    }

    pub fn with_exception_callback(mut self, callback: Option<ExceptionCallback>) -> Self {
        self.exception_callback = callback;
        self
    }

    fn binding(&self) -> GroupChatResult<&ActorBinding> {
        self.binding
            .as_ref()
            .ok_or_else(|| GroupChatError::Runtime("manager actor is not bound".to_string()))
    }

    async fn handle_start(&mut self, message: &GroupChatStartMessage, ctx: &MessageContext) -> GroupChatResult<()> {
        for msg in message.body.clone().into_messages() {
            self.chat_history.add_message(msg);
        }
        self.determine_state_and_take_action(ctx).await
    }

    async fn handle_response(
        &mut self,
        message: &GroupChatResponseMessage,
        ctx: &MessageContext,
    ) -> GroupChatResult<()> {
        if message.body.role != AuthorRole::User {
            let speaker = message.body.name.as_deref().unwrap_or("unknown");
            self.chat_history
                .add_message(ChatMessageContent::user(format!("Transferred to {speaker}")));
        }
        self.chat_history.add_message(message.body.clone());
        self.determine_state_and_take_action(ctx).await
    }

    /// One turn: user input, then termination, then the next speaker.
    async fn determine_state_and_take_action(&mut self, ctx: &MessageContext) -> GroupChatResult<()> {
        let token = ctx.cancellation_token.clone();

        let user_input = self
            .manager
            .should_request_user_input(self.chat_history.clone())
            .await?;
        debug!(result = user_input.result, reason = %user_input.reason, "should_request_user_input");
        if user_input.result {
            if let Some(human) = self.manager.human_response_function() {
                let human_message = human.call(self.chat_history.clone()).await?;
                info!(content = %human_message.content, "human response received");
                self.chat_history.add_message(human_message.clone());

                let binding = self.binding()?;
                let topic = binding.topic(&self.internal_topic_type)?;
                binding
                    .publish_message(GroupChatResponseMessage::new(human_message), topic, &token)
                    .await?;
            }
        }

        let termination = self
            .manager
            .should_terminate(self.chat_history.clone())
            .await?;
        debug!(result = termination.result, reason = %termination.reason, "should_terminate");
        if termination.result {
            self.terminated = true;
            info!(reason = %termination.reason, "group chat terminated");
            if let Some(callback) = &self.result_callback {
                let filtered = self
                    .manager
                    .filter_results(self.chat_history.clone())
                    .await?;
                let message = filtered
                    .result
                    .with_metadata(TERMINATION_REASON_KEY, termination.reason)
                    .with_metadata(FILTER_RESULT_REASON_KEY, filtered.reason);
                callback(message).await;
            }
            return Ok(());
        }

        let next = self
            .manager
            .select_next_agent(self.chat_history.clone(), &self.participant_descriptions)
            .await?;
        if !self.participant_descriptions.contains(&next.result) {
            return Err(GroupChatError::Protocol(format!(
                "manager selected unknown participant '{}'",
                next.result
            )));
        }
        info!(agent = %next.result, reason = %next.reason, "next speaker selected");

        let binding = self.binding()?;
        let topic = binding.topic(&self.internal_topic_type)?;
        binding
            .publish_message(GroupChatRequestMessage::new(next.result), topic, &token)
            .await
    }

    async fn dispatch(&mut self, message: &Payload, ctx: &MessageContext) -> GroupChatResult<()> {
        if self.terminated {
            warn!(message_id = %ctx.message_id, "group chat already terminated, ignoring message");
            return Ok(());
        }
        if let Some(start) = downcast::<GroupChatStartMessage>(message) {
            debug!(event = start.event_type(), "manager received");
            return self.handle_start(start, ctx).await;
        }
        if let Some(response) = downcast::<GroupChatResponseMessage>(message) {
            debug!(event = response.event_type(), "manager received");
            return self.handle_response(response, ctx).await;
        }
        if downcast::<GroupChatRequestMessage>(message).is_some() {
            return Ok(());
        }
        let binding = self.binding()?;
        on_unhandled_message(binding.id(), ctx).map(|_| ())
    }

    pub fn chat_history(&self) -> &ChatHistory {
        &self.chat_history
    }
}

#[async_trait]
impl Actor for GroupChatManagerActor {
    fn description(&self) -> &str {
        "Manager of a group chat"
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
