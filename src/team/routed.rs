//! Helpers actors use to route incoming payloads and to talk back to the runtime.

use std::any::Any;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::team::agent_id::{AgentId, TopicId};
use crate::team::context::MessageContext;
use crate::team::runtime::{CoreRuntime, Payload};
use crate::types::error::{GroupChatError, GroupChatResult};

/// Borrow the payload as `T` if that is what it carries.
pub fn downcast<T: Any>(payload: &Payload) -> Option<&T> {
    (**payload).downcast_ref::<T>()
}

/// Default for payload types an actor has no handler for.
pub fn on_unhandled_message(id: &AgentId, ctx: &MessageContext) -> GroupChatResult<Option<Payload>> {
    warn!(actor = %id, message_id = %ctx.message_id, "unhandled message type");
    Ok(None)
}

/// An actor's own address plus the runtime that hosts it.
///
/// Handed to the actor once, right after its factory builds it.
#[derive(Clone)]
pub struct ActorBinding {
    id: AgentId,
    runtime: Arc<dyn CoreRuntime>,
}

impl ActorBinding {
    pub fn new(id: AgentId, runtime: Arc<dyn CoreRuntime>) -> Self {
        Self { id, runtime }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Topic on `topic_type` scoped to this actor's key.
    pub fn topic(&self, topic_type: &str) -> GroupChatResult<TopicId> {
        TopicId::new(topic_type, self.id.key())
    }

    pub async fn publish_message<M>(
        &self,
        message: M,
        topic_id: TopicId,
        cancellation_token: &CancellationToken,
    ) -> GroupChatResult<()>
    where
        M: Any + Send + Sync,
    {
        if cancellation_token.is_cancelled() {
            return Err(GroupChatError::Cancelled);
        }
        self.runtime
            .publish_message(
                Arc::new(message),
                topic_id,
                Some(self.id.clone()),
                cancellation_token.clone(),
            )
            .await
    }
}
