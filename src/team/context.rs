use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::team::agent_id::{AgentId, TopicId};

/// Per-delivery envelope metadata handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub sender: Option<AgentId>,
    pub topic_id: Option<TopicId>,
    pub is_rpc: bool,
    pub cancellation_token: CancellationToken,
    pub message_id: String,
}

impl MessageContext {
    pub fn rpc(sender: Option<AgentId>, cancellation_token: CancellationToken) -> Self {
        Self {
            sender,
            topic_id: None,
            is_rpc: true,
            cancellation_token,
            message_id: new_message_id(),
        }
    }

    pub fn broadcast(
        sender: Option<AgentId>,
        topic_id: TopicId,
        cancellation_token: CancellationToken,
        message_id: String,
    ) -> Self {
        Self {
            sender,
            topic_id: Some(topic_id),
            is_rpc: false,
            cancellation_token,
            message_id,
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
