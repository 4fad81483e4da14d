pub mod agent_id;
pub mod container;
pub mod context;
pub mod routed;
pub mod runtime;
pub mod subscription;

pub use agent_id::{AgentId, AgentType, TopicId};
pub use container::GroupChatAgentActor;
pub use context::MessageContext;
pub use runtime::{Actor, CoreRuntime, InProcessRuntime, Payload};
