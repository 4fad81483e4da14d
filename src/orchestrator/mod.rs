pub mod config;
pub mod manager;
pub mod manager_actor;
pub mod orchestration;
pub mod result;

pub use config::GroupChatConfig;
pub use manager::{
    BooleanResult, GroupChatManager, GroupChatManagerBase, HumanInTheLoopGroupChatManager,
    HumanResponseFunction, MessageResult, ParticipantDescriptions, RoundRobinGroupChatManager,
    StringResult,
};
pub use manager_actor::GroupChatManagerActor;
pub use orchestration::GroupChatOrchestration;
pub use result::OrchestrationResult;
