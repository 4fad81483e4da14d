//! Group chat orchestration over an actor runtime.
//!
//! A [`GroupChatOrchestration`] wires its member agents and a
//! [`GroupChatManager`] onto a [`CoreRuntime`]; the manager picks who speaks
//! next until it decides the chat is over, and the final message arrives on
//! the returned [`OrchestrationResult`].

pub mod agents;
pub mod orchestrator;
pub mod team;
pub mod types;

pub use agents::{Agent, AgentThread, ChatHistoryAgentThread, ScriptedAgent};
pub use orchestrator::{
    GroupChatConfig, GroupChatManager, GroupChatOrchestration, HumanInTheLoopGroupChatManager,
    HumanResponseFunction, OrchestrationResult, RoundRobinGroupChatManager,
};
pub use team::{CoreRuntime, InProcessRuntime};
pub use types::{ChatHistory, ChatMessageContent, GroupChatError, GroupChatResult};
