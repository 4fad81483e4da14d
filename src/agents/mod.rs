pub mod agent;
pub mod scripted;

pub use agent::{Agent, AgentThread, ChatHistoryAgentThread};
pub use scripted::ScriptedAgent;
