use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Agent '{agent}' failed: {message}")]
    Agent { agent: String, message: String },

    #[error("Manager error: {0}")]
    Manager(String),

    #[error("Human response error: {0}")]
    HumanResponse(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Unknown actor type: {0}")]
    UnknownActorType(String),

    #[error("Actor type already registered: {0}")]
    DuplicateActorType(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out waiting for the orchestration result")]
    Timeout,
}

impl GroupChatError {
    /// Wraps a failure raised by a collaborator agent, keeping the whole context chain.
    pub fn agent(agent: &str, err: anyhow::Error) -> Self {
        GroupChatError::Agent {
            agent: agent.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn human_response(err: anyhow::Error) -> Self {
        GroupChatError::HumanResponse(format!("{err:#}"))
    }
}

impl<T> From<std::sync::PoisonError<T>> for GroupChatError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        GroupChatError::Runtime(format!("lock poisoned: {err}"))
    }
}

pub type GroupChatResult<T> = Result<T, GroupChatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn agent_error_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset")).context("model call failed");
        let wrapped = GroupChatError::agent("Writer", err.unwrap_err());
        assert_eq!(
            wrapped.to_string(),
            "Agent 'Writer' failed: model call failed: connection reset"
        );
    }
}
