//! Remote gateway error types.

use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No remote agent has capacity for this task")]
    NoCapacity,

    #[error("Agent {0} is not registered")]
    UnknownAgent(String),

    #[error("Agent {agent} rejected the task: {message}")]
    AgentRejected { agent: String, message: String },

    #[error("Remote encode failed on agent {agent}: {message}")]
    RemoteFailed { agent: String, message: String },

    #[error("No heartbeat from agent {0} within the timeout window")]
    HeartbeatTimeout(String),

    #[error("Dispatch cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether this error means the agent (and any work it held) must be
    /// treated as lost, releasing the task back to the queue.
    pub fn is_agent_loss(&self) -> bool {
        matches!(
            self,
            RemoteError::HeartbeatTimeout(_) | RemoteError::Http(_)
        )
    }
}
