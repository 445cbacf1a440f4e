//! Scheduler error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("State store error: {0}")]
    State(#[from] vodmill_state::StateError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Lease mismatch for task {task_id}: held by {holder}, not {caller}")]
    LeaseMismatch {
        task_id: String,
        holder: String,
        caller: String,
    },

    #[error("Task {0} is not running")]
    NotRunning(String),
}

impl QueueError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound(id.into())
    }
}
