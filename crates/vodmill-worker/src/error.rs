//! Worker error types.

use thiserror::Error;

use vodmill_media::MediaError;
use vodmill_models::{FailureKind, TaskError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] vodmill_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vodmill_queue::QueueError),

    #[error("State store error: {0}")]
    State(#[from] vodmill_state::StateError),

    #[error("Remote dispatch error: {0}")]
    Remote(#[from] vodmill_remote::RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Classify this error for the retry machinery.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            WorkerError::Media(MediaError::Cancelled) => FailureKind::Cancelled,
            WorkerError::Media(MediaError::ValidationFailed(_)) => FailureKind::ValidationFailure,
            WorkerError::Media(
                MediaError::InvalidSource(_)
                | MediaError::FileNotFound(_)
                | MediaError::FfprobeFailed { .. },
            ) => FailureKind::InputError,
            WorkerError::Media(MediaError::AssemblyFailed(_)) => FailureKind::AssemblyFailure,
            WorkerError::Remote(e) if e.is_agent_loss() => FailureKind::WorkerLost,
            _ => FailureKind::EngineFailure,
        }
    }

    /// Convert to the classified error recorded on the task.
    pub fn to_task_error(&self) -> TaskError {
        TaskError::new(self.failure_kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_classification() {
        let err = WorkerError::Media(MediaError::ValidationFailed("empty".into()));
        assert_eq!(err.failure_kind(), FailureKind::ValidationFailure);

        let err = WorkerError::Media(MediaError::InvalidSource("no stream".into()));
        assert_eq!(err.failure_kind(), FailureKind::InputError);

        let err = WorkerError::Media(MediaError::Timeout(60));
        assert_eq!(err.failure_kind(), FailureKind::EngineFailure);

        let err = WorkerError::Media(MediaError::Cancelled);
        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
    }
}
