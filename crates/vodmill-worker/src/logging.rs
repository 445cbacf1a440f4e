//! Structured task logging.

use tracing::{error, info, warn, Span};
use vodmill_models::TaskId;

/// Task logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    operation: String,
}

impl TaskLogger {
    pub fn new(task_id: &TaskId, operation: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Create a tracing span carrying the task context.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_carries_context() {
        let id = TaskId::from_string("t-123");
        let logger = TaskLogger::new(&id, "encode");
        assert_eq!(logger.task_id(), "t-123");
    }
}
