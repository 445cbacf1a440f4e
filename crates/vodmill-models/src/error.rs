//! Failure taxonomy recorded on tasks and encoding sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an encoding failure.
///
/// The kind decides propagation: input and assembly failures fail the whole
/// set immediately, engine and validation failures are retried up to the
/// attempt limit, and a lost worker requeues the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unreadable or corrupt source. Fails the set, never retried.
    InputError,
    /// External engine non-zero exit or timeout.
    EngineFailure,
    /// Engine succeeded but the output failed sanity checks.
    /// Treated as an engine failure for retry purposes.
    ValidationFailure,
    /// Lease expired without renewal (worker crash or kill).
    WorkerLost,
    /// Manifest/sprite construction failed after tasks succeeded.
    AssemblyFailure,
    /// The encoding set was cancelled while the task was in flight.
    Cancelled,
}

impl FailureKind {
    /// Whether a task failing with this kind is eligible for requeue
    /// (subject to the attempt limit).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::EngineFailure | FailureKind::ValidationFailure | FailureKind::WorkerLost
        )
    }

    /// Whether this kind fails the whole encoding set immediately.
    pub fn fails_set(&self) -> bool {
        matches!(self, FailureKind::InputError | FailureKind::AssemblyFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputError => "input_error",
            FailureKind::EngineFailure => "engine_failure",
            FailureKind::ValidationFailure => "validation_failure",
            FailureKind::WorkerLost => "worker_lost",
            FailureKind::AssemblyFailure => "assembly_failure",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input_error" => Ok(FailureKind::InputError),
            "engine_failure" => Ok(FailureKind::EngineFailure),
            "validation_failure" => Ok(FailureKind::ValidationFailure),
            "worker_lost" => Ok(FailureKind::WorkerLost),
            "assembly_failure" => Ok(FailureKind::AssemblyFailure),
            "cancelled" => Ok(FailureKind::Cancelled),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified error recorded on a task or set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InputError, message)
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(FailureKind::EngineFailure, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ValidationFailure, message)
    }

    pub fn worker_lost(message: impl Into<String>) -> Self {
        Self::new(FailureKind::WorkerLost, message)
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AssemblyFailure, message)
    }
}
