//! Error types for engine invocations and artifact assembly.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur at the encoding engine boundary.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("ffmpeg failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("ffprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Output validation failed: {0}")]
    ValidationFailed(String),

    #[error("Assembly failed: {0}")]
    AssemblyFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        Self::AssemblyFailed(message.into())
    }

    /// Whether retrying the same invocation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegFailed { .. }
                | MediaError::Timeout(_)
                | MediaError::ValidationFailed(_)
                | MediaError::Io(_)
        )
    }
}
