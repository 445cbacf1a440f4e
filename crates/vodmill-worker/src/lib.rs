//! Worker pool and pipeline orchestration.
//!
//! This crate provides:
//! - `submit()` entry point (probe, profile selection, chunk planning)
//! - Task executor with bounded slots per queue class
//! - Local and remote encoding engines behind one trait
//! - Assembler (chunk reassembly, master manifest, sprite, poster)
//! - Retry with exponential backoff and jitter
//! - Graceful shutdown

pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod retry;

pub use assembler::{Assembler, OutputLayout};
pub use config::WorkerConfig;
pub use engine::{EncodeRequest, EncodingEngine, FfmpegEngine, RemoteEngine};
pub use error::{WorkerError, WorkerResult};
pub use executor::TaskExecutor;
pub use logging::TaskLogger;
pub use orchestrator::{Orchestrator, SubmitReceipt, PREVIEW_PROFILE};
pub use retry::{FailureTracker, RetryPolicy};
