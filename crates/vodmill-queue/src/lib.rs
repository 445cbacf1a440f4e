//! Priority job scheduler for encode tasks.
//!
//! This crate provides:
//! - Two ordered queues (`short`/`long`) with tier-then-FIFO ordering
//! - Idempotent enqueue keyed on (media, profile, chunk)
//! - An exclusive claim step that grants a worker lease
//! - Lease renewal, expiry sweeping and cancellation
//! - Crash recovery from the durable store

pub mod error;
pub mod scheduler;

pub use error::{QueueError, QueueResult};
pub use scheduler::{
    EnqueueOutcome, JobScheduler, RecoveryReport, SchedulerConfig, SchedulerStats,
};
