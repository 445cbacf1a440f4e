//! Durable state tracking for the vodmill orchestrator.
//!
//! This crate provides:
//! - SQLite-backed persistence for tasks and encoding sets
//! - An append-only transition log (append-then-compute)
//! - Derived aggregate status and progress
//! - Terminal-state notifications via a broadcast channel

pub mod error;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod tracker;

pub use error::{StateError, StateResult};
pub use pool::{init_memory_pool, init_pool, DbPool, PooledConnection};
pub use tracker::{SetEvent, SetSnapshot, StateTracker, StoreStats};
