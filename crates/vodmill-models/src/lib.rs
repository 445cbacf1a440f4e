//! Shared data models for the vodmill encoding orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Encode profiles, the profile catalog and profile selection
//! - Encode tasks and their lifecycle transitions
//! - Media encoding sets with derived aggregate status
//! - Chunk planning for parallel encodes
//! - Worker leases and the failure taxonomy

pub mod chunk;
pub mod error;
pub mod ids;
pub mod lease;
pub mod profile;
pub mod set;
pub mod source;
pub mod task;

// Re-export common types
pub use chunk::{plan_chunks, ChunkPlan, ChunkPolicy, ChunkSpec};
pub use error::{FailureKind, TaskError};
pub use ids::{AgentId, MediaId, TaskId, WorkerId};
pub use lease::WorkerLease;
pub use profile::{select_profiles, Codec, Container, EncodeProfile, ProfileCatalog};
pub use set::{MediaEncodingSet, SetArtifacts, SetStatus, VariantRef};
pub use source::SourceInfo;
pub use task::{EncodeTask, PriorityTier, QueueClass, TaskKey, TaskStatus};
