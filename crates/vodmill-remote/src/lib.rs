//! Remote worker gateway.
//!
//! This crate provides:
//! - A registry of remote encoding agents (capabilities, capacity,
//!   heartbeats)
//! - An HTTP client for dispatching encodes to agents
//! - A supervising gateway that polls dispatched tasks and declares
//!   silent agents lost
//!
//! Remote execution is an additive capacity layer: with no agents
//! registered everything runs locally and nothing here is on the hot
//! path.

pub mod client;
pub mod error;
pub mod gateway;
pub mod registry;

pub use client::{AgentClient, HttpAgentClient, RemoteEncodeRequest, RemoteTaskStatus};
pub use error::{RemoteError, RemoteResult};
pub use gateway::{GatewayConfig, RemoteGateway, RemoteOutcome};
pub use registry::{AgentInfo, AgentRegistry};
