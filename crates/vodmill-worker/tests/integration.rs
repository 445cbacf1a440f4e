//! Integration test runner.
//!
//! Run all integration tests:
//!   cargo test --test integration
//!
//! Run tests that require a real ffmpeg install:
//!   cargo test --test integration -- --ignored

#[path = "integration/mod.rs"]
mod integration;
