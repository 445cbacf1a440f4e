//! Worker configuration.

use std::time::Duration;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent execution slots for the `long` queue
    pub long_slots: usize,
    /// Concurrent execution slots for the `short` queue
    pub short_slots: usize,
    /// Hard wall-clock timeout per engine invocation
    pub engine_timeout: Duration,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
    /// Directory for encoded outputs and assembled artifacts
    pub output_dir: String,
    /// Scratch directory for chunk intermediates
    pub work_dir: String,
    /// Interval for renewing leases of in-flight tasks
    pub heartbeat_interval: Duration,
    /// Interval for sweeping expired leases
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            long_slots: 2,
            short_slots: 2,
            engine_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
            output_dir: "/var/lib/vodmill/output".to_string(),
            work_dir: "/tmp/vodmill".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(15),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            long_slots: std::env::var("WORKER_LONG_SLOTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            short_slots: std::env::var("WORKER_SHORT_SLOTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            engine_timeout: Duration::from_secs(
                std::env::var("WORKER_ENGINE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .unwrap_or_else(|_| "/var/lib/vodmill/output".to_string()),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .unwrap_or_else(|_| "/tmp/vodmill".to_string()),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WORKER_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("WORKER_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
        }
    }
}
