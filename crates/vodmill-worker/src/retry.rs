//! Retry backoff policy and failure log suppression.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

/// Exponential backoff with full jitter for task retries.
///
/// The actual delay for attempt `n` is drawn uniformly from
/// `[0, min(base * 2^(n-1), cap)]` so a burst of failures from one media
/// item does not requeue in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// The deterministic ceiling for a given attempt (1-based).
    fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }

    /// Jittered delay for a given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::rng().random_range(0..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Absolute timestamp before which a failed attempt must not be
    /// re-claimed.
    pub fn retry_at(&self, attempt: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt);
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
        debug!(attempt, delay_ms = delay.num_milliseconds(), "Computed retry backoff");
        Utc::now() + delay
    }
}

/// Consecutive-failure tracker for background loops.
///
/// Suppresses log spam once a loop (heartbeat, sweep) has failed more
/// than `max_logged_failures` times in a row.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a success, resetting the failure count.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failure. Returns `true` if it should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
