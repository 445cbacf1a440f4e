//! Worker leases: time-bounded exclusive claims.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, WorkerId};

/// A time-bounded claim binding one task to one worker identity.
///
/// Owned by the scheduler. A lease not renewed within its TTL makes the
/// task eligible for requeue, turning worker-crash recovery into a
/// documented state transition instead of an accident of the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// TTL in seconds, kept for renewal
    pub ttl_secs: i64,
}

impl WorkerLease {
    /// Grant a new lease starting now.
    pub fn grant(task_id: TaskId, worker_id: WorkerId, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            worker_id,
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            ttl_secs,
        }
    }

    /// Extend the lease by its TTL from `now`. Only the holder renews.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.expires_at = now + Duration::seconds(self.ttl_secs);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry_and_renewal() {
        let mut lease = WorkerLease::grant(
            TaskId::from_string("t1"),
            WorkerId::from_string("w1"),
            90,
        );
        let now = Utc::now();
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::seconds(91)));

        let later = now + Duration::seconds(60);
        lease.renew(later);
        assert!(!lease.is_expired(now + Duration::seconds(91)));
        assert!(lease.is_expired(later + Duration::seconds(91)));
    }
}
