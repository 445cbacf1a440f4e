//! The job scheduler: ordered, prioritized queues behind one exclusive claim.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use vodmill_models::{
    EncodeTask, MediaId, PriorityTier, QueueClass, TaskError, TaskId, TaskKey, TaskStatus,
    WorkerId, WorkerLease,
};
use vodmill_state::StateTracker;

use crate::error::{QueueError, QueueResult};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lease TTL granted at claim time
    pub lease_ttl: Duration,
    /// How long a waiting claimer sleeps before re-checking backoff timers
    pub claim_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(90),
            claim_poll: Duration::from_millis(500),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            lease_ttl: Duration::from_secs(
                std::env::var("SCHED_LEASE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            ),
            claim_poll: Duration::from_millis(
                std::env::var("SCHED_CLAIM_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
        }
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new task entered the queue.
    Enqueued(TaskId),
    /// A task with the same (media, profile, chunk) key is already pending
    /// or running; nothing was added.
    Duplicate(TaskId),
}

impl EnqueueOutcome {
    pub fn task_id(&self) -> &TaskId {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_enqueued(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued(_))
    }
}

/// What startup recovery found in the durable store.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecoveryReport {
    /// Pending tasks restored to the in-memory queues
    pub requeued_pending: usize,
    /// Tasks left `running` by a dead process, requeued as worker-lost
    pub recovered_running: usize,
    /// Tasks that exhausted their attempts during recovery
    pub failed_permanently: usize,
}

/// Queue depths and lease counts for operator introspection.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerStats {
    pub short_depth: usize,
    pub long_depth: usize,
    pub running: usize,
    pub active_leases: usize,
}

type QueueMap = BTreeMap<(PriorityTier, u64), TaskId>;

#[derive(Default)]
struct Inner {
    short: QueueMap,
    long: QueueMap,
    /// Pending tasks, owned by the queues
    pending: HashMap<TaskId, EncodeTask>,
    /// Position of each pending task for O(log n) removal
    positions: HashMap<TaskId, (QueueClass, (PriorityTier, u64))>,
    /// Running tasks, owned by their lease holder
    running: HashMap<TaskId, EncodeTask>,
    leases: HashMap<TaskId, WorkerLease>,
    /// Idempotency index over pending and running tasks
    index: HashMap<TaskKey, TaskId>,
    /// Monotonic enqueue sequence; FIFO tie-break within a tier
    seq: u64,
}

impl Inner {
    fn queue_mut(&mut self, class: QueueClass) -> &mut QueueMap {
        match class {
            QueueClass::Short => &mut self.short,
            QueueClass::Long => &mut self.long,
        }
    }

    fn push(&mut self, task: EncodeTask) {
        self.seq += 1;
        let pos = (task.tier, self.seq);
        let id = task.id.clone();
        self.queue_mut(task.class).insert(pos, id.clone());
        self.positions.insert(id.clone(), (task.class, pos));
        self.index.insert(task.key(), id.clone());
        self.pending.insert(id, task);
    }

    fn remove_pending(&mut self, id: &TaskId) -> Option<EncodeTask> {
        let task = self.pending.remove(id)?;
        if let Some((class, pos)) = self.positions.remove(id) {
            self.queue_mut(class).remove(&pos);
        }
        self.index.remove(&task.key());
        Some(task)
    }
}

/// Ordered, prioritized queues of encode tasks with exclusive claims.
///
/// The claim/dequeue step is the only critical section in the system; all
/// other execution proceeds without a global lock. Heavy `long` work and
/// quick `short` work live in separate queues so neither starves the other,
/// and within a queue ordering is priority tier then FIFO.
pub struct JobScheduler {
    inner: Mutex<Inner>,
    tracker: Arc<StateTracker>,
    wakeup: Notify,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(tracker: Arc<StateTracker>, config: SchedulerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            tracker,
            wakeup: Notify::new(),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a panic escaped the critical
        // section; the queue state is still consistent for readers.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a task. Idempotent per (media, profile, chunk): while a task
    /// with the same key is pending or running this is a no-op.
    pub fn enqueue(&self, mut task: EncodeTask) -> QueueResult<EnqueueOutcome> {
        let mut inner = self.lock();

        if let Some(existing) = inner.index.get(&task.key()) {
            debug!(key = %task.key(), "Duplicate enqueue ignored");
            return Ok(EnqueueOutcome::Duplicate(existing.clone()));
        }

        // A terminal task with the same key (re-triggered upload, background
        // re-encode) is revived in place so the unique task identity per key
        // is preserved in the store.
        if let Some(stored) = self.tracker.task_by_key(&task.key())? {
            if !stored.status.is_terminal() {
                // Store and memory disagree; trust the store and index it.
                inner.index.insert(stored.key(), stored.id.clone());
                return Ok(EnqueueOutcome::Duplicate(stored.id));
            }
            task.id = stored.id;
            task.attempts = 0;
            task.error = None;
            task.status = TaskStatus::Pending;
        }

        let id = task.id.clone();
        self.tracker.record_task(&task, None, Some("enqueued"))?;
        inner.push(task);
        drop(inner);

        self.wakeup.notify_waiters();
        debug!(task_id = %id, "Task enqueued");
        Ok(EnqueueOutcome::Enqueued(id))
    }

    /// Claim the highest-priority oldest-eligible task from one queue,
    /// atomically transitioning it `pending -> running` under a fresh lease.
    /// Returns `None` when nothing is eligible right now.
    pub fn try_claim(
        &self,
        class: QueueClass,
        worker: &WorkerId,
    ) -> QueueResult<Option<(EncodeTask, WorkerLease)>> {
        let now = Utc::now();
        let mut inner = self.lock();

        let queue = match class {
            QueueClass::Short => &inner.short,
            QueueClass::Long => &inner.long,
        };

        let candidate = queue
            .iter()
            .map(|(_, id)| id)
            .find(|id| {
                inner
                    .pending
                    .get(*id)
                    .map(|t| t.is_eligible(now))
                    .unwrap_or(false)
            })
            .cloned();

        let Some(task_id) = candidate else {
            return Ok(None);
        };

        let task = inner
            .remove_pending(&task_id)
            .ok_or_else(|| QueueError::task_not_found(task_id.as_str()))?;

        let running = task.start(worker.clone());
        let lease = WorkerLease::grant(
            running.id.clone(),
            worker.clone(),
            self.config.lease_ttl.as_secs() as i64,
        );

        self.tracker
            .record_task(&running, Some(lease.expires_at), Some("claimed"))?;

        inner.index.insert(running.key(), running.id.clone());
        inner.leases.insert(running.id.clone(), lease.clone());
        inner.running.insert(running.id.clone(), running.clone());

        debug!(task_id = %running.id, worker = %worker, "Task claimed");
        Ok(Some((running, lease)))
    }

    /// Claim from one queue, waiting while it is empty. Wakes on enqueue
    /// and re-checks periodically so backoff timers are honored.
    pub async fn claim(
        &self,
        class: QueueClass,
        worker: &WorkerId,
    ) -> QueueResult<(EncodeTask, WorkerLease)> {
        loop {
            if let Some(claimed) = self.try_claim(class, worker)? {
                return Ok(claimed);
            }
            let _ = tokio::time::timeout(self.config.claim_poll, self.wakeup.notified()).await;
        }
    }

    /// Renew the lease for a running task. Only the holder may renew.
    pub fn renew(&self, task_id: &TaskId, worker: &WorkerId) -> QueueResult<DateTime<Utc>> {
        let mut inner = self.lock();
        let lease = inner
            .leases
            .get_mut(task_id)
            .ok_or_else(|| QueueError::NotRunning(task_id.to_string()))?;

        if &lease.worker_id != worker {
            return Err(QueueError::LeaseMismatch {
                task_id: task_id.to_string(),
                holder: lease.worker_id.to_string(),
                caller: worker.to_string(),
            });
        }

        lease.renew(Utc::now());
        let expires = lease.expires_at;
        drop(inner);

        self.tracker.record_lease(task_id, expires)?;
        Ok(expires)
    }

    /// Record reported progress for a running task.
    pub fn report_progress(&self, task_id: &TaskId, progress: u8) -> QueueResult<()> {
        let mut inner = self.lock();
        let Some(task) = inner.running.get_mut(task_id) else {
            // Task finished or was cancelled while the report was in flight
            return Ok(());
        };
        task.progress = progress.min(100);
        let snapshot = task.clone();
        drop(inner);

        self.tracker.record_progress(&snapshot)?;
        Ok(())
    }

    fn take_running(
        &self,
        inner: &mut Inner,
        task_id: &TaskId,
        worker: &WorkerId,
    ) -> QueueResult<EncodeTask> {
        let lease = inner
            .leases
            .get(task_id)
            .ok_or_else(|| QueueError::NotRunning(task_id.to_string()))?;
        if &lease.worker_id != worker {
            return Err(QueueError::LeaseMismatch {
                task_id: task_id.to_string(),
                holder: lease.worker_id.to_string(),
                caller: worker.to_string(),
            });
        }
        inner.leases.remove(task_id);
        let task = inner
            .running
            .remove(task_id)
            .ok_or_else(|| QueueError::task_not_found(task_id.as_str()))?;
        inner.index.remove(&task.key());
        Ok(task)
    }

    /// Mark a running task successful, releasing its lease.
    pub fn complete(
        &self,
        task_id: &TaskId,
        worker: &WorkerId,
        output_path: impl Into<String>,
    ) -> QueueResult<EncodeTask> {
        let mut inner = self.lock();
        let task = self.take_running(&mut inner, task_id, worker)?;
        let done = task.complete(output_path);
        self.tracker.record_task(&done, None, None)?;
        drop(inner);

        info!(task_id = %task_id, "Task succeeded");
        Ok(done)
    }

    /// Record a failure for a running task. Retryable failures with
    /// attempts remaining are requeued (optionally after a backoff delay);
    /// everything else fails permanently.
    pub fn fail(
        &self,
        task_id: &TaskId,
        worker: &WorkerId,
        error: TaskError,
        retry_after: Option<DateTime<Utc>>,
    ) -> QueueResult<EncodeTask> {
        let mut inner = self.lock();
        let task = self.take_running(&mut inner, task_id, worker)?;
        let updated = task.fail(error.clone(), retry_after);

        match updated.status {
            TaskStatus::Pending => {
                self.tracker.record_task(&updated, None, Some("requeued"))?;
                inner.push(updated.clone());
                drop(inner);
                self.wakeup.notify_waiters();
                warn!(
                    task_id = %task_id,
                    attempts = updated.attempts,
                    error = %error,
                    "Task failed, requeued"
                );
            }
            _ => {
                self.tracker
                    .record_task(&updated, None, Some("failed permanently"))?;
                drop(inner);
                warn!(task_id = %task_id, error = %error, "Task failed permanently");
            }
        }
        Ok(updated)
    }

    /// Requeue every task whose lease has expired, as if its worker died.
    /// Each expiry requeues the task exactly once; the attempt consumed at
    /// claim time is the one counted against the limit.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> QueueResult<Vec<EncodeTask>> {
        let mut inner = self.lock();
        let expired: Vec<TaskId> = inner
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut recovered = Vec::new();
        for task_id in expired {
            let Some(lease) = inner.leases.remove(&task_id) else {
                continue;
            };
            let Some(task) = inner.running.remove(&task_id) else {
                continue;
            };
            inner.index.remove(&task.key());

            let updated = task.fail(
                TaskError::worker_lost(format!("lease expired for worker {}", lease.worker_id)),
                None,
            );

            match updated.status {
                TaskStatus::Pending => {
                    self.tracker
                        .record_task(&updated, None, Some("lease expired"))?;
                    inner.push(updated.clone());
                    warn!(task_id = %task_id, worker = %lease.worker_id, "Lease expired, task requeued");
                }
                _ => {
                    self.tracker
                        .record_task(&updated, None, Some("lease expired, attempts exhausted"))?;
                    warn!(task_id = %task_id, "Lease expired with attempts exhausted");
                }
            }
            recovered.push(updated);
        }

        if !recovered.is_empty() {
            drop(inner);
            self.wakeup.notify_waiters();
        }
        Ok(recovered)
    }

    /// Cancel all non-terminal tasks of a media item. Pending tasks leave
    /// the queue immediately; the returned ids are the in-flight tasks the
    /// worker pool must signal. Leases are released without requeue.
    pub fn cancel_media(&self, media_id: &MediaId) -> QueueResult<Vec<TaskId>> {
        let mut inner = self.lock();

        let pending_ids: Vec<TaskId> = inner
            .pending
            .values()
            .filter(|t| &t.media_id == media_id)
            .map(|t| t.id.clone())
            .collect();
        for id in pending_ids {
            if let Some(task) = inner.remove_pending(&id) {
                let cancelled = task.cancel();
                self.tracker.record_task(&cancelled, None, Some("cancelled"))?;
            }
        }

        let running_ids: Vec<TaskId> = inner
            .running
            .values()
            .filter(|t| &t.media_id == media_id)
            .map(|t| t.id.clone())
            .collect();
        for id in &running_ids {
            inner.leases.remove(id);
            if let Some(task) = inner.running.remove(id) {
                inner.index.remove(&task.key());
                let cancelled = task.cancel();
                self.tracker.record_task(&cancelled, None, Some("cancelled"))?;
            }
        }

        info!(media_id = %media_id, in_flight = running_ids.len(), "Cancelled encoding set tasks");
        Ok(running_ids)
    }

    /// Rebuild the queues from the durable store after a restart. Tasks the
    /// dead process left `running` requeue through the worker-lost path.
    pub fn recover(&self) -> QueueResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut inner = self.lock();

        for task in self.tracker.pending_tasks()? {
            inner.push(task);
            report.requeued_pending += 1;
        }

        for task in self.tracker.running_tasks()? {
            let updated = task.fail(
                TaskError::worker_lost("orchestrator restarted while task was running"),
                None,
            );
            match updated.status {
                TaskStatus::Pending => {
                    self.tracker
                        .record_task(&updated, None, Some("recovered after restart"))?;
                    inner.push(updated);
                    report.recovered_running += 1;
                }
                _ => {
                    self.tracker
                        .record_task(&updated, None, Some("attempts exhausted during recovery"))?;
                    report.failed_permanently += 1;
                }
            }
        }

        drop(inner);
        self.wakeup.notify_waiters();
        info!(
            requeued_pending = report.requeued_pending,
            recovered_running = report.recovered_running,
            failed_permanently = report.failed_permanently,
            "Scheduler recovery complete"
        );
        Ok(report)
    }

    /// Queue depths and lease counts.
    pub fn stats(&self) -> SchedulerStats {
        let inner = self.lock();
        SchedulerStats {
            short_depth: inner.short.len(),
            long_depth: inner.long.len(),
            running: inner.running.len(),
            active_leases: inner.leases.len(),
        }
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }
}
