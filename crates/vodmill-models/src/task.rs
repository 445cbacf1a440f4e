//! Encode tasks and their lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FailureKind, TaskError};
use crate::ids::{MediaId, TaskId, WorkerId};

/// Which scheduler queue a task belongs to.
///
/// Heavy transcode work lives in the `long` queue so it can never delay
/// near-instant operations in the `short` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    /// Lightweight, near-instant operations (thumbnail refresh, re-probe)
    Short,
    /// Transcode / HLS / sprite work
    #[default]
    Long,
}

impl QueueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Short => "short",
            QueueClass::Long => "long",
        }
    }
}

impl std::str::FromStr for QueueClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(QueueClass::Short),
            "long" => Ok(QueueClass::Long),
            other => Err(format!("unknown queue class: {other}")),
        }
    }
}

/// Priority tier within a queue. Lower value wins at dequeue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// User-initiated / interactive work
    Interactive = 0,
    /// Normal upload processing
    #[default]
    Normal = 1,
    /// Background re-encodes
    Background = 2,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Interactive => "interactive",
            PriorityTier::Normal => "normal",
            PriorityTier::Background => "background",
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => PriorityTier::Interactive,
            1 => PriorityTier::Normal,
            _ => PriorityTier::Background,
        }
    }
}

/// Task state in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in queue (or backing off before a retry)
    #[default]
    Pending,
    /// Claimed by a worker and executing
    Running,
    /// Finished with a validated output
    Success,
    /// Exhausted retries or hit a non-retryable failure
    Fail,
    /// Parent set was cancelled before the task reached a terminal state
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Fail => "fail",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Fail | TaskStatus::Cancelled
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "fail" => Ok(TaskStatus::Fail),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Idempotency key for a task: one task per (media, profile, chunk).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub media_id: MediaId,
    pub profile: String,
    pub chunk_index: Option<u32>,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(chunk) => write!(f, "{}:{}:{}", self.media_id, self.profile, chunk),
            None => write!(f, "{}:{}", self.media_id, self.profile),
        }
    }
}

/// One unit of work: transcode one media item (or one chunk of it) into one
/// target profile.
///
/// Mutated only by the worker currently holding it or by the scheduler on
/// requeue/timeout. At most one worker holds a task in `Running` at a time;
/// ownership is transferred by explicit claim/release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeTask {
    /// Unique task ID
    pub id: TaskId,

    /// Source media item
    pub media_id: MediaId,

    /// Referenced profile name (profiles are owned by the catalog)
    pub profile: String,

    /// Chunk index for chunked encodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    /// Queue class
    #[serde(default)]
    pub class: QueueClass,

    /// Priority tier
    #[serde(default)]
    pub tier: PriorityTier,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// Attempts consumed so far (claims, not completions)
    #[serde(default)]
    pub attempts: u32,

    /// Attempt limit before the task fails permanently
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Worker currently holding the task, if running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,

    /// Whether this profile must succeed for the set to be ready
    #[serde(default = "default_required")]
    pub required: bool,

    /// Earliest eligible dequeue time (retry backoff)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Progress 0-100, reported by the executing worker
    #[serde(default)]
    pub progress: u8,

    /// Validated output location once successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Last recorded error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    pub enqueued_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_required() -> bool {
    true
}

impl EncodeTask {
    /// Create a pending task for one (media, profile, chunk) unit.
    pub fn new(
        media_id: MediaId,
        profile: impl Into<String>,
        chunk_index: Option<u32>,
        class: QueueClass,
        tier: PriorityTier,
        required: bool,
    ) -> Self {
        Self {
            id: TaskId::new(),
            media_id,
            profile: profile.into(),
            chunk_index,
            class,
            tier,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: default_max_attempts(),
            worker_id: None,
            required,
            not_before: None,
            progress: 0,
            output_path: None,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// The idempotency key for this task.
    pub fn key(&self) -> TaskKey {
        TaskKey {
            media_id: self.media_id.clone(),
            profile: self.profile.clone(),
            chunk_index: self.chunk_index,
        }
    }

    /// Claim the task for a worker: `pending -> running`, consuming one
    /// attempt.
    pub fn start(mut self, worker: WorkerId) -> Self {
        self.status = TaskStatus::Running;
        self.worker_id = Some(worker);
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.not_before = None;
        self
    }

    /// Mark the task successful with its validated output.
    pub fn complete(mut self, output_path: impl Into<String>) -> Self {
        self.status = TaskStatus::Success;
        self.output_path = Some(output_path.into());
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        self.worker_id = None;
        self
    }

    /// Record a failure. The task returns to `pending` when the error is
    /// retryable and attempts remain, otherwise it fails permanently.
    pub fn fail(mut self, error: TaskError, retry_after: Option<DateTime<Utc>>) -> Self {
        let can_retry = error.kind.is_retryable() && self.attempts < self.max_attempts;
        self.error = Some(error);
        self.worker_id = None;
        if can_retry {
            self.status = TaskStatus::Pending;
            self.not_before = retry_after;
            self.progress = 0;
        } else {
            self.status = TaskStatus::Fail;
            self.finished_at = Some(Utc::now());
        }
        self
    }

    /// Cancel a non-terminal task.
    pub fn cancel(mut self) -> Self {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Cancelled;
            self.error = Some(TaskError::new(FailureKind::Cancelled, "set cancelled"));
            self.finished_at = Some(Utc::now());
            self.worker_id = None;
        }
        self
    }

    /// Whether another claim is permitted after a retryable failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts && self.status == TaskStatus::Pending
    }

    /// Whether the task is eligible for dequeue at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.not_before.map(|t| t <= now).unwrap_or(true)
    }

    /// Update reported progress.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }
}
