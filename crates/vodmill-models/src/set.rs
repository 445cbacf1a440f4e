//! Media encoding sets: the aggregate of all tasks for one source item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkPlan;
use crate::error::TaskError;
use crate::ids::MediaId;
use crate::source::SourceInfo;
use crate::task::{EncodeTask, TaskStatus};

/// Aggregate status of a media item's encoding set.
///
/// Always derived from constituent task states plus set-level failures,
/// never settable independently, so the aggregate can not drift from the
/// tasks it summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    #[default]
    Pending,
    Running,
    /// Required profiles succeeded, one or more optional profiles failed
    PartialSuccess,
    Success,
    Fail,
    Cancelled,
}

impl SetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetStatus::Pending => "pending",
            SetStatus::Running => "running",
            SetStatus::PartialSuccess => "partial_success",
            SetStatus::Success => "success",
            SetStatus::Fail => "fail",
            SetStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SetStatus::PartialSuccess | SetStatus::Success | SetStatus::Fail | SetStatus::Cancelled
        )
    }

    /// Whether the media item has a usable variant list.
    pub fn is_ready(&self) -> bool {
        matches!(self, SetStatus::Success | SetStatus::PartialSuccess)
    }
}

impl std::str::FromStr for SetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SetStatus::Pending),
            "running" => Ok(SetStatus::Running),
            "partial_success" => Ok(SetStatus::PartialSuccess),
            "success" => Ok(SetStatus::Success),
            "fail" => Ok(SetStatus::Fail),
            "cancelled" => Ok(SetStatus::Cancelled),
            other => Err(format!("unknown set status: {other}")),
        }
    }
}

/// One successfully produced variant, referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRef {
    pub profile: String,
    pub path: String,
    /// Bandwidth in bits/s for manifest metadata
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
}

/// Final delivery artifacts for a ready set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetArtifacts {
    /// Adaptive-streaming master manifest
    pub manifest_path: String,
    /// Sprite sheet image
    pub sprite_path: String,
    /// Frame-index table mapping timestamps to sprite cells
    pub sprite_index_path: String,
    /// Poster frame
    pub poster_path: String,
    /// Variants ascending by bandwidth
    pub variants: Vec<VariantRef>,
}

/// The aggregate of all encode tasks belonging to one source media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEncodingSet {
    pub media_id: MediaId,

    /// Where the source bytes live (local path or fetch URL)
    pub source_location: String,

    /// Probed source metadata
    pub source: SourceInfo,

    /// Selected profile names, ascending by bitrate
    pub profiles: Vec<String>,

    /// Chunk plan while a chunked encode is in flight; discarded after
    /// assembly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_plan: Option<ChunkPlan>,

    /// Set-level failure (input or assembly), if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskError>,

    /// Whether the set was cancelled (source deleted, user abort)
    #[serde(default)]
    pub cancelled: bool,

    /// Delivery artifacts once assembled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<SetArtifacts>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaEncodingSet {
    pub fn new(
        media_id: MediaId,
        source_location: impl Into<String>,
        source: SourceInfo,
        profiles: Vec<String>,
        chunk_plan: Option<ChunkPlan>,
    ) -> Self {
        let now = Utc::now();
        Self {
            media_id,
            source_location: source_location.into(),
            source,
            profiles,
            chunk_plan,
            failure: None,
            cancelled: false,
            artifacts: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a set-level failure (input error, assembly failure).
    pub fn fail(mut self, error: TaskError) -> Self {
        self.failure = Some(error);
        self.updated_at = Utc::now();
        self
    }

    /// Mark the set cancelled.
    pub fn cancel(mut self) -> Self {
        self.cancelled = true;
        self.updated_at = Utc::now();
        self
    }

    /// Attach final artifacts after assembly.
    pub fn with_artifacts(mut self, artifacts: SetArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self.chunk_plan = None;
        self.updated_at = Utc::now();
        self
    }

    /// Derive the aggregate status from this set's tasks.
    ///
    /// `success` iff every required task is `success`; `fail` iff any
    /// required task failed terminally or a set-level failure is recorded;
    /// optional-profile failures alone downgrade to `partial_success`.
    ///
    /// The set stays `running` while any task, optional included, is still
    /// live: assembling before an optional variant finishes would omit it
    /// from the manifest.
    pub fn derive_status(&self, tasks: &[EncodeTask]) -> SetStatus {
        if self.cancelled {
            return SetStatus::Cancelled;
        }
        if self.failure.is_some() {
            return SetStatus::Fail;
        }
        if tasks.is_empty() {
            return SetStatus::Pending;
        }

        let required: Vec<&EncodeTask> = tasks.iter().filter(|t| t.required).collect();
        if required.iter().any(|t| t.status == TaskStatus::Fail) {
            return SetStatus::Fail;
        }

        let all_required_done = !required.is_empty()
            && required.iter().all(|t| t.status == TaskStatus::Success);
        let all_terminal = tasks.iter().all(|t| t.status.is_terminal());

        if all_required_done && all_terminal {
            let optional_failed = tasks
                .iter()
                .any(|t| !t.required && t.status == TaskStatus::Fail);
            return if optional_failed {
                SetStatus::PartialSuccess
            } else {
                SetStatus::Success
            };
        }

        let any_started = tasks
            .iter()
            .any(|t| t.status != TaskStatus::Pending || t.attempts > 0);
        if any_started {
            SetStatus::Running
        } else {
            SetStatus::Pending
        }
    }

    /// Overall progress in percent, weighted by task count.
    pub fn derive_progress(&self, tasks: &[EncodeTask]) -> u8 {
        if tasks.is_empty() {
            return 0;
        }
        let total: u32 = tasks
            .iter()
            .map(|t| match t.status {
                TaskStatus::Success => 100,
                TaskStatus::Fail | TaskStatus::Cancelled => 100,
                _ => u32::from(t.progress),
            })
            .sum();
        (total / tasks.len() as u32).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkerId;
    use crate::task::{PriorityTier, QueueClass};

    fn set() -> MediaEncodingSet {
        MediaEncodingSet::new(
            MediaId::from_string("m1"),
            "/srv/uploads/m1.mp4",
            SourceInfo {
                width: 1920,
                height: 1080,
                duration: 60.0,
                has_audio: true,
                codec: "h264".to_string(),
                size: 1_000_000,
                fps: 30.0,
                keyframe_interval: None,
            },
            vec!["480p".to_string(), "720p".to_string()],
            None,
        )
    }

    fn task_for(profile: &str, required: bool) -> EncodeTask {
        EncodeTask::new(
            MediaId::from_string("m1"),
            profile,
            None,
            QueueClass::Long,
            PriorityTier::Normal,
            required,
        )
    }

    fn done(profile: &str, required: bool) -> EncodeTask {
        task_for(profile, required)
            .start(WorkerId::from_string("w1"))
            .complete(format!("/out/{profile}.mp4"))
    }

    fn failed(profile: &str, required: bool) -> EncodeTask {
        let mut t = task_for(profile, required);
        for _ in 0..t.max_attempts {
            t = t
                .start(WorkerId::from_string("w1"))
                .fail(TaskError::engine("boom"), None);
        }
        t
    }

    #[test]
    fn test_all_required_success_is_success() {
        let tasks = vec![done("480p", true), done("720p", true)];
        assert_eq!(set().derive_status(&tasks), SetStatus::Success);
    }

    #[test]
    fn test_required_failure_is_fail() {
        let tasks = vec![done("480p", true), failed("720p", true)];
        assert_eq!(set().derive_status(&tasks), SetStatus::Fail);
    }

    #[test]
    fn test_optional_failure_is_partial_success() {
        let tasks = vec![done("480p", true), done("720p", true), failed("1080p-av1", false)];
        let status = set().derive_status(&tasks);
        assert_eq!(status, SetStatus::PartialSuccess);
        assert!(status.is_ready());
    }

    #[test]
    fn test_optional_still_running_holds_the_set_open() {
        let tasks = vec![
            done("480p", true),
            done("720p", true),
            task_for("1080p-av1", false).start(WorkerId::from_string("w1")),
        ];
        // Not terminal until the optional variant lands, so it is never
        // dropped from the manifest
        assert_eq!(set().derive_status(&tasks), SetStatus::Running);
    }

    #[test]
    fn test_in_flight_is_running() {
        let tasks = vec![
            done("480p", true),
            task_for("720p", true).start(WorkerId::from_string("w1")),
        ];
        assert_eq!(set().derive_status(&tasks), SetStatus::Running);
    }

    #[test]
    fn test_untouched_is_pending() {
        let tasks = vec![task_for("480p", true), task_for("720p", true)];
        assert_eq!(set().derive_status(&tasks), SetStatus::Pending);
    }

    #[test]
    fn test_set_level_failure_wins() {
        let tasks = vec![done("480p", true), done("720p", true)];
        let s = set().fail(TaskError::assembly("no variants"));
        assert_eq!(s.derive_status(&tasks), SetStatus::Fail);
    }

    #[test]
    fn test_no_tasks_with_input_error_is_fail() {
        let s = set().fail(TaskError::input("corrupt"));
        assert_eq!(s.derive_status(&[]), SetStatus::Fail);
    }

    #[test]
    fn test_cancelled_wins_over_everything() {
        let tasks = vec![done("480p", true)];
        assert_eq!(set().cancel().derive_status(&tasks), SetStatus::Cancelled);
    }

    #[test]
    fn test_progress_is_weighted_by_task_count() {
        let mut half = task_for("480p", true).start(WorkerId::from_string("w1"));
        half.progress = 50;
        let tasks = vec![done("720p", true), half];
        assert_eq!(set().derive_progress(&tasks), 75);
    }
}
