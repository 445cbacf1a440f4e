//! The state tracker: append-then-compute bookkeeping over the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use vodmill_models::{
    EncodeTask, MediaEncodingSet, MediaId, SetArtifacts, SetStatus, TaskError, TaskId,
};

use crate::error::StateResult;
use crate::pool::DbPool;
use crate::queries;

/// Terminal-state notification consumed by the external metadata layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum SetEvent {
    /// The media item is ready: manifest, variant list and sprite exist.
    Ready {
        media_id: MediaId,
        status: SetStatus,
        artifacts: SetArtifacts,
    },
    /// The set failed terminally.
    Failed {
        media_id: MediaId,
        error: TaskError,
    },
}

/// Current status plus computed progress for one encoding set.
#[derive(Debug, Clone, Serialize)]
pub struct SetSnapshot {
    pub media_id: MediaId,
    pub status: SetStatus,
    /// Percent complete, weighted by task count
    pub progress: u8,
    pub tasks: Vec<EncodeTask>,
    pub set: MediaEncodingSet,
}

/// Store-level counters for operator introspection.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub sets: u64,
    pub tasks_pending: u64,
    pub tasks_running: u64,
    pub tasks_terminal: u64,
}

/// Durable record of task lifecycles and aggregate set state.
///
/// Every write appends a transition first; status is always derived from
/// task rows afterwards, never stored, so the aggregate cannot drift.
pub struct StateTracker {
    pool: DbPool,
    events: broadcast::Sender<SetEvent>,
}

impl StateTracker {
    pub fn new(pool: DbPool) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { pool, events }
    }

    /// Subscribe to terminal-state events.
    pub fn subscribe(&self) -> broadcast::Receiver<SetEvent> {
        self.events.subscribe()
    }

    /// Persist a new or updated encoding set.
    pub fn save_set(&self, set: &MediaEncodingSet) -> StateResult<()> {
        let conn = self.pool.get()?;
        queries::upsert_set(&conn, set)
    }

    /// Load an encoding set.
    pub fn load_set(&self, media_id: &MediaId) -> StateResult<MediaEncodingSet> {
        let conn = self.pool.get()?;
        queries::get_set(&conn, media_id)
    }

    /// Load all tasks for a media item.
    pub fn load_tasks(&self, media_id: &MediaId) -> StateResult<Vec<EncodeTask>> {
        let conn = self.pool.get()?;
        queries::tasks_for_media(&conn, media_id)
    }

    /// Record a task state, appending to the transition log.
    ///
    /// `lease_expires_at` carries the active lease for running tasks so a
    /// restarted orchestrator can requeue abandoned work.
    pub fn record_task(
        &self,
        task: &EncodeTask,
        lease_expires_at: Option<DateTime<Utc>>,
        detail: Option<&str>,
    ) -> StateResult<()> {
        let conn = self.pool.get()?;
        queries::record_transition(&conn, task, detail)?;
        queries::upsert_task(&conn, task, lease_expires_at)?;
        debug!(
            task_id = %task.id,
            media_id = %task.media_id,
            status = task.status.as_str(),
            attempts = task.attempts,
            "Recorded task transition"
        );
        Ok(())
    }

    /// Record a progress update for a running task without touching its
    /// lifecycle columns.
    pub fn record_progress(&self, task: &EncodeTask) -> StateResult<()> {
        let conn = self.pool.get()?;
        queries::record_transition(&conn, task, None)?;
        conn.execute(
            "UPDATE encode_tasks SET progress = ?1 WHERE id = ?2",
            rusqlite::params![task.progress as i64, task.id.as_str()],
        )?;
        Ok(())
    }

    /// Refresh the persisted lease expiry for a running task. Renewals
    /// are not transitions, so the log is not touched.
    pub fn record_lease(
        &self,
        task_id: &TaskId,
        lease_expires_at: DateTime<Utc>,
    ) -> StateResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE encode_tasks SET lease_expires_at = ?1 WHERE id = ?2",
            rusqlite::params![lease_expires_at.to_rfc3339(), task_id.as_str()],
        )?;
        Ok(())
    }

    /// The transition history of one task.
    pub fn transitions(&self, task_id: &TaskId) -> StateResult<Vec<queries::Transition>> {
        let conn = self.pool.get()?;
        queries::transitions_for_task(&conn, task_id)
    }

    /// Current status and weighted progress for a media item.
    pub fn snapshot(&self, media_id: &MediaId) -> StateResult<SetSnapshot> {
        let conn = self.pool.get()?;
        let set = queries::get_set(&conn, media_id)?;
        let tasks = queries::tasks_for_media(&conn, media_id)?;
        Ok(SetSnapshot {
            media_id: media_id.clone(),
            status: set.derive_status(&tasks),
            progress: set.derive_progress(&tasks),
            tasks,
            set,
        })
    }

    /// Publish the set's terminal event if it has reached one.
    ///
    /// Ready fires only once artifacts exist; a terminal-but-unassembled
    /// set stays silent until the assembler finishes or fails it.
    pub fn notify_if_terminal(&self, media_id: &MediaId) -> StateResult<Option<SetStatus>> {
        let snapshot = self.snapshot(media_id)?;
        let status = snapshot.status;

        match status {
            SetStatus::Success | SetStatus::PartialSuccess => {
                if let Some(artifacts) = snapshot.set.artifacts.clone() {
                    info!(media_id = %media_id, status = status.as_str(), "Encoding set ready");
                    let _ = self.events.send(SetEvent::Ready {
                        media_id: media_id.clone(),
                        status,
                        artifacts,
                    });
                    return Ok(Some(status));
                }
                Ok(None)
            }
            SetStatus::Fail => {
                let error = snapshot
                    .set
                    .failure
                    .clone()
                    .or_else(|| {
                        snapshot
                            .tasks
                            .iter()
                            .filter(|t| t.required)
                            .find_map(|t| t.error.clone())
                    })
                    .unwrap_or_else(|| TaskError::engine("encoding failed"));
                info!(media_id = %media_id, error = %error, "Encoding set failed");
                let _ = self.events.send(SetEvent::Failed {
                    media_id: media_id.clone(),
                    error,
                });
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }

    /// Tasks left `running` in the store, for startup recovery.
    pub fn running_tasks(&self) -> StateResult<Vec<EncodeTask>> {
        let conn = self.pool.get()?;
        queries::tasks_with_status(&conn, vodmill_models::TaskStatus::Running)
    }

    /// Tasks pending in the store, for startup recovery.
    pub fn pending_tasks(&self) -> StateResult<Vec<EncodeTask>> {
        let conn = self.pool.get()?;
        queries::tasks_with_status(&conn, vodmill_models::TaskStatus::Pending)
    }

    /// Look up a task by idempotency key.
    pub fn task_by_key(
        &self,
        key: &vodmill_models::TaskKey,
    ) -> StateResult<Option<EncodeTask>> {
        let conn = self.pool.get()?;
        queries::get_task_by_key(&conn, key)
    }

    /// Archive a terminal set, dropping its rows and history.
    pub fn archive_set(&self, media_id: &MediaId) -> StateResult<()> {
        let conn = self.pool.get()?;
        queries::delete_set(&conn, media_id)
    }

    /// Store-level counters.
    pub fn stats(&self) -> StateResult<StoreStats> {
        let conn = self.pool.get()?;
        let sets: u64 =
            conn.query_row("SELECT COUNT(*) FROM encode_sets", [], |r| r.get(0))?;
        let count = |status: &str| -> StateResult<u64> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM encode_tasks WHERE status = ?",
                [status],
                |r| r.get(0),
            )?)
        };
        let terminal: u64 = conn.query_row(
            "SELECT COUNT(*) FROM encode_tasks WHERE status IN ('success', 'fail', 'cancelled')",
            [],
            |r| r.get(0),
        )?;
        Ok(StoreStats {
            sets,
            tasks_pending: count("pending")?,
            tasks_running: count("running")?,
            tasks_terminal: terminal,
        })
    }
}
