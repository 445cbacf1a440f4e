//! Query operations for tasks, sets and the transition log.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use vodmill_models::{
    EncodeTask, FailureKind, MediaEncodingSet, MediaId, PriorityTier, QueueClass, TaskError,
    TaskId, TaskKey, TaskStatus, WorkerId,
};

use crate::error::{StateError, StateResult};

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn task_error_from_columns(kind: Option<String>, message: Option<String>) -> Option<TaskError> {
    let kind: FailureKind = kind?.parse().ok()?;
    Some(TaskError::new(kind, message.unwrap_or_default()))
}

fn map_set_row(row: &Row<'_>) -> rusqlite::Result<(MediaEncodingSet, Option<String>, Option<String>)> {
    let source_json: String = row.get(2)?;
    let profiles_json: String = row.get(3)?;
    let chunk_plan_json: Option<String> = row.get(4)?;
    let artifacts_json: Option<String> = row.get(8)?;

    Ok((
        MediaEncodingSet {
            media_id: MediaId::from_string(row.get::<_, String>(0)?),
            source_location: row.get(1)?,
            source: serde_json::from_str(&source_json).unwrap_or_default(),
            profiles: serde_json::from_str(&profiles_json).unwrap_or_default(),
            chunk_plan: chunk_plan_json.and_then(|j| serde_json::from_str(&j).ok()),
            failure: None,
            cancelled: row.get::<_, i64>(7)? != 0,
            artifacts: artifacts_json.and_then(|j| serde_json::from_str(&j).ok()),
            created_at: parse_ts(&row.get::<_, String>(9)?),
            updated_at: parse_ts(&row.get::<_, String>(10)?),
        },
        row.get(5)?,
        row.get(6)?,
    ))
}

const SET_COLUMNS: &str = "media_id, source_location, source_json, profiles_json, \
     chunk_plan_json, failure_kind, failure_message, cancelled, artifacts_json, \
     created_at, updated_at";

/// Insert or replace an encoding-set record.
pub fn upsert_set(conn: &Connection, record: &MediaEncodingSet) -> StateResult<()> {
    conn.execute(
        "INSERT INTO encode_sets (media_id, source_location, source_json, profiles_json,
             chunk_plan_json, failure_kind, failure_message, cancelled, artifacts_json,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(media_id) DO UPDATE SET
             source_location = excluded.source_location,
             source_json = excluded.source_json,
             profiles_json = excluded.profiles_json,
             chunk_plan_json = excluded.chunk_plan_json,
             failure_kind = excluded.failure_kind,
             failure_message = excluded.failure_message,
             cancelled = excluded.cancelled,
             artifacts_json = excluded.artifacts_json,
             updated_at = excluded.updated_at",
        params![
            record.media_id.as_str(),
            record.source_location,
            serde_json::to_string(&record.source)?,
            serde_json::to_string(&record.profiles)?,
            record
                .chunk_plan
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            record.failure.as_ref().map(|e| e.kind.as_str()),
            record.failure.as_ref().map(|e| e.message.as_str()),
            record.cancelled as i64,
            record
                .artifacts
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Load a set record by media id.
pub fn get_set(conn: &Connection, media_id: &MediaId) -> StateResult<MediaEncodingSet> {
    let (mut record, kind, message) = conn
        .query_row(
            &format!("SELECT {SET_COLUMNS} FROM encode_sets WHERE media_id = ?"),
            [media_id.as_str()],
            map_set_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StateError::not_found("encode_set"),
            other => StateError::Database(other),
        })?;
    record.failure = task_error_from_columns(kind, message);
    Ok(record)
}

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<EncodeTask> {
    let error_kind: Option<String> = row.get(14)?;
    let error_message: Option<String> = row.get(15)?;

    Ok(EncodeTask {
        id: TaskId::from_string(row.get::<_, String>(0)?),
        media_id: MediaId::from_string(row.get::<_, String>(1)?),
        profile: row.get(2)?,
        chunk_index: row.get::<_, Option<i64>>(3)?.map(|i| i as u32),
        class: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or(QueueClass::Long),
        tier: PriorityTier::from_rank(row.get::<_, i64>(5)? as u8),
        status: row
            .get::<_, String>(6)?
            .parse()
            .unwrap_or(TaskStatus::Pending),
        attempts: row.get::<_, i64>(7)? as u32,
        max_attempts: row.get::<_, i64>(8)? as u32,
        worker_id: row
            .get::<_, Option<String>>(9)?
            .map(WorkerId::from_string),
        required: row.get::<_, i64>(10)? != 0,
        not_before: parse_opt_ts(row.get(11)?),
        progress: row.get::<_, i64>(12)?.clamp(0, 100) as u8,
        output_path: row.get(13)?,
        error: task_error_from_columns(error_kind, error_message),
        enqueued_at: parse_ts(&row.get::<_, String>(17)?),
        started_at: parse_opt_ts(row.get(18)?),
        finished_at: parse_opt_ts(row.get(19)?),
    })
}

const TASK_COLUMNS: &str = "id, media_id, profile, chunk_index, class, tier, status, \
     attempts, max_attempts, worker_id, required, not_before, progress, output_path, \
     error_kind, error_message, lease_expires_at, enqueued_at, started_at, finished_at";

/// Insert or replace a task row, carrying the current lease expiry so
/// in-flight work survives a restart as a documented requeue.
pub fn upsert_task(
    conn: &Connection,
    task: &EncodeTask,
    lease_expires_at: Option<DateTime<Utc>>,
) -> StateResult<()> {
    conn.execute(
        "INSERT INTO encode_tasks (id, media_id, profile, chunk_index, class, tier, status,
             attempts, max_attempts, worker_id, required, not_before, progress, output_path,
             error_kind, error_message, lease_expires_at, enqueued_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             attempts = excluded.attempts,
             worker_id = excluded.worker_id,
             not_before = excluded.not_before,
             progress = excluded.progress,
             output_path = excluded.output_path,
             error_kind = excluded.error_kind,
             error_message = excluded.error_message,
             lease_expires_at = excluded.lease_expires_at,
             started_at = excluded.started_at,
             finished_at = excluded.finished_at",
        params![
            task.id.as_str(),
            task.media_id.as_str(),
            task.profile,
            task.chunk_index.map(|i| i as i64),
            task.class.as_str(),
            task.tier as i64,
            task.status.as_str(),
            task.attempts as i64,
            task.max_attempts as i64,
            task.worker_id.as_ref().map(|w| w.as_str()),
            task.required as i64,
            task.not_before.map(|t| t.to_rfc3339()),
            task.progress as i64,
            task.output_path,
            task.error.as_ref().map(|e| e.kind.as_str()),
            task.error.as_ref().map(|e| e.message.as_str()),
            lease_expires_at.map(|t| t.to_rfc3339()),
            task.enqueued_at.to_rfc3339(),
            task.started_at.map(|t| t.to_rfc3339()),
            task.finished_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

/// Look up a task by its idempotency key.
pub fn get_task_by_key(conn: &Connection, key: &TaskKey) -> StateResult<Option<EncodeTask>> {
    let result = conn.query_row(
        &format!(
            "SELECT {TASK_COLUMNS} FROM encode_tasks
             WHERE media_id = ?1 AND profile = ?2 AND IFNULL(chunk_index, -1) = ?3"
        ),
        params![
            key.media_id.as_str(),
            key.profile,
            key.chunk_index.map(|i| i as i64).unwrap_or(-1),
        ],
        map_task_row,
    );
    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::Database(e)),
    }
}

/// All tasks belonging to one media item, in enqueue order.
pub fn tasks_for_media(conn: &Connection, media_id: &MediaId) -> StateResult<Vec<EncodeTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM encode_tasks WHERE media_id = ? ORDER BY enqueued_at, profile"
    ))?;
    let tasks = stmt
        .query_map([media_id.as_str()], map_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// All tasks in a given status, oldest first. Used for crash recovery.
pub fn tasks_with_status(conn: &Connection, status: TaskStatus) -> StateResult<Vec<EncodeTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM encode_tasks WHERE status = ? ORDER BY enqueued_at"
    ))?;
    let tasks = stmt
        .query_map([status.as_str()], map_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Append one transition to the log. The log is append-only; aggregate
/// status is always computed from it and the task rows, never stored.
pub fn record_transition(
    conn: &Connection,
    task: &EncodeTask,
    detail: Option<&str>,
) -> StateResult<()> {
    conn.execute(
        "INSERT INTO task_transitions (task_id, media_id, status, progress, detail, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task.id.as_str(),
            task.media_id.as_str(),
            task.status.as_str(),
            task.progress as i64,
            detail,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// A row from the transition log.
#[derive(Debug, Clone)]
pub struct Transition {
    pub seq: i64,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// The full transition history of one task, in order.
pub fn transitions_for_task(conn: &Connection, task_id: &TaskId) -> StateResult<Vec<Transition>> {
    let mut stmt = conn.prepare(
        "SELECT seq, task_id, status, progress, detail, at
         FROM task_transitions WHERE task_id = ? ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([task_id.as_str()], |row| {
            Ok(Transition {
                seq: row.get(0)?,
                task_id: TaskId::from_string(row.get::<_, String>(1)?),
                status: row
                    .get::<_, String>(2)?
                    .parse()
                    .unwrap_or(TaskStatus::Pending),
                progress: row.get::<_, i64>(3)?.clamp(0, 100) as u8,
                detail: row.get(4)?,
                at: parse_ts(&row.get::<_, String>(5)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a set and its tasks (cascade). Used when archiving terminal sets.
pub fn delete_set(conn: &Connection, media_id: &MediaId) -> StateResult<()> {
    conn.execute(
        "DELETE FROM task_transitions WHERE media_id = ?",
        [media_id.as_str()],
    )?;
    conn.execute(
        "DELETE FROM encode_sets WHERE media_id = ?",
        [media_id.as_str()],
    )?;
    Ok(())
}
