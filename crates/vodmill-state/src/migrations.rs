//! Embedded schema migrations, executed in order.

use rusqlite::Connection;

use crate::error::{StateError, StateResult};

struct Migration {
    version: usize,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: r#"
CREATE TABLE IF NOT EXISTS encode_sets (
    media_id        TEXT PRIMARY KEY,
    source_location TEXT NOT NULL,
    source_json     TEXT NOT NULL,
    profiles_json   TEXT NOT NULL,
    chunk_plan_json TEXT,
    failure_kind    TEXT,
    failure_message TEXT,
    cancelled       INTEGER NOT NULL DEFAULT 0,
    artifacts_json  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS encode_tasks (
    id              TEXT PRIMARY KEY,
    media_id        TEXT NOT NULL REFERENCES encode_sets(media_id) ON DELETE CASCADE,
    profile         TEXT NOT NULL,
    chunk_index     INTEGER,
    class           TEXT NOT NULL,
    tier            INTEGER NOT NULL,
    status          TEXT NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL DEFAULT 3,
    worker_id       TEXT,
    required        INTEGER NOT NULL DEFAULT 1,
    not_before      TEXT,
    progress        INTEGER NOT NULL DEFAULT 0,
    output_path     TEXT,
    error_kind      TEXT,
    error_message   TEXT,
    lease_expires_at TEXT,
    enqueued_at     TEXT NOT NULL,
    started_at      TEXT,
    finished_at     TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_identity
    ON encode_tasks(media_id, profile, IFNULL(chunk_index, -1));
CREATE INDEX IF NOT EXISTS idx_tasks_status ON encode_tasks(status);

CREATE TABLE IF NOT EXISTS task_transitions (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id   TEXT NOT NULL,
    media_id  TEXT NOT NULL,
    status    TEXT NOT NULL,
    progress  INTEGER NOT NULL DEFAULT 0,
    detail    TEXT,
    at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transitions_task ON task_transitions(task_id);
CREATE INDEX IF NOT EXISTS idx_transitions_media ON task_transitions(media_id);
"#,
}];

fn init_migrations_table(conn: &Connection) -> StateResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    Ok(())
}

fn current_version(conn: &Connection) -> StateResult<usize> {
    let version = conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
        row.get::<_, Option<usize>>(0)
    })?;
    Ok(version.unwrap_or(0))
}

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StateResult<()> {
    init_migrations_table(conn)?;
    let current = current_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .map_err(|e| StateError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?, ?)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tracing::info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), MIGRATIONS.len());
    }
}
