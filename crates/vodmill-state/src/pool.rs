//! SQLite connection pooling.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::StateResult;
use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initialize a pool against a database file, creating it if needed and
/// running pending migrations.
pub fn init_pool(db_path: &str) -> StateResult<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
    });

    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    migrations::run_migrations(&conn)?;

    Ok(pool)
}

/// Initialize an in-memory pool for testing. A single connection keeps the
/// in-memory database alive for the pool's lifetime.
pub fn init_memory_pool() -> StateResult<DbPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    migrations::run_migrations(&conn)?;

    Ok(pool)
}
