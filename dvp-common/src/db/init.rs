//! Database initialization
//!
//! Opens (creating if needed) the SQLite file and creates the record and
//! checkpoint tables. Every statement is idempotent, so calling this on an
//! existing database is safe.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on another writer's lock before failing
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Name of the table holding one row per (delegate, snapshot date)
pub const VOTING_POWER_TABLE: &str = "delegate_voting_power";

/// Name of the unique index enforcing the (delegate, date) natural key
pub const VOTING_POWER_KEY_INDEX: &str = "idx_delegate_voting_power_key";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Single writer: a small pool is enough. WAL makes each committed write
    // durable without blocking readers; both settings apply to every
    // pooled connection.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_voting_power_table(&pool).await?;
    create_checkpoints_table(&pool).await?;

    Ok(pool)
}

/// Create the imported record table and its natural-key index
pub async fn create_voting_power_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delegate_voting_power (
            delegate_id TEXT NOT NULL,
            date TEXT NOT NULL,
            voting_power TEXT NOT NULL,
            imported_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_delegate_voting_power_key
        ON delegate_voting_power (delegate_id, date)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the per-file checkpoint table
pub async fn create_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_checkpoints (
            file_name TEXT PRIMARY KEY,
            position INTEGER NOT NULL DEFAULT 0,
            total_records INTEGER,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            completion_time TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Serves the "most recent checkpoint with status X" lookup
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_import_checkpoints_status_timestamp
        ON import_checkpoints (status, timestamp)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
