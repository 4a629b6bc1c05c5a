//! Import checkpoint persistence
//!
//! One row per snapshot file in `import_checkpoints`. Every write is an
//! upsert keyed by file name, so re-applying the same update is harmless and
//! the last writer wins.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::ImportResult;
use crate::models::{Checkpoint, CheckpointStatus};
use crate::store::CheckpointStore;
use crate::utils::retry_on_lock;

/// SQLite-backed checkpoint store
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }
}

/// Fixed-width UTC timestamps sort lexicographically in time order
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> ImportResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            dvp_common::Error::Internal(format!("Failed to parse {}: {}", column, e)).into()
        })
}

fn checkpoint_from_row(row: &SqliteRow) -> ImportResult<Checkpoint> {
    let status: String = row.get("status");
    let status = status
        .parse::<CheckpointStatus>()
        .map_err(dvp_common::Error::Internal)?;

    let timestamp: String = row.get("timestamp");
    let completion_time: Option<String> = row.get("completion_time");

    Ok(Checkpoint {
        file_name: row.get("file_name"),
        position: row.get::<i64, _>("position") as u64,
        total_records: row.get::<Option<i64>, _>("total_records").map(|n| n as u64),
        status,
        timestamp: parse_timestamp("timestamp", &timestamp)?,
        completion_time: completion_time
            .map(|s| parse_timestamp("completion_time", &s))
            .transpose()?,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get_checkpoint(&self, file_name: &str) -> ImportResult<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT file_name, position, total_records, status, timestamp, completion_time
            FROM import_checkpoints
            WHERE file_name = ?
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn latest_with_status(
        &self,
        status: CheckpointStatus,
    ) -> ImportResult<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT file_name, position, total_records, status, timestamp, completion_time
            FROM import_checkpoints
            WHERE status = ?
            ORDER BY timestamp DESC, file_name DESC
            LIMIT 1
            "#,
        )
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn upsert_progress(
        &self,
        file_name: &str,
        position: u64,
        total_records: Option<u64>,
    ) -> ImportResult<()> {
        let timestamp = now_timestamp();
        let pool = &self.pool;
        let timestamp = timestamp.as_str();

        retry_on_lock("upsert_progress", self.max_lock_wait_ms, move || async move {
            sqlx::query(
                r#"
                INSERT INTO import_checkpoints (file_name, position, total_records, status, timestamp)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(file_name) DO UPDATE SET
                    position = excluded.position,
                    total_records = COALESCE(excluded.total_records, import_checkpoints.total_records),
                    status = excluded.status,
                    timestamp = excluded.timestamp
                "#,
            )
            .bind(file_name)
            .bind(position as i64)
            .bind(total_records.map(|n| n as i64))
            .bind(CheckpointStatus::InProgress.as_str())
            .bind(timestamp)
            .execute(pool)
            .await?;
            Ok::<(), dvp_common::Error>(())
        })
        .await?;

        Ok(())
    }

    async fn mark_complete(&self, file_name: &str) -> ImportResult<()> {
        let timestamp = now_timestamp();
        let pool = &self.pool;
        let timestamp = timestamp.as_str();

        retry_on_lock("mark_complete", self.max_lock_wait_ms, move || async move {
            sqlx::query(
                r#"
                INSERT INTO import_checkpoints (file_name, position, status, timestamp, completion_time)
                VALUES (?, 0, ?, ?, ?)
                ON CONFLICT(file_name) DO UPDATE SET
                    status = excluded.status,
                    timestamp = excluded.timestamp,
                    completion_time = excluded.completion_time
                "#,
            )
            .bind(file_name)
            .bind(CheckpointStatus::Completed.as_str())
            .bind(timestamp)
            .bind(timestamp)
            .execute(pool)
            .await?;
            Ok::<(), dvp_common::Error>(())
        })
        .await?;

        Ok(())
    }
}
