//! Imported record persistence
//!
//! One row per (delegate, date) in `delegate_voting_power`; the metrics map
//! is stored as a JSON document in `voting_power`.

use async_trait::async_trait;
use chrono::NaiveDate;
use dvp_common::db::init::{VOTING_POWER_KEY_INDEX, VOTING_POWER_TABLE};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;

use crate::error::{ImportError, ImportResult};
use crate::models::{UpsertSummary, VotingPowerRecord};
use crate::store::RecordStore;
use crate::utils::retry_on_lock;

/// SQLite-backed destination store
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// All records for one snapshot date, ordered by delegate
    pub async fn fetch_for_date(&self, date: NaiveDate) -> ImportResult<Vec<VotingPowerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT delegate_id, voting_power
            FROM delegate_voting_power
            WHERE date = ?
            ORDER BY delegate_id
            "#,
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.get("voting_power");
                let voting_power: BTreeMap<String, f64> = serde_json::from_str(&payload)?;
                Ok(VotingPowerRecord {
                    delegate_id: row.get("delegate_id"),
                    date,
                    voting_power,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn ensure_indexes(&self) -> ImportResult<()> {
        let unique: Option<i64> = sqlx::query_scalar(&format!(
            r#"SELECT "unique" FROM pragma_index_list('{}') WHERE name = ?"#,
            VOTING_POWER_TABLE
        ))
        .bind(VOTING_POWER_KEY_INDEX)
        .fetch_optional(&self.pool)
        .await?;

        match unique {
            Some(1) => {
                tracing::debug!("Unique index {} present", VOTING_POWER_KEY_INDEX);
                return Ok(());
            }
            Some(_) => {
                tracing::warn!(
                    "Index {} is not unique, recreating it",
                    VOTING_POWER_KEY_INDEX
                );
                sqlx::query(&format!("DROP INDEX {}", VOTING_POWER_KEY_INDEX))
                    .execute(&self.pool)
                    .await?;
            }
            None => {}
        }

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (delegate_id, date)",
            VOTING_POWER_KEY_INDEX, VOTING_POWER_TABLE
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!("Created unique index on delegate_id and date");
        Ok(())
    }

    async fn count_for_date(&self, date: NaiveDate) -> ImportResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delegate_voting_power WHERE date = ?")
                .bind(date.to_string())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn upsert_many(&self, records: &[VotingPowerRecord]) -> ImportResult<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        // Prepare all payloads BEFORE acquiring a connection
        let prepared = records
            .iter()
            .map(|record| {
                Ok((
                    record.delegate_id.clone(),
                    record.date.to_string(),
                    serde_json::to_string(&record.voting_power)?,
                ))
            })
            .collect::<Result<Vec<_>, ImportError>>()?;
        let imported_at = chrono::Utc::now().to_rfc3339();

        let pool = &self.pool;
        let prepared = &prepared;
        let imported_at = imported_at.as_str();

        // Replaying the whole batch after a lock error is safe: every
        // statement is an upsert on the natural key
        let summary = retry_on_lock("upsert_many", self.max_lock_wait_ms, move || async move {
            let mut tx = pool.begin().await?;
            let mut summary = UpsertSummary::default();

            for (delegate_id, date, payload) in prepared {
                match upsert_one(&mut tx, delegate_id, date, payload, imported_at).await {
                    Ok(true) => summary.inserted += 1,
                    Ok(false) => summary.modified += 1,
                    Err(e) => {
                        let e = dvp_common::Error::Database(e);
                        if e.is_lock_contention() {
                            return Err(e);
                        }
                        tracing::warn!(delegate_id = %delegate_id, date = %date, "Upsert rejected: {}", e);
                        summary.record_failure(e);
                    }
                }
            }

            tx.commit().await?;
            Ok::<_, dvp_common::Error>(summary)
        })
        .await?;

        Ok(summary)
    }
}

/// Upsert one record, returning true if it was newly inserted
async fn upsert_one(
    tx: &mut Transaction<'_, Sqlite>,
    delegate_id: &str,
    date: &str,
    payload: &str,
    imported_at: &str,
) -> Result<bool, sqlx::Error> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM delegate_voting_power WHERE delegate_id = ? AND date = ?",
    )
    .bind(delegate_id)
    .bind(date)
    .fetch_optional(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO delegate_voting_power (delegate_id, date, voting_power, imported_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(delegate_id, date) DO UPDATE SET
            voting_power = excluded.voting_power,
            imported_at = excluded.imported_at
        "#,
    )
    .bind(delegate_id)
    .bind(date)
    .bind(payload)
    .bind(imported_at)
    .execute(&mut **tx)
    .await?;

    Ok(existing.is_none())
}
