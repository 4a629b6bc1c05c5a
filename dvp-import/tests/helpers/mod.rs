//! Test Helper Utilities
//!
//! Shared fixtures for dvp-import integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use dvp_common::db::init_database;
use dvp_import::db::{SqliteCheckpointStore, SqliteRecordStore};
use dvp_import::models::{Checkpoint, CheckpointStatus, UpsertSummary, VotingPowerRecord};
use dvp_import::source::parse_snapshot_date;
use dvp_import::{CheckpointStore, ImportOrchestrator, ImportResult, ImportSettings, RecordStore};

pub const SNAPSHOT_HEADER: &str = "delegate,voting_power,th_vp,ch_member_r2,ch_vp_r2";

/// Temporary snapshot directory plus a fresh database
///
/// The TempDir must be kept alive for the duration of the test.
pub struct TestEnv {
    _temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub pool: SqlitePool,
    pub records: Arc<SqliteRecordStore>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("snapshots");
        std::fs::create_dir_all(&data_dir).unwrap();

        let pool = init_database(&temp_dir.path().join("dvp.db")).await.unwrap();

        Self {
            records: Arc::new(SqliteRecordStore::new(pool.clone(), 5000)),
            checkpoints: Arc::new(SqliteCheckpointStore::new(pool.clone(), 5000)),
            _temp_dir: temp_dir,
            data_dir,
            pool,
        }
    }

    /// Orchestrator over the SQLite stores
    pub fn orchestrator(&self, settings: ImportSettings) -> ImportOrchestrator {
        ImportOrchestrator::new(self.records.clone(), self.checkpoints.clone(), settings)
    }

    /// Write `rows` data rows under the standard header
    pub fn write_snapshot(&self, file_name: &str, rows: usize) -> PathBuf {
        let lines: Vec<String> = (0..rows).map(snapshot_row).collect();
        self.write_raw(file_name, SNAPSHOT_HEADER, &lines)
    }

    /// Write a snapshot with an explicit header and rows
    pub fn write_raw(&self, file_name: &str, header: &str, rows: &[String]) -> PathBuf {
        let path = self.data_dir.join(file_name);
        let mut content = String::from(header);
        content.push('\n');
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub async fn stored(&self, date: &str) -> u64 {
        self.records.count_for_date(parse_date(date)).await.unwrap()
    }
}

/// One mappable row: delegate `0xd{i}` with three metrics
pub fn snapshot_row(i: usize) -> String {
    format!("0xd{},{}.5,{},1,{}", i, i, i * 2, i * 3)
}

pub fn parse_date(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
}

pub fn small_settings() -> ImportSettings {
    ImportSettings::new(4, 3).unwrap()
}

/// Record store that rejects chosen delegates and writes the rest
pub struct FailingRecordStore {
    inner: Arc<dyn RecordStore>,
    rejected: HashSet<String>,
}

impl FailingRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>, rejected: &[&str]) -> Self {
        Self {
            inner,
            rejected: rejected.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn ensure_indexes(&self) -> ImportResult<()> {
        self.inner.ensure_indexes().await
    }

    async fn count_for_date(&self, date: NaiveDate) -> ImportResult<u64> {
        self.inner.count_for_date(date).await
    }

    async fn upsert_many(&self, records: &[VotingPowerRecord]) -> ImportResult<UpsertSummary> {
        let (rejected, accepted): (Vec<_>, Vec<_>) = records
            .iter()
            .cloned()
            .partition(|r| self.rejected.contains(&r.delegate_id));

        let mut summary = self.inner.upsert_many(&accepted).await?;
        for record in rejected {
            summary.record_failure(format!("write rejected for {}", record.delegate_id));
        }
        Ok(summary)
    }
}

/// Record store that remembers the size of every batch it is handed
pub struct RecordingRecordStore {
    inner: Arc<dyn RecordStore>,
    batches: Mutex<Vec<usize>>,
}

impl RecordingRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingRecordStore {
    async fn ensure_indexes(&self) -> ImportResult<()> {
        self.inner.ensure_indexes().await
    }

    async fn count_for_date(&self, date: NaiveDate) -> ImportResult<u64> {
        self.inner.count_for_date(date).await
    }

    async fn upsert_many(&self, records: &[VotingPowerRecord]) -> ImportResult<UpsertSummary> {
        self.batches.lock().unwrap().push(records.len());
        self.inner.upsert_many(records).await
    }
}

/// A progress write that claimed more than the store held at the time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overclaim {
    pub file_name: String,
    pub position: u64,
    pub stored: u64,
}

/// Checkpoint store that compares every progress write with the stored count
pub struct AuditingCheckpointStore {
    inner: Arc<dyn CheckpointStore>,
    records: Arc<dyn RecordStore>,
    writes: Mutex<Vec<u64>>,
    overclaims: Mutex<Vec<Overclaim>>,
}

impl AuditingCheckpointStore {
    pub fn new(inner: Arc<dyn CheckpointStore>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            records,
            writes: Mutex::new(Vec::new()),
            overclaims: Mutex::new(Vec::new()),
        }
    }

    /// Positions passed to `upsert_progress`, in call order
    pub fn progress_writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }

    pub fn overclaims(&self) -> Vec<Overclaim> {
        self.overclaims.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for AuditingCheckpointStore {
    async fn get_checkpoint(&self, file_name: &str) -> ImportResult<Option<Checkpoint>> {
        self.inner.get_checkpoint(file_name).await
    }

    async fn latest_with_status(
        &self,
        status: CheckpointStatus,
    ) -> ImportResult<Option<Checkpoint>> {
        self.inner.latest_with_status(status).await
    }

    async fn upsert_progress(
        &self,
        file_name: &str,
        position: u64,
        total_records: Option<u64>,
    ) -> ImportResult<()> {
        let stored = self
            .records
            .count_for_date(parse_snapshot_date(file_name)?)
            .await?;

        self.writes.lock().unwrap().push(position);
        if position > stored {
            self.overclaims.lock().unwrap().push(Overclaim {
                file_name: file_name.to_string(),
                position,
                stored,
            });
        }

        self.inner
            .upsert_progress(file_name, position, total_records)
            .await
    }

    async fn mark_complete(&self, file_name: &str) -> ImportResult<()> {
        self.inner.mark_complete(file_name).await
    }
}
