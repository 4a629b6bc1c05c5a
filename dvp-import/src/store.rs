//! Store seams used by the import engine
//!
//! The engine never touches SQLite directly. It is handed one
//! [`RecordStore`] (the destination) and one [`CheckpointStore`] (progress
//! bookkeeping), opened once at startup and shared for the whole run.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ImportResult;
use crate::models::{Checkpoint, CheckpointStatus, UpsertSummary, VotingPowerRecord};

/// Destination for imported records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Make sure the unique (delegate, date) index exists
    async fn ensure_indexes(&self) -> ImportResult<()>;

    /// Number of records stored for one snapshot date
    async fn count_for_date(&self, date: NaiveDate) -> ImportResult<u64>;

    /// Insert or replace every record, keyed by (delegate, date)
    ///
    /// Unordered: a rejected record does not prevent the others from being
    /// written. Rejections are reported in the summary, not as an `Err`;
    /// `Err` means the batch as a whole could not be attempted.
    async fn upsert_many(&self, records: &[VotingPowerRecord]) -> ImportResult<UpsertSummary>;
}

/// Durable per-file progress
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self, file_name: &str) -> ImportResult<Option<Checkpoint>>;

    /// Most recently updated checkpoint in `status`
    async fn latest_with_status(&self, status: CheckpointStatus)
        -> ImportResult<Option<Checkpoint>>;

    /// Record progress; status becomes in_progress
    ///
    /// `total_records` of `None` keeps whatever total is already cached.
    async fn upsert_progress(
        &self,
        file_name: &str,
        position: u64,
        total_records: Option<u64>,
    ) -> ImportResult<()>;

    /// Status becomes completed, stamping both timestamps
    async fn mark_complete(&self, file_name: &str) -> ImportResult<()>;

    /// Latest in_progress checkpoint, else latest completed one
    ///
    /// `None` means nothing has been imported yet.
    async fn get_last_checkpoint(&self) -> ImportResult<Option<Checkpoint>> {
        if let Some(checkpoint) = self.latest_with_status(CheckpointStatus::InProgress).await? {
            return Ok(Some(checkpoint));
        }
        self.latest_with_status(CheckpointStatus::Completed).await
    }
}
