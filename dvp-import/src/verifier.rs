//! Checkpoint verification against the destination
//!
//! A checkpoint only claims progress; the number of records actually stored
//! for the file's date is what counts. When the two disagree in the unsafe
//! direction (the claim is ahead of the store) the checkpoint is rewound.

use std::sync::Arc;
use tracing::warn;

use crate::error::ImportResult;
use crate::source::parse_snapshot_date;
use crate::store::{CheckpointStore, RecordStore};

/// Reconciles checkpoints with stored record counts
#[derive(Clone)]
pub struct Verifier {
    records: Arc<dyn RecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Verifier {
    pub fn new(records: Arc<dyn RecordStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            records,
            checkpoints,
        }
    }

    /// Records currently stored for the file's snapshot date
    pub async fn stored_count(&self, file_name: &str) -> ImportResult<u64> {
        let date = parse_snapshot_date(file_name)?;
        self.records.count_for_date(date).await
    }

    /// Position to resume `file_name` from
    ///
    /// Returns the checkpoint's claimed position unless fewer records are
    /// stored than claimed, in which case the checkpoint is rewritten down to
    /// the stored count and that count is returned.
    pub async fn verified_position(&self, file_name: &str) -> ImportResult<u64> {
        let stored = self.stored_count(file_name).await?;
        let checkpoint = self.checkpoints.get_checkpoint(file_name).await?;
        let claimed = checkpoint.as_ref().map_or(0, |c| c.position);

        if stored < claimed {
            warn!(
                file = file_name,
                claimed, stored, "Found inconsistency: checkpoint claims more records than are stored, rewinding"
            );
            let total_records = checkpoint.and_then(|c| c.total_records);
            self.checkpoints
                .upsert_progress(file_name, stored, total_records)
                .await?;
            return Ok(stored);
        }

        Ok(claimed)
    }

    /// True once the store holds at least the checkpoint's recorded total
    pub async fn is_file_complete(&self, file_name: &str) -> ImportResult<bool> {
        let Some(total_records) = self
            .checkpoints
            .get_checkpoint(file_name)
            .await?
            .and_then(|c| c.total_records)
        else {
            return Ok(false);
        };

        let stored = self.stored_count(file_name).await?;
        Ok(stored >= total_records)
    }
}
