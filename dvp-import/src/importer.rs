//! Single-file batch import
//!
//! Drives one snapshot file from its verified start position to the end:
//! read rows from the position, map them, upsert the batch, advance the
//! position by the number of records written, repeat. After the loop the
//! verifier decides whether the file is complete.
//!
//! Checkpoints are written at a fixed raw-row cadence and only after a fresh
//! count confirms the store holds at least the position being claimed.

use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dvp_common::config::{DEFAULT_BATCH_SIZE, DEFAULT_CHECKPOINT_INTERVAL};

use crate::error::{ImportError, ImportResult};
use crate::mapper::map_row;
use crate::models::VotingPowerRecord;
use crate::source::SnapshotFile;
use crate::store::{CheckpointStore, RecordStore};
use crate::verifier::Verifier;

const DEFAULT_BATCH: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BATCH_SIZE) {
    Some(n) => n,
    None => panic!("default batch size is zero"),
};

const DEFAULT_INTERVAL: NonZeroU64 = match NonZeroU64::new(DEFAULT_CHECKPOINT_INTERVAL) {
    Some(n) => n,
    None => panic!("default checkpoint interval is zero"),
};

/// Batch sizing and checkpoint cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Maximum records per upsert batch
    pub batch_size: NonZeroUsize,
    /// Raw row positions divisible by this trigger a checkpoint update
    pub checkpoint_interval: NonZeroU64,
}

impl ImportSettings {
    /// Settings from plain numbers; zero for either is a config error
    pub fn new(batch_size: usize, checkpoint_interval: u64) -> ImportResult<Self> {
        let batch_size = NonZeroUsize::new(batch_size).ok_or_else(|| {
            dvp_common::Error::Config("batch_size must be greater than 0".to_string())
        })?;
        let checkpoint_interval = NonZeroU64::new(checkpoint_interval).ok_or_else(|| {
            dvp_common::Error::Config("checkpoint_interval must be greater than 0".to_string())
        })?;

        Ok(Self {
            batch_size,
            checkpoint_interval,
        })
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH,
            checkpoint_interval: DEFAULT_INTERVAL,
        }
    }
}

/// How one file's import ended (errors aside)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Verified and marked completed
    Completed { records_written: u64 },
    /// Rows ran out but the store holds fewer records than the file has rows
    Incomplete { stored: u64, total_records: u64 },
    /// Cancellation observed between batches
    Cancelled { position: u64 },
}

/// Imports one snapshot file at a time
pub struct BatchImporter {
    records: Arc<dyn RecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    verifier: Verifier,
    settings: ImportSettings,
}

impl BatchImporter {
    pub fn new(
        records: Arc<dyn RecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: ImportSettings,
    ) -> Self {
        let verifier = Verifier::new(records.clone(), checkpoints.clone());
        Self {
            records,
            checkpoints,
            verifier,
            settings,
        }
    }

    /// Import `file` starting from its verified position
    pub async fn import_file(
        &self,
        file: &SnapshotFile,
        cancel: &CancellationToken,
    ) -> ImportResult<FileOutcome> {
        let file_name = file.file_name.as_str();

        let mut position = self.verifier.verified_position(file_name).await?;
        let total_records = file.count_rows()?;

        let cached_total = self
            .checkpoints
            .get_checkpoint(file_name)
            .await?
            .and_then(|c| c.total_records);
        if cached_total != Some(total_records) {
            if let Some(cached) = cached_total {
                warn!(
                    file = file_name,
                    cached, total_records, "Row count changed since last run, using current count"
                );
            }
            // `position` was just verified against a fresh count
            self.checkpoints
                .upsert_progress(file_name, position, Some(total_records))
                .await?;
        }

        info!(
            file = file_name,
            "Processing {}: starting from position {} of {}", file_name, position, total_records
        );

        let mut records_written = 0u64;

        while position < total_records {
            if cancel.is_cancelled() {
                info!(file = file_name, position, "Import cancelled between batches");
                return Ok(FileOutcome::Cancelled { position });
            }

            let batch = self.read_batch(file, position, total_records).await?;
            if batch.is_empty() {
                debug!(file = file_name, position, "No more records to import");
                break;
            }

            let summary = self.records.upsert_many(&batch).await?;
            if summary.failed > 0 {
                return Err(ImportError::BatchWrite {
                    file_name: file_name.to_string(),
                    attempted: batch.len(),
                    failed: summary.failed,
                    first_error: summary.first_error.unwrap_or_default(),
                });
            }

            info!(
                file = file_name,
                inserted = summary.inserted,
                modified = summary.modified,
                "Processed {} records from '{}'",
                batch.len(),
                file_name
            );

            position += batch.len() as u64;
            records_written += summary.written() as u64;
        }

        if self.verifier.is_file_complete(file_name).await? {
            self.checkpoints.mark_complete(file_name).await?;
            info!(file = file_name, records_written, "Successfully completed file");
            Ok(FileOutcome::Completed { records_written })
        } else {
            let stored = self.verifier.stored_count(file_name).await?;
            warn!(file = file_name, stored, total_records, "File needs reprocessing");
            Ok(FileOutcome::Incomplete {
                stored,
                total_records,
            })
        }
    }

    /// Map up to one batch of records starting at raw row `start`
    ///
    /// Ends early, returning what it has, when a cadence check finds fewer
    /// records stored than the position it would claim.
    async fn read_batch(
        &self,
        file: &SnapshotFile,
        start: u64,
        total_records: u64,
    ) -> ImportResult<Vec<VotingPowerRecord>> {
        let mut batch = Vec::with_capacity(self.settings.batch_size.get());

        for (position, row) in (start..).zip(file.rows_from(start)?) {
            if let Some(record) = map_row(&row?, file.date) {
                batch.push(record);
            }

            if position % self.settings.checkpoint_interval.get() == 0 {
                let stored = self.records.count_for_date(file.date).await?;
                if stored < position {
                    warn!(
                        file = %file.file_name,
                        stored, position, "Only {} records stored but processing position {}", stored, position
                    );
                    return Ok(batch);
                }

                self.checkpoints
                    .upsert_progress(&file.file_name, position, Some(total_records))
                    .await?;
                info!(
                    file = %file.file_name,
                    "Verified checkpoint update for {}: {}/{}", file.file_name, position, total_records
                );
            }

            if batch.len() >= self.settings.batch_size.get() {
                break;
            }
        }

        Ok(batch)
    }
}
