//! Import run orchestration
//!
//! Walks the snapshot files oldest first, resuming from what the checkpoint
//! store says was done last. The first file that fails or cannot be verified
//! complete halts the whole run: later files are never attempted before every
//! earlier one is completed.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::error::ImportResult;
use crate::importer::{BatchImporter, FileOutcome, ImportSettings};
use crate::models::Checkpoint;
use crate::source::{list_snapshot_files, SnapshotFile};
use crate::store::{CheckpointStore, RecordStore};

/// Why a run stopped before the last file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Rows ran out but the store holds fewer records than the file has rows
    Incomplete { stored: u64, total_records: u64 },
    /// Processing the file raised an error
    Failed(String),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Incomplete {
                stored,
                total_records,
            } => write!(
                f,
                "only {} of {} records stored after reaching end of file",
                stored, total_records
            ),
            HaltReason::Failed(message) => write!(f, "{}", message),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every file from the start index was completed
    Finished,
    Halted { file_name: String, reason: HaltReason },
    /// Stopped on operator request; checkpoints remain valid resume points
    Cancelled,
}

/// Result of one pass over the snapshot directory
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub files_total: usize,
    /// Index into the sorted file list where the run started
    pub start_index: usize,
    /// Files completed during this run, in order
    pub files_completed: Vec<String>,
    pub outcome: RunOutcome,
}

/// Decide where a run starts
///
/// An in-progress checkpoint resumes its own file; a completed one starts at
/// the following file. Unknown files (or no checkpoint) start from the top.
pub fn resolve_start_index(files: &[SnapshotFile], last: Option<&Checkpoint>) -> usize {
    let Some(last) = last else {
        return 0;
    };

    match files.iter().position(|f| f.file_name == last.file_name) {
        Some(index) if last.is_completed() => index + 1,
        Some(index) => index,
        None => 0,
    }
}

/// Top-level import loop
pub struct ImportOrchestrator {
    records: Arc<dyn RecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    importer: BatchImporter,
}

impl ImportOrchestrator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: ImportSettings,
    ) -> Self {
        let importer = BatchImporter::new(records.clone(), checkpoints.clone(), settings);
        Self {
            records,
            checkpoints,
            importer,
        }
    }

    /// Import every pending snapshot in `data_dir`
    pub async fn run(
        &self,
        data_dir: &Path,
        cancel: &CancellationToken,
    ) -> ImportResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("import_run", %run_id);

        self.run_files(run_id, data_dir, cancel)
            .instrument(span)
            .await
    }

    async fn run_files(
        &self,
        run_id: Uuid,
        data_dir: &Path,
        cancel: &CancellationToken,
    ) -> ImportResult<RunSummary> {
        self.records.ensure_indexes().await?;

        let files = list_snapshot_files(data_dir)?;
        let last = self.checkpoints.get_last_checkpoint().await?;
        let start_index = resolve_start_index(&files, last.as_ref());

        if let (Some(last), Some(first)) = (last.as_ref(), files.get(start_index)) {
            if !last.is_completed() && last.file_name == first.file_name {
                info!("Resuming from incomplete file: {}", first.file_name);
            }
        }
        if start_index < files.len() {
            info!(
                "Starting processing from file {} of {}",
                start_index + 1,
                files.len()
            );
        } else {
            info!("All {} snapshot files already imported", files.len());
        }

        let mut summary = RunSummary {
            run_id,
            files_total: files.len(),
            start_index,
            files_completed: Vec::new(),
            outcome: RunOutcome::Finished,
        };

        for file in files.iter().skip(start_index) {
            if cancel.is_cancelled() {
                summary.outcome = RunOutcome::Cancelled;
                return Ok(summary);
            }

            match self.importer.import_file(file, cancel).await {
                Ok(FileOutcome::Completed { .. }) => {
                    summary.files_completed.push(file.file_name.clone());
                }
                Ok(FileOutcome::Cancelled { .. }) => {
                    summary.outcome = RunOutcome::Cancelled;
                    return Ok(summary);
                }
                Ok(FileOutcome::Incomplete {
                    stored,
                    total_records,
                }) => {
                    error!(
                        file = %file.file_name,
                        stored, total_records, "File could not be verified complete, halting run"
                    );
                    summary.outcome = RunOutcome::Halted {
                        file_name: file.file_name.clone(),
                        reason: HaltReason::Incomplete {
                            stored,
                            total_records,
                        },
                    };
                    return Ok(summary);
                }
                Err(e) => {
                    error!(file = %file.file_name, "Error processing file: {}", e);
                    summary.outcome = RunOutcome::Halted {
                        file_name: file.file_name.clone(),
                        reason: HaltReason::Failed(e.to_string()),
                    };
                    return Ok(summary);
                }
            }
        }

        Ok(summary)
    }
}
