//! Error types for dvp-import

use std::path::PathBuf;
use thiserror::Error;

/// Importer error type
#[derive(Debug, Error)]
pub enum ImportError {
    /// dvp-common error (database bootstrap, config, lock retries)
    #[error("Common error: {0}")]
    Common(#[from] dvp_common::Error),

    /// Query or write rejected by SQLite
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot file could not be read as CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Metrics payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File name does not carry a `YYYY-MM-DD` snapshot date
    #[error("Invalid snapshot file name: {0}")]
    InvalidFileName(String),

    /// Snapshot header lacks a required column
    #[error("Missing column '{column}' in {}", .path.display())]
    MissingColumn { path: PathBuf, column: String },

    /// Input directory missing or not a directory
    #[error("Input directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Destination rejected some or all of an upsert batch
    #[error("Batch write for {file_name} failed: {failed} of {attempted} records rejected ({first_error})")]
    BatchWrite {
        file_name: String,
        attempted: usize,
        failed: usize,
        first_error: String,
    },
}

/// Result type for importer operations
pub type ImportResult<T> = Result<T, ImportError>;
