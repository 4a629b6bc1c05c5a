//! dvp-import library interface
//!
//! Imports dated CSV snapshots of delegate voting power into SQLite, one
//! file and one batch at a time, resuming from verified checkpoints after any
//! interruption.

pub mod db;
pub mod error;
pub mod importer;
pub mod mapper;
pub mod models;
pub mod orchestrator;
pub mod source;
pub mod store;
pub mod utils;
pub mod verifier;

pub use crate::error::{ImportError, ImportResult};
pub use crate::importer::{BatchImporter, FileOutcome, ImportSettings};
pub use crate::orchestrator::{HaltReason, ImportOrchestrator, RunOutcome, RunSummary};
pub use crate::store::{CheckpointStore, RecordStore};
pub use crate::verifier::Verifier;
