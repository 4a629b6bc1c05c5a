//! SQLite implementations of the store traits

pub mod checkpoints;
pub mod records;

pub use checkpoints::SqliteCheckpointStore;
pub use records::SqliteRecordStore;
