//! Data models for dvp-import

pub mod checkpoint;
pub mod record;

pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use record::{UpsertSummary, VotingPowerRecord};
