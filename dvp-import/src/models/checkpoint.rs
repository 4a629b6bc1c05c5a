//! Per-file import checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Checkpoint lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "completed" => Ok(CheckpointStatus::Completed),
            other => Err(format!("unknown checkpoint status '{}'", other)),
        }
    }
}

/// Durable record of how far one snapshot file has been imported
///
/// `position` is advisory: it is only trusted after the verifier has
/// reconciled it with the number of records actually stored for the file's
/// date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub file_name: String,
    /// Source rows already reflected in the destination
    pub position: u64,
    /// Row count of the source file, once known
    pub total_records: Option<u64>,
    pub status: CheckpointStatus,
    /// Last update
    pub timestamp: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}
