//! Imported voting-power record

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One delegate's voting power on one snapshot date
///
/// `(delegate_id, date)` is the natural key; the destination keeps at most
/// one record per key and an upsert replaces `voting_power` wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingPowerRecord {
    pub delegate_id: String,
    pub date: NaiveDate,
    /// Metric name (e.g. `vp`, `gc_vp_s3`) to value
    pub voting_power: BTreeMap<String, f64>,
}

/// Outcome of one unordered upsert batch
///
/// Every record of the batch is attempted; rejected records are counted in
/// `failed` instead of stopping the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Records whose key was not yet present
    pub inserted: usize,
    /// Records that replaced an existing document
    pub modified: usize,
    pub failed: usize,
    /// Message of the first rejected record
    pub first_error: Option<String>,
}

impl UpsertSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.modified
    }

    pub fn record_failure(&mut self, error: impl ToString) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error.to_string());
        }
    }
}
