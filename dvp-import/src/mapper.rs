//! Snapshot row to voting-power record mapping
//!
//! Pure and side-effect free. A row contributes one metric per catalogue
//! entry whose value cell parses as a number and, for gated entries, whose
//! membership cell is exactly [`MEMBER_FLAG`]. A row with no metrics yields
//! no record at all.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};

use crate::models::VotingPowerRecord;

/// A snapshot row keyed by header name
pub type RawRow = HashMap<String, String>;

/// Column carrying the delegate identifier
pub const DELEGATE_COLUMN: &str = "delegate";

/// Membership cell value meaning "is a member"
pub const MEMBER_FLAG: &str = "1";

const HOUSES: [&str; 5] = ["ch", "gc", "sc", "coc", "dab"];

/// Only this house publishes market-maker season columns
const MARKET_MAKER_HOUSE: &str = "gc";

/// One entry of the field catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricField {
    /// Key in the record's `voting_power` map
    pub metric: String,
    /// Column holding the numeric value
    pub value_column: String,
    /// Companion column that must equal [`MEMBER_FLAG`]
    pub member_column: Option<String>,
}

impl MetricField {
    fn flat(column: &str, metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            value_column: column.to_string(),
            member_column: None,
        }
    }

    fn gated(house: &str, variant: &str) -> Self {
        let value_column = format!("{}_vp_{}", house, variant);
        Self {
            metric: value_column.clone(),
            value_column,
            member_column: Some(format!("{}_member_{}", house, variant)),
        }
    }
}

static FIELD_CATALOGUE: Lazy<Vec<MetricField>> = Lazy::new(|| {
    let mut fields = vec![
        MetricField::flat("voting_power", "vp"),
        MetricField::flat("th_vp", "th_vp"),
    ];

    for house in HOUSES {
        for round in 2..=6 {
            fields.push(MetricField::gated(house, &format!("r{}", round)));
        }
        for season in 3..=6 {
            fields.push(MetricField::gated(house, &format!("s{}", season)));
            if house == MARKET_MAKER_HOUSE {
                fields.push(MetricField::gated(house, &format!("mm_s{}", season)));
            }
        }
    }

    fields
});

/// Every metric the mapper knows how to extract
pub fn field_catalogue() -> &'static [MetricField] {
    &FIELD_CATALOGUE
}

/// Parse a value cell, treating anything unparseable as absent
pub fn parse_metric(cell: Option<&str>) -> Option<f64> {
    cell?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Map one row of the snapshot taken on `date`
pub fn map_row(row: &RawRow, date: NaiveDate) -> Option<VotingPowerRecord> {
    let delegate_id = row.get(DELEGATE_COLUMN)?;

    let voting_power: BTreeMap<String, f64> = field_catalogue()
        .iter()
        .filter(|field| match &field.member_column {
            Some(member_column) => row.get(member_column).map(String::as_str) == Some(MEMBER_FLAG),
            None => true,
        })
        .filter_map(|field| {
            parse_metric(row.get(&field.value_column).map(String::as_str))
                .map(|value| (field.metric.clone(), value))
        })
        .collect();

    if voting_power.is_empty() {
        return None;
    }

    Some(VotingPowerRecord {
        delegate_id: delegate_id.clone(),
        date,
        voting_power,
    })
}
