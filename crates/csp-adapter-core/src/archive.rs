//! Retained history of billed cycles.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::dimensions::DimensionUnits;
use crate::usage::{lenient_records, UsageRecord};

/// One billed cycle retained in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// When the bill was submitted.
    pub billed_at: DateTime<Utc>,

    /// The dimension vector that was billed.
    pub dimensions: Vec<DimensionUnits>,

    /// The usage samples the bill was aggregated from.
    #[serde(default, deserialize_with = "lenient_records")]
    pub usage_records_snapshot: Vec<UsageRecord>,
}

/// Append `entry` to the archive and drop entries billed more than
/// `retention_months` before `now`.
pub fn append_and_prune(
    archive: &mut Vec<ArchiveEntry>,
    entry: ArchiveEntry,
    retention_months: u32,
    now: DateTime<Utc>,
) {
    archive.push(entry);

    let cutoff = now
        .checked_sub_months(Months::new(retention_months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let before = archive.len();
    archive.retain(|entry| entry.billed_at >= cutoff);

    let pruned = before - archive.len();
    if pruned > 0 {
        tracing::info!(pruned, retention_months, "pruned expired archive entries");
    }
}
