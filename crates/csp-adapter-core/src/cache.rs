//! The adapter's private recovery state.
//!
//! The cache is the only document the adapter needs to resume correctly
//! after a restart: the deadlines it was working towards, the usage samples
//! collected so far in the current billing window, and the receipt of the
//! last submitted bill. The adapter is the single writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dimensions::DimensionUnits;
use crate::sched;
use crate::usage::{lenient_records, UsageRecord};

/// The persisted cache document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    /// When this adapter instance first seeded its state.
    pub adapter_start_time: DateTime<Utc>,

    /// Deadline for the next billable metering submission.
    pub next_bill_time: DateTime<Utc>,

    /// Deadline for the next heartbeat report.
    pub next_reporting_time: DateTime<Utc>,

    /// Usage samples collected so far, ordered by reporting time. Entries
    /// with an invalid schema are skipped on load with a warning.
    #[serde(default, deserialize_with = "lenient_records")]
    pub usage_records: Vec<UsageRecord>,

    /// Receipt of the last successfully submitted bill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bill: Option<LastBill>,
}

/// Receipt of a successfully submitted bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastBill {
    /// The record id returned by the CSP metering API.
    pub record_id: String,

    /// When the metering call was submitted.
    pub metering_time: DateTime<Utc>,

    /// The dimension vector that was billed.
    pub dimensions: Vec<DimensionUnits>,
}

impl Cache {
    /// Seed a fresh cache at `now`, deriving the first bill and reporting
    /// deadlines from the configured intervals.
    #[must_use]
    pub fn seed(now: DateTime<Utc>, config: &Config) -> Self {
        Self {
            adapter_start_time: now,
            next_bill_time: sched::next_bill_time(now, config.billing_period()),
            next_reporting_time: sched::date_delta(
                now,
                i64::try_from(config.reporting_interval).unwrap_or(i64::MAX),
            ),
            usage_records: Vec::new(),
            last_bill: None,
        }
    }

    /// Append a usage record unless it duplicates the previous sample's
    /// reporting time. Returns whether the record was added.
    pub fn add_usage_record(&mut self, record: UsageRecord) -> bool {
        if let Some(last) = self.usage_records.last() {
            if last.reporting_time == record.reporting_time {
                tracing::debug!(
                    reporting_time = %record.reporting_time,
                    "skipping duplicate usage record"
                );
                return false;
            }
        }
        self.usage_records.push(record);
        true
    }

    /// Record a successful bill: store the receipt, drop the billed
    /// records, and advance the bill deadline.
    pub fn record_bill(
        &mut self,
        record_id: String,
        dimensions: Vec<DimensionUnits>,
        metering_time: DateTime<Utc>,
        next_bill_time: DateTime<Utc>,
        remaining_records: Vec<UsageRecord>,
    ) {
        self.last_bill = Some(LastBill {
            record_id,
            metering_time,
            dimensions,
        });
        self.usage_records = remaining_records;
        self.next_bill_time = next_bill_time;
    }
}
