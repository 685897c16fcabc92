//! Usage records and the per-metric aggregation rules.
//!
//! The application's usage endpoint reports one record per sample. A metric
//! inside a record is either a single count or, for applications that track
//! their own tier split, a per-dimension breakdown. Aggregation folds the
//! records collected during a billing window into one value per configured
//! metric.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{Config, UsageAggregation};
use crate::ledger::ErrorLedger;

/// One metric's value inside a usage record: a plain count, or a
/// per-dimension breakdown reported by the application itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsageValue {
    /// A single usage count.
    Count(u64),
    /// Usage already split per dimension id.
    PerDimension(BTreeMap<String, u64>),
}

/// One sample of the application's usage endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// When the application produced this sample.
    pub reporting_time: DateTime<Utc>,

    /// CPE identifier of the product the usage belongs to.
    pub base_product: String,

    /// Metric values keyed by metric name.
    #[serde(flatten)]
    pub metrics: BTreeMap<String, UsageValue>,
}

/// Deserialize a list of usage records, skipping entries with an invalid
/// schema with a warning instead of failing the whole document.
pub fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<UsageRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(error = %err, "skipping usage record with invalid schema");
                None
            }
        })
        .collect())
}

/// Fold `records` into one value per configured metric.
///
/// With `empty_usage` set, every metric reports zero; this is the heartbeat
/// payload for CSPs whose reporting API is not cumulative. Records missing a
/// metric contribute zero for that metric.
#[must_use]
pub fn billable_usage(
    records: &[UsageRecord],
    config: &Config,
    empty_usage: bool,
    ledger: &mut ErrorLedger,
) -> IndexMap<String, UsageValue> {
    if empty_usage {
        tracing::debug!("returning zero usage for all metrics, empty_usage set");
        return config
            .usage_metrics
            .keys()
            .map(|metric| (metric.clone(), UsageValue::Count(0)))
            .collect();
    }

    let mut billable = IndexMap::new();
    for (metric, settings) in &config.usage_metrics {
        let value = aggregate_metric(metric, settings.usage_aggregation, records, ledger);
        tracing::debug!(metric = %metric, value = ?value, "aggregated usage");
        billable.insert(metric.clone(), value);
    }
    billable
}

fn aggregate_metric(
    metric: &str,
    aggregation: UsageAggregation,
    records: &[UsageRecord],
    ledger: &mut ErrorLedger,
) -> UsageValue {
    let has_breakdown = records
        .iter()
        .any(|record| matches!(record.metrics.get(metric), Some(UsageValue::PerDimension(_))));

    if has_breakdown {
        if records
            .iter()
            .any(|record| matches!(record.metrics.get(metric), Some(UsageValue::Count(_))))
        {
            ledger.record(format!(
                "Metric '{metric}' mixes plain counts with per-dimension usage; \
                 plain counts were ignored"
            ));
        }
        UsageValue::PerDimension(aggregate_breakdown(metric, aggregation, records, ledger))
    } else {
        UsageValue::Count(aggregate_counts(metric, aggregation, records, ledger))
    }
}

fn aggregate_counts(
    metric: &str,
    aggregation: UsageAggregation,
    records: &[UsageRecord],
    ledger: &mut ErrorLedger,
) -> u64 {
    let count_in = |record: &UsageRecord| match record.metrics.get(metric) {
        Some(UsageValue::Count(count)) => *count,
        _ => 0,
    };

    match aggregation {
        UsageAggregation::Maximum => records.iter().map(count_in).max().unwrap_or(0),
        UsageAggregation::Average => ceil_average(records.iter().map(count_in), records.len()),
        UsageAggregation::Current => {
            warn_multi_sample_current(metric, records.len(), ledger);
            records.last().map(count_in).unwrap_or(0)
        }
    }
}

fn aggregate_breakdown(
    metric: &str,
    aggregation: UsageAggregation,
    records: &[UsageRecord],
    ledger: &mut ErrorLedger,
) -> BTreeMap<String, u64> {
    let breakdowns: Vec<&BTreeMap<String, u64>> = records
        .iter()
        .filter_map(|record| match record.metrics.get(metric) {
            Some(UsageValue::PerDimension(map)) => Some(map),
            _ => None,
        })
        .collect();

    let dimensions: Vec<&String> = {
        let mut seen = Vec::new();
        for map in &breakdowns {
            for dimension in map.keys() {
                if !seen.contains(&dimension) {
                    seen.push(dimension);
                }
            }
        }
        seen
    };

    let mut aggregated = BTreeMap::new();
    for dimension in dimensions {
        let series = breakdowns
            .iter()
            .map(|map| map.get(dimension).copied().unwrap_or(0));
        let value = match aggregation {
            UsageAggregation::Maximum => series.max().unwrap_or(0),
            UsageAggregation::Average => ceil_average(series, breakdowns.len()),
            UsageAggregation::Current => {
                warn_multi_sample_current(metric, breakdowns.len(), ledger);
                series.last().unwrap_or(0)
            }
        };
        aggregated.insert(dimension.clone(), value);
    }
    aggregated
}

fn ceil_average(values: impl Iterator<Item = u64>, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    let total: u64 = values.sum();
    let count = count as u64;
    total.div_ceil(count)
}

fn warn_multi_sample_current(metric: &str, samples: usize, ledger: &mut ErrorLedger) {
    if samples > 1 {
        ledger.record(format!(
            "Metric '{metric}' uses 'current' aggregation over {samples} samples, \
             which is not implemented; the most recent sample was used"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsumptionReporting, DimensionConfig, MetricConfig};
    use chrono::TimeZone;

    fn record(minute: u32, counts: &[(&str, u64)]) -> UsageRecord {
        UsageRecord {
            reporting_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            base_product: "cpe:/o:example:product:v1.0.0".into(),
            metrics: counts
                .iter()
                .map(|(name, count)| ((*name).to_string(), UsageValue::Count(*count)))
                .collect(),
        }
    }

    fn config_with(aggregation: UsageAggregation) -> Config {
        let mut usage_metrics = IndexMap::new();
        usage_metrics.insert(
            "nodes".to_string(),
            MetricConfig {
                usage_aggregation: aggregation,
                consumption_reporting: ConsumptionReporting::Volume,
                min_consumption: None,
                dimensions: vec![DimensionConfig {
                    dimension: "dim_1".into(),
                    min: None,
                    max: None,
                }],
            },
        );
        Config {
            version: "1.1.0".into(),
            billing_interval: crate::config::BillingInterval::Monthly,
            fixed_billing_interval: None,
            query_interval: 300,
            reporting_interval: 3600,
            reporting_api_is_cumulative: false,
            product_code: "example-product".into(),
            archive_retention_period: 6,
            usage_metrics,
            storage: crate::config::StorageSection::default(),
            csp: crate::config::CspSection::default(),
            usage_api: None,
            logging: crate::config::LoggingSection::default(),
        }
    }

    fn aggregate(aggregation: UsageAggregation, records: &[UsageRecord]) -> u64 {
        let mut ledger = ErrorLedger::new();
        let billable = billable_usage(records, &config_with(aggregation), false, &mut ledger);
        match &billable["nodes"] {
            UsageValue::Count(count) => *count,
            UsageValue::PerDimension(_) => panic!("expected a plain count"),
        }
    }

    #[test]
    fn maximum_over_samples() {
        let records = [
            record(0, &[("nodes", 10)]),
            record(5, &[("nodes", 22)]),
            record(10, &[("nodes", 17)]),
        ];
        assert_eq!(aggregate(UsageAggregation::Maximum, &records), 22);
    }

    #[test]
    fn average_is_ceiling_of_mean() {
        let records = [
            record(0, &[("nodes", 10)]),
            record(5, &[("nodes", 11)]),
            record(10, &[("nodes", 12)]),
        ];
        assert_eq!(aggregate(UsageAggregation::Average, &records), 11);

        let records = [record(0, &[("nodes", 10)]), record(5, &[("nodes", 11)])];
        // 21 / 2 rounds up
        assert_eq!(aggregate(UsageAggregation::Average, &records), 11);
    }

    #[test]
    fn empty_records_aggregate_to_zero() {
        for aggregation in [
            UsageAggregation::Maximum,
            UsageAggregation::Average,
            UsageAggregation::Current,
        ] {
            assert_eq!(aggregate(aggregation, &[]), 0);
        }
    }

    #[test]
    fn missing_metric_contributes_zero() {
        let records = [record(0, &[("other", 9)]), record(5, &[("nodes", 4)])];
        assert_eq!(aggregate(UsageAggregation::Maximum, &records), 4);
        assert_eq!(aggregate(UsageAggregation::Average, &records), 2);
    }

    #[test]
    fn current_uses_last_sample_and_flags_multiple() {
        let records = [record(0, &[("nodes", 10)]), record(5, &[("nodes", 7)])];
        let mut ledger = ErrorLedger::new();
        let billable = billable_usage(
            &records,
            &config_with(UsageAggregation::Current),
            false,
            &mut ledger,
        );
        assert_eq!(billable["nodes"], UsageValue::Count(7));
        assert!(!ledger.is_empty());

        let mut ledger = ErrorLedger::new();
        let billable = billable_usage(
            &records[..1],
            &config_with(UsageAggregation::Current),
            false,
            &mut ledger,
        );
        assert_eq!(billable["nodes"], UsageValue::Count(10));
        assert!(ledger.is_empty());
    }

    #[test]
    fn aggregation_is_idempotent() {
        let records = [
            record(0, &[("nodes", 10)]),
            record(5, &[("nodes", 22)]),
            record(10, &[("nodes", 17)]),
        ];
        let config = config_with(UsageAggregation::Average);
        let first = billable_usage(&records, &config, false, &mut ErrorLedger::new());
        let second = billable_usage(&records, &config, false, &mut ErrorLedger::new());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_usage_reports_zero_for_all_metrics() {
        let records = [record(0, &[("nodes", 10)])];
        let mut ledger = ErrorLedger::new();
        let billable = billable_usage(
            &records,
            &config_with(UsageAggregation::Maximum),
            true,
            &mut ledger,
        );
        assert_eq!(billable["nodes"], UsageValue::Count(0));
    }

    #[test]
    fn per_dimension_breakdowns_aggregate_componentwise() {
        let breakdown = |minute: u32, low: u64, high: u64| UsageRecord {
            reporting_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            base_product: "cpe:/o:example:product:v1.0.0".into(),
            metrics: [(
                "nodes".to_string(),
                UsageValue::PerDimension(
                    [("low".to_string(), low), ("high".to_string(), high)].into(),
                ),
            )]
            .into(),
        };

        let records = [breakdown(0, 3, 10), breakdown(5, 5, 8)];
        let mut ledger = ErrorLedger::new();
        let billable = billable_usage(
            &records,
            &config_with(UsageAggregation::Maximum),
            false,
            &mut ledger,
        );
        assert_eq!(
            billable["nodes"],
            UsageValue::PerDimension([("low".to_string(), 5), ("high".to_string(), 10)].into())
        );
    }

    #[test]
    fn usage_record_round_trips_with_flattened_metrics() {
        let json = serde_json::json!({
            "managed_node_count": 9,
            "reporting_time": "2024-03-01T12:00:00Z",
            "base_product": "cpe:/o:example:product:v1.0.0"
        });
        let record: UsageRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(
            record.metrics["managed_node_count"],
            UsageValue::Count(9)
        );
        assert_eq!(serde_json::to_value(&record).unwrap(), json);
    }

    #[test]
    fn lenient_records_skip_invalid_entries() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "lenient_records")]
            records: Vec<UsageRecord>,
        }

        let json = serde_json::json!({
            "records": [
                {
                    "nodes": 5,
                    "reporting_time": "2024-03-01T12:00:00Z",
                    "base_product": "cpe:/o:example:product:v1.0.0"
                },
                { "nodes": "not a number" },
            ]
        });
        let wrapper: Wrapper = serde_json::from_value(json).unwrap();
        assert_eq!(wrapper.records.len(), 1);
        assert_eq!(wrapper.records[0].metrics["nodes"], UsageValue::Count(5));
    }
}
