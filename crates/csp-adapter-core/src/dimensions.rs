//! Mapping aggregated usage onto billable CSP dimensions.
//!
//! A metric's aggregated value becomes a vector of `(dimension, units)`
//! entries, one per configured dimension. Under volume reporting the whole
//! value lands on the single dimension whose tier covers it; under tiered
//! reporting the value fills tiers from the lowest upward, overflowing into
//! the next. Either way `sum(units)` equals the effective value, so the CSP
//! sees exactly what was aggregated.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConsumptionReporting, DimensionConfig, MetricConfig};
use crate::error::{AdapterError, Result};
use crate::usage::UsageValue;

/// Units billed against one marketplace dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionUnits {
    /// The CSP marketplace dimension id.
    pub dimension: String,
    /// Units to bill against it.
    pub units: u64,
}

/// Map every metric's aggregated usage onto its billable dimensions.
///
/// The returned vector is ordered by metric order, then dimension order.
///
/// # Errors
///
/// Returns [`AdapterError::NoMatchingVolumeDimension`] when a volume
/// metric's value falls below every tier, and
/// [`AdapterError::VolumeUsageNotScalar`] when the application reported a
/// per-dimension breakdown for a volume metric. Both mean the billing step
/// for this cycle must be skipped with state unchanged.
pub fn billing_dimensions(
    config: &Config,
    billable: &IndexMap<String, UsageValue>,
) -> Result<Vec<DimensionUnits>> {
    let mut billed = Vec::new();

    for (metric, usage) in billable {
        let Some(settings) = config.usage_metrics.get(metric) else {
            tracing::warn!(metric = %metric, "ignoring usage for unconfigured metric");
            continue;
        };

        match (settings.consumption_reporting, usage) {
            (ConsumptionReporting::Volume, UsageValue::Count(value)) => {
                let value = effective_usage(*value, settings);
                volume_dimensions(metric, value, &settings.dimensions, &mut billed)?;
            }
            (ConsumptionReporting::Volume, UsageValue::PerDimension(_)) => {
                return Err(AdapterError::VolumeUsageNotScalar {
                    metric: metric.clone(),
                });
            }
            (ConsumptionReporting::Tiered, UsageValue::Count(value)) => {
                let value = effective_usage(*value, settings);
                tiered_dimensions(value, &settings.dimensions, &mut billed);
            }
            (ConsumptionReporting::Tiered, UsageValue::PerDimension(breakdown)) => {
                passthrough_dimensions(metric, breakdown, &settings.dimensions, &mut billed);
            }
        }
    }

    tracing::debug!(dimensions = ?billed, "determined billing dimensions");
    Ok(billed)
}

/// Apply the metric's minimum chargeable consumption: a non-zero value
/// below the minimum is billed as the minimum. Zero stays zero.
fn effective_usage(value: u64, settings: &MetricConfig) -> u64 {
    match settings.min_consumption {
        Some(min) if value > 0 && value < min.count => min.count,
        _ => value,
    }
}

/// Volume reporting: the whole value lands on the single dimension whose
/// inclusive `[min, max]` tier covers it; every other dimension bills zero.
fn volume_dimensions(
    metric: &str,
    value: u64,
    dimensions: &[DimensionConfig],
    billed: &mut Vec<DimensionUnits>,
) -> Result<()> {
    let matching = if value == 0 {
        None
    } else {
        let index = dimensions.iter().position(|dim| {
            value >= dim.min.unwrap_or(0) && value <= dim.max.unwrap_or(u64::MAX)
        });
        match index {
            Some(index) => Some(index),
            None => {
                return Err(AdapterError::NoMatchingVolumeDimension {
                    metric: metric.into(),
                    value,
                })
            }
        }
    };

    for (index, dim) in dimensions.iter().enumerate() {
        billed.push(DimensionUnits {
            dimension: dim.dimension.clone(),
            units: if Some(index) == matching { value } else { 0 },
        });
    }
    Ok(())
}

/// Tiered reporting: fill tiers from the lowest upward. A tier's capacity
/// is its inclusive span with the lower bound floored at 1, so a 0-based
/// first tier `[0, 30]` holds 30 units. An unbounded tier absorbs the whole
/// remainder; if the highest tier is bounded, anything left over is added
/// to it rather than dropped.
fn tiered_dimensions(value: u64, dimensions: &[DimensionConfig], billed: &mut Vec<DimensionUnits>) {
    let first = billed.len();
    let mut remaining = value;

    for dim in dimensions {
        let units = match dim.max {
            None => std::mem::take(&mut remaining),
            Some(max) => {
                let floor = dim.min.unwrap_or(0).max(1);
                let capacity = max.saturating_sub(floor) + 1;
                let units = remaining.min(capacity);
                remaining -= units;
                units
            }
        };
        billed.push(DimensionUnits {
            dimension: dim.dimension.clone(),
            units,
        });
    }

    if remaining > 0 {
        if let Some(last) = billed.last_mut() {
            tracing::warn!(
                dimension = %last.dimension,
                overflow = remaining,
                "usage exceeds the highest bounded tier; billing the excess there"
            );
            last.units += remaining;
        }
    }

    debug_assert_eq!(
        billed[first..].iter().map(|entry| entry.units).sum::<u64>(),
        value
    );
}

/// Tiered reporting with a per-dimension breakdown from the application:
/// pass each configured dimension's count through as received.
fn passthrough_dimensions(
    metric: &str,
    breakdown: &std::collections::BTreeMap<String, u64>,
    dimensions: &[DimensionConfig],
    billed: &mut Vec<DimensionUnits>,
) {
    for name in breakdown.keys() {
        if !dimensions.iter().any(|dim| &dim.dimension == name) {
            tracing::warn!(
                metric = %metric,
                dimension = %name,
                "application reported usage for an unconfigured dimension; dropped"
            );
        }
    }

    for dim in dimensions {
        billed.push(DimensionUnits {
            dimension: dim.dimension.clone(),
            units: breakdown.get(&dim.dimension).copied().unwrap_or(0),
        });
    }
}
