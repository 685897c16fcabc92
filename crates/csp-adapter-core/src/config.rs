//! Operator configuration: loading, defaults merging and validation.
//!
//! The configuration is read once at boot from a YAML file and is immutable
//! afterwards; operators change settings by restarting the adapter. Baseline
//! defaults supplied by the bound General provider are merged *under* the
//! operator file before validation, so the file always wins.

use std::path::PathBuf;

use indexmap::IndexMap;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};

/// Default location of the operator configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/csp_billing_adapter/config.yaml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "CSP_ADAPTER_CONFIG_FILE";

/// Config schema versions this adapter accepts. Incompatible versions are
/// fatal at startup.
pub const SUPPORTED_CONFIG_VERSIONS: &str = ">=1.0.0, <2.0.0";

/// Validated, immutable adapter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Config schema version (semver).
    pub version: String,

    /// Cadence at which bills are submitted to the CSP.
    pub billing_interval: BillingInterval,

    /// Fixed billing period in seconds, overriding `billing_interval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_billing_interval: Option<u64>,

    /// Seconds between samples of the application usage endpoint.
    pub query_interval: u64,

    /// Seconds between heartbeat/reporting calls to the CSP.
    pub reporting_interval: u64,

    /// Whether the CSP reporting API expects the running aggregate in
    /// heartbeat calls rather than a zero-unit vector.
    #[serde(default)]
    pub reporting_api_is_cumulative: bool,

    /// Marketplace product code submitted with every metering call.
    pub product_code: String,

    /// Months of billed history retained in the archive.
    #[serde(default = "default_archive_retention")]
    pub archive_retention_period: u32,

    /// Usage metrics to bill, in operator order.
    pub usage_metrics: IndexMap<String, MetricConfig>,

    /// Storage provider selection.
    #[serde(default)]
    pub storage: StorageSection,

    /// CSP provider selection.
    #[serde(default)]
    pub csp: CspSection,

    /// Application usage endpoint; absent means the static local provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_api: Option<UsageApiSection>,

    /// Logging options.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Billing cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    /// Bill on the same day of every month, clamped to month end.
    Monthly,
    /// Bill every hour.
    Hourly,
}

/// The effective billing period, after applying the fixed-interval override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingPeriod {
    /// Calendar month.
    Monthly,
    /// One hour.
    Hourly,
    /// A fixed number of seconds.
    Fixed(u64),
}

/// Per-metric billing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// How per-tick samples fold into one value per billing window.
    pub usage_aggregation: UsageAggregation,

    /// How the aggregated value maps onto dimensions.
    pub consumption_reporting: ConsumptionReporting,

    /// Minimum chargeable consumption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_consumption: Option<MinConsumption>,

    /// Billable dimensions, ordered by ascending tier boundary.
    pub dimensions: Vec<DimensionConfig>,
}

/// Reduction rule folding samples into a single billable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAggregation {
    /// Highest sample in the window.
    Maximum,
    /// Ceiling of the mean over the window.
    Average,
    /// Most recent sample.
    Current,
}

/// Dimension mapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionReporting {
    /// The whole value lands on the single matching dimension.
    Volume,
    /// The value is split across dimensions by tier capacity.
    Tiered,
}

/// Minimum chargeable consumption for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinConsumption {
    /// Usage below this count is billed as this count.
    pub count: u64,
}

/// One priced dimension within a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// The CSP marketplace dimension id.
    pub dimension: String,

    /// Inclusive lower tier boundary; absent means 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,

    /// Inclusive upper tier boundary; the highest tier may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// Storage provider wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Storage back-end name.
    #[serde(default = "default_storage_provider")]
    pub provider: String,

    /// Directory holding the cache, csp-config and archive documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            data_dir: default_data_dir(),
        }
    }
}

/// CSP provider wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspSection {
    /// CSP back-end name.
    #[serde(default = "default_csp_provider")]
    pub provider: String,
}

impl Default for CspSection {
    fn default() -> Self {
        Self {
            provider: default_csp_provider(),
        }
    }
}

/// Application usage endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageApiSection {
    /// URL returning the current usage report as JSON.
    pub url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_usage_timeout")]
    pub timeout_seconds: u64,
}

/// Logging options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default log level when `RUST_LOG` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_archive_retention() -> u32 {
    6
}

fn default_storage_provider() -> String {
    "file".into()
}

fn default_csp_provider() -> String {
    "local".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/csp-billing-adapter")
}

fn default_usage_timeout() -> u64 {
    10
}

impl Config {
    /// Build and validate the configuration from an already-parsed YAML
    /// value, merging `defaults` under it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when deserialization or validation
    /// fails.
    pub fn from_yaml(raw: serde_yaml::Value, defaults: serde_yaml::Value) -> Result<Self> {
        let merged = merge_defaults(raw, defaults);
        let config: Self =
            serde_yaml::from_value(merged).map_err(|err| AdapterError::Config {
                key: "config".into(),
                detail: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// The effective billing period, honoring the fixed-interval override.
    #[must_use]
    pub fn billing_period(&self) -> BillingPeriod {
        match self.fixed_billing_interval {
            Some(seconds) => BillingPeriod::Fixed(seconds),
            None => match self.billing_interval {
                BillingInterval::Monthly => BillingPeriod::Monthly,
                BillingInterval::Hourly => BillingPeriod::Hourly,
            },
        }
    }

    /// Validate every field, naming the offending key on failure.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<()> {
        let version = Version::parse(&self.version).map_err(|err| AdapterError::Config {
            key: "version".into(),
            detail: err.to_string(),
        })?;
        let supported = VersionReq::parse(SUPPORTED_CONFIG_VERSIONS)
            .expect("SUPPORTED_CONFIG_VERSIONS is a valid semver requirement");
        if !supported.matches(&version) {
            return Err(AdapterError::UnsupportedVersion {
                found: self.version.clone(),
                supported: SUPPORTED_CONFIG_VERSIONS.into(),
            });
        }

        if self.query_interval == 0 {
            return Err(config_error("query_interval", "must be a positive integer"));
        }
        if self.reporting_interval == 0 {
            return Err(config_error(
                "reporting_interval",
                "must be a positive integer",
            ));
        }
        if self.fixed_billing_interval == Some(0) {
            return Err(config_error(
                "fixed_billing_interval",
                "must be a positive integer",
            ));
        }
        if self.query_interval > self.reporting_interval {
            return Err(config_error(
                "query_interval",
                "must not exceed reporting_interval",
            ));
        }
        if self.reporting_interval > self.billing_floor_seconds() {
            return Err(config_error(
                "reporting_interval",
                "must not exceed the billing interval",
            ));
        }
        if self.product_code.is_empty() {
            return Err(config_error("product_code", "must not be empty"));
        }
        if self.usage_metrics.is_empty() {
            return Err(config_error(
                "usage_metrics",
                "at least one usage metric is required",
            ));
        }

        for (name, metric) in &self.usage_metrics {
            validate_metric(name, metric)?;
        }

        Ok(())
    }

    /// A lower bound on the billing period in seconds, used to order the
    /// three configured intervals. The shortest month is used for `monthly`.
    fn billing_floor_seconds(&self) -> u64 {
        match self.billing_period() {
            BillingPeriod::Monthly => 28 * 24 * 3600,
            BillingPeriod::Hourly => 3600,
            BillingPeriod::Fixed(seconds) => seconds,
        }
    }
}

fn validate_metric(name: &str, metric: &MetricConfig) -> Result<()> {
    let key = |suffix: &str| format!("usage_metrics.{name}.{suffix}");

    if metric.dimensions.is_empty() {
        return Err(config_error(
            &key("dimensions"),
            "at least one dimension is required",
        ));
    }

    for (index, dim) in metric.dimensions.iter().enumerate() {
        if dim.dimension.is_empty() {
            return Err(config_error(
                &key("dimensions"),
                "dimension ids must not be empty",
            ));
        }
        if let (Some(min), Some(max)) = (dim.min, dim.max) {
            if min > max {
                return Err(config_error(
                    &key("dimensions"),
                    &format!("tier '{}' has min {min} above max {max}", dim.dimension),
                ));
            }
        }
        if dim.max.is_none() && index + 1 != metric.dimensions.len() {
            return Err(config_error(
                &key("dimensions"),
                &format!(
                    "tier '{}' omits max but is not the highest tier",
                    dim.dimension
                ),
            ));
        }
        if index > 0 {
            let prev = &metric.dimensions[index - 1];
            let expected = prev.max.map(|max| max + 1);
            if dim.min != expected {
                return Err(config_error(
                    &key("dimensions"),
                    &format!(
                        "tier '{}' must start at the previous tier's max + 1",
                        dim.dimension
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn config_error(key: &str, detail: &str) -> AdapterError {
    AdapterError::Config {
        key: key.into(),
        detail: detail.into(),
    }
}

/// Shallow-merge `defaults` under `raw`: top-level keys present in the
/// operator file always win.
fn merge_defaults(raw: serde_yaml::Value, defaults: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;

    match (raw, defaults) {
        (Value::Mapping(raw_map), Value::Mapping(mut merged)) => {
            for (key, value) in raw_map {
                merged.insert(key, value);
            }
            Value::Mapping(merged)
        }
        (raw, _) => raw,
    }
}
