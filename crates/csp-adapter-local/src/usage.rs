//! Simulated application usage endpoint.

use async_trait::async_trait;
use chrono::Utc;

use csp_adapter_core::{Config, GeneralProvider, ProviderError};

use crate::clock_roll;

const BASE_PRODUCT: &str = "cpe:/o:example:product:v1.0.0";

/// Usage values the simulated endpoint cycles through. The outlier forces
/// the occasional tier change.
const SAMPLES: [u64; 4] = [9, 10, 11, 25];

/// A general provider that fabricates a usage report for every configured
/// metric, for demo deployments and integration tests.
#[derive(Debug, Default)]
pub struct StaticUsage;

impl StaticUsage {
    /// Create the provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GeneralProvider for StaticUsage {
    fn name(&self) -> &str {
        "static-usage"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn load_defaults(&self) -> serde_yaml::Value {
        serde_yaml::from_str("product_code: local-demo")
            .unwrap_or(serde_yaml::Value::Null)
    }

    async fn setup_adapter(&self, _config: &Config) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_usage_data(&self, config: &Config) -> Result<serde_json::Value, ProviderError> {
        let quantity = if clock_roll(100) == 0 {
            SAMPLES[3]
        } else {
            SAMPLES[usize::try_from(clock_roll(3)).unwrap_or(0)]
        };

        let mut usage = serde_json::Map::new();
        for metric in config.usage_metrics.keys() {
            usage.insert(metric.clone(), quantity.into());
        }
        usage.insert("reporting_time".into(), Utc::now().to_rfc3339().into());
        usage.insert("base_product".into(), BASE_PRODUCT.into());

        let usage = serde_json::Value::Object(usage);
        tracing::info!(usage = %usage, "simulated usage data");
        Ok(usage)
    }
}
