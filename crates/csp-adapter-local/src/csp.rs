//! Simulated CSP metering provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use csp_adapter_core::{
    Config, CspProvider, DimensionStatus, DimensionUnits, MeteringResponse, MeteringStatus,
    ProviderError,
};

use crate::clock_roll;

/// How the simulated CSP should (mis)behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Every metering call succeeds with a structured response.
    #[default]
    None,

    /// Roughly 1 in 13 calls misbehaves: a transient error, a
    /// per-dimension rejection, or a legacy bare-string response.
    Occasional,
}

/// A CSP provider that meters against nothing.
///
/// Dry-run calls always succeed so bootstrap verification passes; billable
/// calls honor the configured [`FailureMode`].
#[derive(Debug, Default)]
pub struct LocalCsp {
    failure_mode: FailureMode,
}

impl LocalCsp {
    /// A local CSP that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A local CSP with the given failure behavior.
    #[must_use]
    pub fn with_failure_mode(failure_mode: FailureMode) -> Self {
        Self { failure_mode }
    }

    fn succeed(dimensions: &[DimensionUnits]) -> MeteringResponse {
        let statuses: BTreeMap<String, DimensionStatus> = dimensions
            .iter()
            .map(|entry| {
                (
                    entry.dimension.clone(),
                    DimensionStatus {
                        status: MeteringStatus::Succeeded,
                        record_id: Some(Uuid::new_v4().simple().to_string()),
                        error: None,
                    },
                )
            })
            .collect();
        MeteringResponse::PerDimension(statuses)
    }
}

#[async_trait]
impl CspProvider for LocalCsp {
    fn name(&self) -> &str {
        "local"
    }

    async fn meter_billing(
        &self,
        _config: &Config,
        dimensions: &[DimensionUnits],
        timestamp: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<MeteringResponse, ProviderError> {
        tracing::info!(
            dimensions = ?dimensions,
            timestamp = %timestamp,
            dry_run,
            "local CSP received metering"
        );

        if dry_run {
            return Ok(MeteringResponse::Legacy(
                Uuid::new_v4().simple().to_string(),
            ));
        }

        if self.failure_mode == FailureMode::Occasional {
            match clock_roll(40) {
                4 => {
                    tracing::warn!("simulating failed metering operation");
                    return Err(ProviderError::Transient(
                        "Unable to submit meter usage. Payment not billed!".into(),
                    ));
                }
                14 => {
                    tracing::warn!("simulating per-dimension metering rejection");
                    let statuses: BTreeMap<String, DimensionStatus> = dimensions
                        .iter()
                        .map(|entry| {
                            (
                                entry.dimension.clone(),
                                DimensionStatus {
                                    status: MeteringStatus::Failed,
                                    record_id: None,
                                    error: Some("simulated metering rejection".into()),
                                },
                            )
                        })
                        .collect();
                    return Ok(MeteringResponse::PerDimension(statuses));
                }
                24 => {
                    tracing::info!("simulating legacy response shape");
                    return Ok(MeteringResponse::Legacy(
                        Uuid::new_v4().simple().to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(Self::succeed(dimensions))
    }

    async fn get_csp_config_metadata(
        &self,
        _config: &Config,
    ) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({ "marketplace": "local" }))
    }

    async fn get_account_info(&self, _config: &Config) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({
            "account_id": "123456789",
            "arch": "x86_64",
            "cloud_provider": "local",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csp_adapter_core::{
        BillingInterval, ConsumptionReporting, CspSection, DimensionConfig, LoggingSection,
        MetricConfig, MinConsumption, StorageSection, UsageAggregation,
    };
    use indexmap::IndexMap;

    fn test_config() -> Config {
        let mut usage_metrics = IndexMap::new();
        usage_metrics.insert(
            "nodes".to_string(),
            MetricConfig {
                usage_aggregation: UsageAggregation::Maximum,
                consumption_reporting: ConsumptionReporting::Volume,
                min_consumption: None::<MinConsumption>,
                dimensions: vec![DimensionConfig {
                    dimension: "dim_1".into(),
                    min: None,
                    max: None,
                }],
            },
        );
        Config {
            version: "1.1.0".into(),
            billing_interval: BillingInterval::Monthly,
            fixed_billing_interval: None,
            query_interval: 300,
            reporting_interval: 3600,
            reporting_api_is_cumulative: false,
            product_code: "example-product".into(),
            archive_retention_period: 6,
            usage_metrics,
            storage: StorageSection::default(),
            csp: CspSection::default(),
            usage_api: None,
            logging: LoggingSection::default(),
        }
    }

    fn dimensions() -> Vec<DimensionUnits> {
        vec![DimensionUnits {
            dimension: "dim_1".into(),
            units: 9,
        }]
    }

    #[tokio::test]
    async fn metering_succeeds_with_record_ids() {
        let csp = LocalCsp::new();
        let response = csp
            .meter_billing(&test_config(), &dimensions(), Utc::now(), false)
            .await
            .unwrap();

        let MeteringResponse::PerDimension(statuses) = response else {
            panic!("expected a per-dimension response");
        };
        assert_eq!(statuses["dim_1"].status, MeteringStatus::Succeeded);
        assert!(statuses["dim_1"].record_id.is_some());
    }

    #[tokio::test]
    async fn dry_run_answers_with_a_legacy_record_id() {
        let csp = LocalCsp::with_failure_mode(FailureMode::Occasional);
        let response = csp
            .meter_billing(&test_config(), &dimensions(), Utc::now(), true)
            .await
            .unwrap();
        assert!(matches!(response, MeteringResponse::Legacy(_)));
    }

    #[tokio::test]
    async fn dry_run_is_safe_to_repeat() {
        let csp = LocalCsp::new();
        for _ in 0..2 {
            let response = csp
                .meter_billing(&test_config(), &dimensions(), Utc::now(), true)
                .await;
            assert!(response.is_ok());
        }
    }

    #[tokio::test]
    async fn account_info_names_the_local_provider() {
        let csp = LocalCsp::new();
        let info = csp.get_account_info(&test_config()).await.unwrap();
        assert_eq!(info["cloud_provider"], "local");
    }
}
