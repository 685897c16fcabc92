//! Sampling the application's usage endpoint.

use csp_adapter_core::{Config, ErrorLedger, GeneralProvider, ProviderError, UsageRecord};

use crate::retry::{retry, RetryConfig};

/// Fetch one usage sample through the bound general provider.
///
/// Transient failures are retried; when the budget is spent the failure
/// lands in the ledger and the cycle proceeds without a new sample. A
/// response that does not match the record schema is dropped with a
/// warning only.
pub async fn collect_usage(
    general: &dyn GeneralProvider,
    config: &Config,
    retry_config: &RetryConfig,
    ledger: &mut ErrorLedger,
) -> Option<UsageRecord> {
    let value = match retry(retry_config, "get_usage_data", ProviderError::is_transient, || {
        general.get_usage_data(config)
    })
    .await
    {
        Ok(value) => value,
        Err(err) => {
            ledger.record(format!("Usage data retrieval failed: {err}"));
            return None;
        }
    };

    match serde_json::from_value::<UsageRecord>(value) {
        Ok(record) => {
            tracing::debug!(reporting_time = %record.reporting_time, "retrieved usage data");
            Some(record)
        }
        Err(err) => {
            tracing::warn!(error = %err, "dropping usage report with invalid schema");
            None
        }
    }
}
