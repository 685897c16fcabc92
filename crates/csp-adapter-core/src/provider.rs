//! Capability traits bound at process start.
//!
//! The adapter core talks to the outside world through three capabilities:
//! storage (defined in the store crate), the CSP metering API, and the
//! "general" capability covering adapter preflight and the application's
//! usage endpoint. Exactly one provider per capability is bound when the
//! process starts; there is no runtime plugin loading.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dimensions::DimensionUnits;

/// Errors raised by CSP and General providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The operation may succeed if retried (network failure, timeout,
    /// server-side 5xx).
    #[error("{0}")]
    Transient(String),

    /// Retrying will not help (rejected request, invalid credentials).
    #[error("{0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether the retry policy should attempt this operation again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Raw response of a CSP metering call, before normalization.
///
/// Older CSP APIs answer with a bare record id; newer ones report a status
/// per submitted dimension. The biller normalizes both shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeteringResponse {
    /// Legacy shape: the record id as a plain string.
    Legacy(String),

    /// Structured shape: one status per submitted dimension.
    PerDimension(BTreeMap<String, DimensionStatus>),
}

/// Outcome of metering one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionStatus {
    /// Whether the dimension was accepted.
    pub status: MeteringStatus,

    /// The CSP's record id for the accepted dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Error detail for a rejected dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeteringStatus {
    /// The dimension was accepted by the CSP.
    Succeeded,
    /// The dimension was rejected.
    Failed,
}

/// The CSP metering capability.
#[async_trait]
pub trait CspProvider: Send + Sync {
    /// The provider's name, recorded in csp-config at boot.
    fn name(&self) -> &str;

    /// Submit a metering call for the given dimension vector.
    ///
    /// With `dry_run` set the CSP validates access without charging; the
    /// bootstrap uses this to verify metering works before the loop starts.
    ///
    /// # Errors
    ///
    /// Returns a transient error for retryable failures and a permanent
    /// error otherwise.
    async fn meter_billing(
        &self,
        config: &Config,
        dimensions: &[DimensionUnits],
        timestamp: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<MeteringResponse, ProviderError>;

    /// Opaque CSP metadata recorded in csp-config at boot.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the metadata cannot be gathered.
    async fn get_csp_config_metadata(
        &self,
        config: &Config,
    ) -> Result<serde_json::Value, ProviderError>;

    /// CSP account details recorded in csp-config at boot.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the account cannot be resolved.
    async fn get_account_info(&self, config: &Config) -> Result<serde_json::Value, ProviderError>;
}

/// The general capability: adapter preflight and the usage endpoint.
#[async_trait]
pub trait GeneralProvider: Send + Sync {
    /// The provider's name, recorded in csp-config at boot.
    fn name(&self) -> &str;

    /// The provider's version, recorded in csp-config at boot.
    fn version(&self) -> &str;

    /// Baseline configuration defaults merged under the operator file.
    fn load_defaults(&self) -> serde_yaml::Value {
        serde_yaml::Value::Null
    }

    /// Idempotent preflight run once before the loop starts.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the environment is not usable.
    async fn setup_adapter(&self, config: &Config) -> Result<(), ProviderError>;

    /// Fetch the current usage report from the application.
    ///
    /// The returned value must carry `reporting_time` and `base_product`
    /// plus one entry per configured metric; the collector validates this.
    ///
    /// # Errors
    ///
    /// Returns a transient error for retryable failures and a permanent
    /// error otherwise.
    async fn get_usage_data(&self, config: &Config) -> Result<serde_json::Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_response_parses_from_a_bare_string() {
        let response: MeteringResponse = serde_json::from_value(serde_json::json!("abc123")).unwrap();
        assert_eq!(response, MeteringResponse::Legacy("abc123".into()));
    }

    #[test]
    fn structured_response_parses_per_dimension() {
        let response: MeteringResponse = serde_json::from_value(serde_json::json!({
            "dim_1": { "status": "succeeded", "record_id": "rec-1" },
            "dim_2": { "status": "failed", "error": "throttled" },
        }))
        .unwrap();

        let MeteringResponse::PerDimension(statuses) = response else {
            panic!("expected a per-dimension response");
        };
        assert_eq!(statuses["dim_1"].status, MeteringStatus::Succeeded);
        assert_eq!(statuses["dim_1"].record_id.as_deref(), Some("rec-1"));
        assert_eq!(statuses["dim_2"].status, MeteringStatus::Failed);
        assert_eq!(statuses["dim_2"].error.as_deref(), Some("throttled"));
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ProviderError::Transient("timeout".into()).is_transient());
        assert!(!ProviderError::Permanent("denied".into()).is_transient());
    }
}
