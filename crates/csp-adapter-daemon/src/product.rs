//! HTTP client for the application's usage endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use csp_adapter_core::{Config, GeneralProvider, ProviderError};

/// A general provider that fetches usage reports from the application's
/// HTTP usage endpoint, configured under `usage_api` in the config file.
#[derive(Debug, Clone)]
pub struct HttpUsage {
    client: Client,
}

impl HttpUsage {
    /// Build the provider with the given per-request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with
    /// default settings).
    #[must_use]
    pub fn new(timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl GeneralProvider for HttpUsage {
    fn name(&self) -> &str {
        "usage-api"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn setup_adapter(&self, _config: &Config) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_usage_data(&self, config: &Config) -> Result<serde_json::Value, ProviderError> {
        let Some(section) = config.usage_api.as_ref() else {
            return Err(ProviderError::Permanent(
                "usage_api is not configured".into(),
            ));
        };

        let response = self
            .client
            .get(&section.url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = format!("usage endpoint answered HTTP {status}");
            return if status.is_server_error() {
                Err(ProviderError::Transient(detail))
            } else {
                Err(ProviderError::Permanent(detail))
            };
        }

        response
            .json()
            .await
            .map_err(|err| ProviderError::Permanent(format!("invalid usage payload: {err}")))
    }
}

/// Timeouts and connection failures are worth retrying; anything else in
/// the transport layer is not.
fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}
