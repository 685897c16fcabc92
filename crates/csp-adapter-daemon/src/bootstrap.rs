//! Adapter startup: configuration, provider preflight, and state seeding.
//!
//! Boot order matters: CSP access is verified with a dry-run metering call
//! *before* any document is written, so a misconfigured deployment fails
//! fast without leaving state behind. Only then are the cache and
//! csp-config seeded (or re-read after a restart) and handed to the loop.

use std::path::Path;

use chrono::Utc;

use csp_adapter_core::{
    Cache, Config, CspConfig, CspProvider, DimensionUnits, ProviderError,
};

use crate::biller;
use crate::error::FatalError;
use crate::event_loop::EventLoop;
use crate::registry::{self, Providers};
use crate::retry::{retry, RetryConfig};

/// Read the raw configuration file without validating it yet; the raw
/// value also feeds provider wiring and early logging setup.
///
/// # Errors
///
/// Returns a configuration error when the file cannot be read or parsed.
pub fn read_raw_config(path: &Path) -> Result<serde_yaml::Value, FatalError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| FatalError::Config(format!("{}: {err}", path.display())))?;
    serde_yaml::from_str(&contents)
        .map_err(|err| FatalError::Config(format!("{}: {err}", path.display())))
}

/// Wire the built-in providers named by the raw configuration and run the
/// full bootstrap sequence.
///
/// # Errors
///
/// Returns a configuration error for unusable configuration, a CSP access
/// error when the dry-run metering verification fails, and a runtime error
/// when preflight or the initial persists fail.
pub async fn bootstrap(raw: serde_yaml::Value) -> Result<EventLoop, FatalError> {
    let providers = registry::wire_default_providers(&raw)?.bind()?;
    bootstrap_with_providers(raw, providers).await
}

/// Run the bootstrap sequence against already-bound providers.
///
/// # Errors
///
/// See [`bootstrap`].
pub async fn bootstrap_with_providers(
    raw: serde_yaml::Value,
    providers: Providers,
) -> Result<EventLoop, FatalError> {
    let defaults = providers.general.load_defaults();
    let config = Config::from_yaml(raw, defaults)?;
    tracing::info!(
        billing_interval = ?config.billing_interval,
        query_interval = config.query_interval,
        reporting_interval = config.reporting_interval,
        metrics = config.usage_metrics.len(),
        "configuration loaded"
    );

    let retry_config = RetryConfig::for_query_interval(config.query_interval);

    retry(&retry_config, "setup_adapter", ProviderError::is_transient, || {
        providers.general.setup_adapter(&config)
    })
    .await
    .map_err(|err| FatalError::Runtime(format!("adapter setup failed: {err}")))?;

    // Verify metering access before any state exists on disk.
    metering_test(providers.csp.as_ref(), &config, &retry_config)
        .await
        .map_err(|err| FatalError::CspAccess(format!("metering test failed: {err}")))?;

    let now = Utc::now();

    let csp_config = match providers.storage.get_csp_config() {
        Ok(Some(mut existing)) => {
            tracing::info!("resuming with existing csp-config");
            existing.versions = provider_versions(&providers);
            existing
        }
        Ok(None) => seed_csp_config(&providers, &config, &retry_config).await?,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read existing csp-config, reseeding");
            seed_csp_config(&providers, &config, &retry_config).await?
        }
    };
    providers
        .storage
        .save_csp_config(&csp_config)
        .map_err(|err| FatalError::Runtime(format!("unable to save csp-config: {err}")))?;

    let cache = match providers.storage.get_cache() {
        Ok(Some(existing)) => {
            tracing::info!(
                records = existing.usage_records.len(),
                next_bill_time = %existing.next_bill_time,
                "resuming with existing cache"
            );
            existing
        }
        Ok(None) => Cache::seed(now, &config),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read existing cache, reseeding");
            Cache::seed(now, &config)
        }
    };
    providers
        .storage
        .save_cache(&cache)
        .map_err(|err| FatalError::Runtime(format!("unable to save cache: {err}")))?;

    tracing::info!("adapter setup complete");
    Ok(EventLoop::new(config, providers, cache, csp_config))
}

/// Dry-run metering of zero units against the first configured dimension.
async fn metering_test(
    csp: &dyn CspProvider,
    config: &Config,
    retry_config: &RetryConfig,
) -> Result<(), ProviderError> {
    let Some((metric, settings)) = config.usage_metrics.first() else {
        return Err(ProviderError::Permanent(
            "no usage metrics configured".into(),
        ));
    };
    let Some(dimension) = settings.dimensions.first() else {
        return Err(ProviderError::Permanent(format!(
            "metric '{metric}' has no dimensions"
        )));
    };

    let dimensions = [DimensionUnits {
        dimension: dimension.dimension.clone(),
        units: 0,
    }];
    let outcome =
        biller::submit_metering(csp, config, &dimensions, Utc::now(), true, retry_config).await?;

    if outcome.is_ok() {
        tracing::info!("metering test passed");
        Ok(())
    } else {
        Err(ProviderError::Permanent(outcome.errors.join("; ")))
    }
}

/// Build a fresh csp-config from CSP account metadata.
async fn seed_csp_config(
    providers: &Providers,
    config: &Config,
    retry_config: &RetryConfig,
) -> Result<CspConfig, FatalError> {
    let account_info = retry(retry_config, "get_account_info", ProviderError::is_transient, || {
        providers.csp.get_account_info(config)
    })
    .await
    .map_err(|err| FatalError::CspAccess(format!("unable to fetch account info: {err}")))?;

    let metadata = retry(
        retry_config,
        "get_csp_config_metadata",
        ProviderError::is_transient,
        || providers.csp.get_csp_config_metadata(config),
    )
    .await
    .map_err(|err| FatalError::CspAccess(format!("unable to fetch CSP metadata: {err}")))?;

    let customer_csp_data = serde_json::json!({
        "account_info": account_info,
        "metadata": metadata,
    });

    let mut csp_config = CspConfig::seed(Utc::now(), config, customer_csp_data);
    csp_config.versions = provider_versions(providers);
    Ok(csp_config)
}

fn provider_versions(providers: &Providers) -> std::collections::BTreeMap<String, String> {
    let mut versions = std::collections::BTreeMap::new();
    versions.insert(
        "csp-billing-adapter".into(),
        env!("CARGO_PKG_VERSION").into(),
    );
    versions.insert(
        providers.general.name().into(),
        providers.general.version().into(),
    );
    versions
}
