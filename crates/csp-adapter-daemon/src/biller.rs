//! Submitting metering calls and normalizing CSP responses.

use chrono::{DateTime, Utc};

use csp_adapter_core::{
    Config, CspProvider, DimensionUnits, MeteringResponse, MeteringStatus, ProviderError,
};

use crate::retry::{retry, RetryConfig};

/// Normalized outcome of one metering call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingOutcome {
    /// The CSP's record id for the submission, when one was returned.
    pub record_id: Option<String>,

    /// Per-dimension rejections; empty means the call succeeded.
    pub errors: Vec<String>,
}

impl BillingOutcome {
    /// Whether the metering call was accepted in full.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Submit a metering call with retries and normalize the response.
///
/// # Errors
///
/// Returns the provider error once the retry budget is spent; the caller
/// classifies it as a metering failure for this cycle.
pub async fn submit_metering(
    csp: &dyn CspProvider,
    config: &Config,
    dimensions: &[DimensionUnits],
    timestamp: DateTime<Utc>,
    dry_run: bool,
    retry_config: &RetryConfig,
) -> Result<BillingOutcome, ProviderError> {
    let response = retry(retry_config, "meter_billing", ProviderError::is_transient, || {
        csp.meter_billing(config, dimensions, timestamp, dry_run)
    })
    .await?;

    let outcome = normalize(response);
    tracing::info!(
        dry_run,
        record_id = ?outcome.record_id,
        rejected = outcome.errors.len(),
        "metering submitted"
    );
    Ok(outcome)
}

/// Normalize the two response shapes CSP APIs produce: a legacy bare
/// record id, or a status per submitted dimension.
#[must_use]
pub fn normalize(response: MeteringResponse) -> BillingOutcome {
    match response {
        MeteringResponse::Legacy(record_id) => BillingOutcome {
            record_id: Some(record_id),
            errors: Vec::new(),
        },
        MeteringResponse::PerDimension(statuses) => {
            let mut outcome = BillingOutcome::default();
            for (dimension, status) in statuses {
                let failed = status.status == MeteringStatus::Failed || status.error.is_some();
                if failed {
                    let detail = status.error.unwrap_or_else(|| "metering failed".into());
                    outcome.errors.push(format!("{dimension}: {detail}"));
                } else if outcome.record_id.is_none() {
                    outcome.record_id = status.record_id;
                }
            }
            outcome
        }
    }
}
