//! Bounded exponential backoff for the adapter's external calls.
//!
//! Usage collection, CSP metering and storage writes all retry through
//! here. Retries are silent; only the final failure reaches the caller
//! and, from there, the error ledger. The whole retry budget for one
//! operation stays below the query interval so a flaky dependency cannot
//! stall the loop past its next tick.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts, not counting the initial attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Overall budget for one operation including backoffs.
    pub deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            deadline: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// A retry budget that fits inside one query interval.
    #[must_use]
    pub fn for_query_interval(query_interval_seconds: u64) -> Self {
        let deadline = Duration::from_secs((query_interval_seconds / 2).max(1));
        Self {
            deadline,
            max_backoff: deadline.min(Duration::from_secs(10)),
            ..Self::default()
        }
    }

    /// Backoff for the given zero-based attempt, with up to 25% jitter.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let backoff_ms = {
            let raw = self.initial_backoff.as_millis() as f64
                * self.backoff_multiplier.powi(attempt.try_into().unwrap_or(i32::MAX));
            raw.min(self.max_backoff.as_millis() as f64) as u64
        };

        let jitter = backoff_ms / 4 * u64::from(clock_jitter_percent()) / 100;
        Duration::from_millis(backoff_ms + jitter)
    }
}

/// Pseudo-random 0..100 derived from the clock; enough spread to keep
/// retries from synchronising, without a rand dependency.
fn clock_jitter_percent() -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos % 100
}

/// Run `operation`, retrying transient failures with exponential backoff
/// until the attempt or deadline budget is spent.
///
/// # Errors
///
/// Returns the last error once the budget is exhausted, or immediately for
/// errors `is_transient` rejects.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt = attempt + 1, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_transient(&err) {
                    tracing::warn!(operation, error = %err, "permanent failure, not retrying");
                    return Err(err);
                }
                if attempt >= config.max_retries {
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %err,
                        "failed after max retries"
                    );
                    return Err(err);
                }

                let backoff = config.backoff_duration(attempt);
                if started.elapsed() + backoff > config.deadline {
                    tracing::warn!(
                        operation,
                        error = %err,
                        "retry deadline exhausted"
                    );
                    return Err(err);
                }

                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
