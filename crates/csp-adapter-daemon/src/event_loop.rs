//! The billing control loop.
//!
//! One cooperative task owns all mutable state and drives the same steps
//! every tick: collect a usage sample, decide whether this tick reports a
//! heartbeat or submits a bill, archive a successful bill, then persist
//! the cache followed by csp-config. The persist order is the external
//! consistency contract: a reader that sees a bill in csp-config can trust
//! the cache already reflects the new billing window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use csp_adapter_core::{
    archive, billable_usage, billing_dimensions, sched, AdapterError, ArchiveEntry, Cache, Config,
    CspConfig, DimensionUnits, ErrorLedger, UsageRecord,
};


use crate::biller;
use crate::collector;
use crate::error::FatalError;
use crate::registry::Providers;
use crate::retry::{retry, RetryConfig};

/// What a single cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// A new usage sample was appended to the cache.
    pub sampled: bool,
    /// The metering step taken this cycle, if any.
    pub metering: Option<MeteringKind>,
    /// Whether that metering step succeeded.
    pub metering_succeeded: bool,
}

/// Which metering step a cycle performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeteringKind {
    /// A reporting-cadence heartbeat; state is not cleared.
    Heartbeat,
    /// A billable submission closing the current billing window.
    Billing,
}

/// The adapter's event loop and the state it owns.
pub struct EventLoop {
    config: Config,
    providers: Providers,
    retry_config: RetryConfig,
    cache: Cache,
    csp_config: CspConfig,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("config", &self.config)
            .field("retry_config", &self.retry_config)
            .field("cache", &self.cache)
            .field("csp_config", &self.csp_config)
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    /// Build the loop around bootstrapped state.
    #[must_use]
    pub fn new(config: Config, providers: Providers, cache: Cache, csp_config: CspConfig) -> Self {
        let retry_config = RetryConfig::for_query_interval(config.query_interval);
        Self {
            config,
            providers,
            retry_config,
            cache,
            csp_config,
        }
    }

    /// The loop's current cache state.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The loop's current csp-config state.
    #[must_use]
    pub fn csp_config(&self) -> &CspConfig {
        &self.csp_config
    }

    /// Run until `shutdown` resolves. The initial wait gives the
    /// application one query interval to produce its first sample; after
    /// that each cycle sleeps only the remainder of the interval, so
    /// processing time does not stretch the cadence.
    ///
    /// # Errors
    ///
    /// Returns a fatal runtime error when a cycle fails unexpectedly; a
    /// best-effort persist has already recorded the failure in csp-config.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), FatalError> {
        tokio::pin!(shutdown);
        let query_interval = Duration::from_secs(self.config.query_interval);

        tracing::info!(
            seconds = self.config.query_interval,
            "waiting one query interval before the first cycle"
        );
        tokio::select! {
            () = tokio::time::sleep(query_interval) => {}
            () = &mut shutdown => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
        }

        loop {
            let start = Utc::now();
            match self.run_cycle(start).await {
                Ok(outcome) => {
                    tracing::info!(start = %start, ?outcome, "processed event loop cycle");
                }
                Err(err) => {
                    tracing::error!(error = %err, "unexpected error, terminating");
                    self.crash_persist(start, &err);
                    return Err(FatalError::Runtime(err.to_string()));
                }
            }

            let elapsed = (Utc::now() - start).to_std().unwrap_or_default();
            let remainder = query_interval.saturating_sub(elapsed);
            tracing::debug!(
                seconds = remainder.as_secs_f64(),
                "sleeping until the next query deadline"
            );
            tokio::select! {
                () = tokio::time::sleep(remainder) => {}
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, exiting after completed cycle");
                    return Ok(());
                }
            }
        }
    }

    /// Process one tick at `now`: collect, report or bill when a deadline
    /// has passed, then persist. Expected failures land in the cycle's
    /// ledger and surface through csp-config.
    ///
    /// # Errors
    ///
    /// Returns only errors the loop does not know how to absorb; the
    /// caller terminates the process on them.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, AdapterError> {
        tracing::info!(now = %now, "starting event loop cycle");
        let mut ledger = ErrorLedger::new();
        let mut outcome = CycleOutcome::default();

        tracing::debug!(state = "collecting");
        if let Some(record) = collector::collect_usage(
            self.providers.general.as_ref(),
            &self.config,
            &self.retry_config,
            &mut ledger,
        )
        .await
        {
            self.csp_config.base_product = record.base_product.clone();
            outcome.sampled = self.cache.add_usage_record(record);
        }

        tracing::debug!(
            now = %now,
            next_reporting_time = %self.cache.next_reporting_time,
            next_bill_time = %self.cache.next_bill_time,
            "deadline check"
        );

        if now >= self.cache.next_bill_time {
            tracing::info!(state = "billing", "attempting a billing cycle update");
            outcome.metering = Some(MeteringKind::Billing);
            outcome.metering_succeeded = self
                .process_metering(now, MeteringKind::Billing, &mut ledger)
                .await?;
        } else if now >= self.cache.next_reporting_time {
            tracing::info!(state = "reporting", "attempting a reporting cycle update");
            outcome.metering = Some(MeteringKind::Heartbeat);
            outcome.metering_succeeded = self
                .process_metering(now, MeteringKind::Heartbeat, &mut ledger)
                .await?;
        }

        self.persist(now, ledger).await;
        Ok(outcome)
    }

    /// Aggregate the billing window, map it to dimensions, and submit.
    /// Returns whether the submission succeeded.
    async fn process_metering(
        &mut self,
        now: DateTime<Utc>,
        kind: MeteringKind,
        ledger: &mut ErrorLedger,
    ) -> Result<bool, AdapterError> {
        let heartbeat = kind == MeteringKind::Heartbeat;
        let period = self.config.billing_period();

        // Select the records inside the billing window that ends at
        // next_bill_time; anything outside it survives a successful bill.
        let window_end = self.cache.next_bill_time;
        let window_start = sched::prev_bill_time(window_end, period);
        let (billable_records, remaining_records): (Vec<UsageRecord>, Vec<UsageRecord>) = self
            .cache
            .usage_records
            .iter()
            .cloned()
            .partition(|record| {
                record.reporting_time >= window_start && record.reporting_time < window_end
            });

        let empty_usage = heartbeat && !self.config.reporting_api_is_cumulative;
        let billable = billable_usage(&billable_records, &self.config, empty_usage, ledger);

        let dimensions = match billing_dimensions(&self.config, &billable) {
            Ok(dimensions) => dimensions,
            Err(
                err @ (AdapterError::NoMatchingVolumeDimension { .. }
                | AdapterError::VolumeUsageNotScalar { .. }),
            ) => {
                // A mapping error skips this cycle's metering with state
                // unchanged; it is a configuration problem, not an API one.
                ledger.record(err.to_string());
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let submitted = biller::submit_metering(
            self.providers.csp.as_ref(),
            &self.config,
            &dimensions,
            now,
            false,
            &self.retry_config,
        )
        .await;

        let outcome = match submitted {
            Ok(outcome) => outcome,
            Err(err) => {
                ledger.record(err.to_string());
                self.csp_config.billing_api_access_ok = false;
                return Ok(false);
            }
        };
        if !outcome.is_ok() {
            for error in &outcome.errors {
                ledger.record(error.clone());
            }
            self.csp_config.billing_api_access_ok = false;
            return Ok(false);
        }

        self.cache.next_reporting_time = sched::date_delta(
            now,
            i64::try_from(self.config.reporting_interval).unwrap_or(i64::MAX),
        );
        self.csp_config.billing_api_access_ok = true;

        if !heartbeat {
            let next_bill_time = sched::next_bill_time(window_end, period);
            tracing::debug!(next_bill_time = %next_bill_time, "billable metering submitted");

            self.cache.record_bill(
                outcome.record_id.unwrap_or_default(),
                dimensions.clone(),
                now,
                next_bill_time,
                remaining_records,
            );
            self.csp_config.usage = Some(billable);
            self.csp_config.last_billed = Some(now);

            self.archive_bill(now, dimensions, billable_records, ledger);
        }

        Ok(true)
    }

    /// Append the billed cycle to the archive and prune expired history.
    fn archive_bill(
        &mut self,
        billed_at: DateTime<Utc>,
        dimensions: Vec<DimensionUnits>,
        snapshot: Vec<UsageRecord>,
        ledger: &mut ErrorLedger,
    ) {
        tracing::debug!(state = "archiving");
        let mut stored = match self.providers.storage.get_archive() {
            Ok(stored) => stored,
            Err(err) => {
                ledger.record(format!("Archive failed to load: {err}"));
                return;
            }
        };

        archive::append_and_prune(
            &mut stored,
            ArchiveEntry {
                billed_at,
                dimensions,
                usage_records_snapshot: snapshot,
            },
            self.config.archive_retention_period,
            billed_at,
        );

        if let Err(err) = self.providers.storage.save_archive(&stored) {
            ledger.record(format!("Archive failed to save: {err}"));
        }
    }

    /// Persist the cache, then csp-config, in that order. A cache failure
    /// is recoverable and lands in the ledger; a csp-config failure can
    /// only be logged.
    async fn persist(&mut self, now: DateTime<Utc>, ledger: ErrorLedger) {
        tracing::debug!(state = "persisting");
        let mut ledger = ledger;

        let storage = Arc::clone(&self.providers.storage);
        let cache = self.cache.clone();
        let saved = retry(&self.retry_config, "save_cache", |_| true, || {
            let storage = Arc::clone(&storage);
            let cache = cache.clone();
            async move { storage.save_cache(&cache) }
        })
        .await;
        if let Err(err) = saved {
            ledger.record(format!("Cache failed to save: {err}"));
        }

        self.csp_config.stamp(now, self.config.query_interval);
        self.csp_config.errors = ledger.into_entries();

        let storage = Arc::clone(&self.providers.storage);
        let csp_config = self.csp_config.clone();
        let saved = retry(&self.retry_config, "save_csp_config", |_| true, || {
            let storage = Arc::clone(&storage);
            let csp_config = csp_config.clone();
            async move { storage.save_csp_config(&csp_config) }
        })
        .await;
        if let Err(err) = saved {
            tracing::warn!(error = %err, "failed to save csp-config");
        }
    }

    /// Best-effort persist on the way down after an unexpected error.
    fn crash_persist(&mut self, now: DateTime<Utc>, err: &AdapterError) {
        let mut ledger = ErrorLedger::new();
        ledger.record(format!("Unexpected error: {err}"));
        self.csp_config.stamp(now, self.config.query_interval);
        self.csp_config.errors = ledger.into_entries();

        if let Err(err) = self.providers.storage.save_cache(&self.cache) {
            tracing::warn!(error = %err, "failed to persist cache during shutdown");
        }
        if let Err(err) = self.providers.storage.save_csp_config(&self.csp_config) {
            tracing::warn!(error = %err, "failed to persist csp-config during shutdown");
        }
    }
}
