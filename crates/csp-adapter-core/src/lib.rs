//! Core types and billing logic for the CSP billing adapter.
//!
//! This crate provides everything the adapter daemon needs that does not
//! perform I/O:
//!
//! - **Configuration**: `Config`, the validated, immutable view of the
//!   operator-supplied settings
//! - **Scheduling**: calendar-correct deadline arithmetic in `sched`
//! - **Usage**: `UsageRecord` samples and the per-metric aggregation rules
//! - **Dimensions**: mapping aggregated usage onto billable CSP dimensions
//! - **Documents**: the persisted `Cache`, `CspConfig` and archive entries
//! - **Capabilities**: the `CspProvider` and `GeneralProvider` traits bound
//!   at process start
//!
//! All timestamps are RFC 3339 in UTC. Usage counts are non-negative
//! integers stored as `u64`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod archive;
pub mod cache;
pub mod config;
pub mod csp_config;
pub mod dimensions;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod sched;
pub mod usage;

pub use archive::ArchiveEntry;
pub use cache::{Cache, LastBill};
pub use config::{
    BillingInterval, BillingPeriod, Config, ConsumptionReporting, CspSection, DimensionConfig,
    LoggingSection, MetricConfig, MinConsumption, StorageSection, UsageAggregation,
    UsageApiSection, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, SUPPORTED_CONFIG_VERSIONS,
};
pub use csp_config::CspConfig;
pub use dimensions::{billing_dimensions, DimensionUnits};
pub use error::{AdapterError, Result};
pub use ledger::ErrorLedger;
pub use provider::{
    CspProvider, DimensionStatus, GeneralProvider, MeteringResponse, MeteringStatus, ProviderError,
};
pub use usage::{billable_usage, UsageRecord, UsageValue};
