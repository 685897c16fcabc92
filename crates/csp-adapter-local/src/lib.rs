//! Local test providers for the CSP billing adapter.
//!
//! These providers stand in for a real cloud marketplace and a real
//! application usage endpoint, so the adapter can run end-to-end on a
//! laptop or in CI. [`LocalCsp`] answers metering calls with generated
//! record ids and can inject the failure shapes real CSP APIs produce;
//! [`StaticUsage`] serves a plausible usage report for every configured
//! metric.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod csp;
pub mod usage;

pub use csp::{FailureMode, LocalCsp};
pub use usage::StaticUsage;

/// Pseudo-random value in `0..bound` derived from the clock, good enough
/// for failure injection and sample jitter without a rand dependency.
pub(crate) fn clock_roll(bound: u32) -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos % bound.max(1)
}
