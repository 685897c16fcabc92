//! The CSP billing adapter daemon.
//!
//! A long-running adapter between a metered application and its cloud
//! service provider's billing API. The daemon samples the application's
//! usage endpoint, aggregates samples over the configured billing window,
//! maps the aggregate onto priced marketplace dimensions, and submits
//! metering calls at the configured cadence, persisting enough state that
//! a restart resumes in the right place.
//!
//! The binary wires one storage, one CSP and one general provider at
//! startup, verifies CSP access with a dry-run metering call, and then
//! hands control to the single-task event loop.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod biller;
pub mod bootstrap;
pub mod collector;
pub mod error;
pub mod event_loop;
pub mod logging;
pub mod product;
pub mod registry;
pub mod retry;

pub use error::FatalError;
pub use event_loop::{CycleOutcome, EventLoop, MeteringKind};
pub use registry::{ProviderRegistry, Providers};
