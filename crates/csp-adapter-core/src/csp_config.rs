//! The adapter's externally readable status document.
//!
//! Operator tooling polls this document to judge adapter health: a stale
//! `expire` means the adapter stopped ticking, `billing_api_access_ok =
//! false` with errors means degraded, errors alone mean warning. The
//! adapter writes it last in every cycle, so a reader that sees a bill
//! reflected here can trust the cache already records it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::sched;
use crate::usage::UsageValue;

/// The persisted csp-config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CspConfig {
    /// When the adapter last completed a cycle.
    pub timestamp: DateTime<Utc>,

    /// When this document stops being trustworthy; a reader observing
    /// `expire < now` infers adapter failure.
    pub expire: DateTime<Utc>,

    /// Whether the last CSP metering attempt succeeded.
    pub billing_api_access_ok: bool,

    /// Errors from the most recent cycle, replaced wholesale each cycle.
    #[serde(default)]
    pub errors: Vec<String>,

    /// When the last bill was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_billed: Option<DateTime<Utc>>,

    /// The per-metric usage reported in the last bill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<IndexMap<String, UsageValue>>,

    /// Opaque CSP account metadata gathered at boot.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub customer_csp_data: serde_json::Value,

    /// CPE identifier of the product the usage belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_product: String,

    /// Versions of the bound providers, recorded at boot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<String, String>,
}

impl CspConfig {
    /// Seed a fresh csp-config at `now` with the CSP account metadata
    /// gathered during bootstrap.
    #[must_use]
    pub fn seed(now: DateTime<Utc>, config: &Config, customer_csp_data: serde_json::Value) -> Self {
        Self {
            timestamp: now,
            expire: sched::config_expire(now, config.query_interval),
            billing_api_access_ok: true,
            errors: Vec::new(),
            last_billed: None,
            usage: None,
            customer_csp_data,
            base_product: String::new(),
            versions: BTreeMap::new(),
        }
    }

    /// Stamp the document for this cycle's persist: refresh `timestamp`
    /// and push `expire` one query interval (plus slack) into the future.
    pub fn stamp(&mut self, now: DateTime<Utc>, query_interval: u64) {
        self.timestamp = now;
        self.expire = sched::config_expire(now, query_interval);
    }
}
