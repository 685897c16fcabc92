//! Shared harness for daemon integration tests: recording storage and
//! scripted CSP/usage providers.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use csp_adapter_core::{
    Cache, Config, CspConfig, CspProvider, DimensionUnits, GeneralProvider, MeteringResponse,
    ProviderError, UsageRecord, UsageValue,
};
use csp_adapter_daemon::{EventLoop, Providers};
use csp_adapter_store::{MemoryStore, Result as StoreResult, Storage};

pub const BASE_PRODUCT: &str = "cpe:/o:example:product:v1.0.0";

/// Storage that records the order of operations performed against it.
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryStore,
    pub ops: Mutex<Vec<&'static str>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().clone()
    }

    pub fn saves(&self) -> Vec<&'static str> {
        self.ops
            .lock()
            .iter()
            .copied()
            .filter(|op| op.starts_with("save"))
            .collect()
    }
}

impl Storage for RecordingStorage {
    fn get_cache(&self) -> StoreResult<Option<Cache>> {
        self.ops.lock().push("get_cache");
        self.inner.get_cache()
    }

    fn save_cache(&self, cache: &Cache) -> StoreResult<()> {
        self.ops.lock().push("save_cache");
        self.inner.save_cache(cache)
    }

    fn get_csp_config(&self) -> StoreResult<Option<CspConfig>> {
        self.ops.lock().push("get_csp_config");
        self.inner.get_csp_config()
    }

    fn save_csp_config(&self, csp_config: &CspConfig) -> StoreResult<()> {
        self.ops.lock().push("save_csp_config");
        self.inner.save_csp_config(csp_config)
    }

    fn get_archive(&self) -> StoreResult<Vec<csp_adapter_core::ArchiveEntry>> {
        self.ops.lock().push("get_archive");
        self.inner.get_archive()
    }

    fn save_archive(&self, archive: &[csp_adapter_core::ArchiveEntry]) -> StoreResult<()> {
        self.ops.lock().push("save_archive");
        self.inner.save_archive(archive)
    }
}

/// A metering call observed by the scripted CSP.
#[derive(Debug, Clone)]
pub struct MeterCall {
    pub dimensions: Vec<DimensionUnits>,
    pub dry_run: bool,
}

/// CSP provider answering from a script; succeeds when the script runs dry.
#[derive(Default)]
pub struct ScriptedCsp {
    responses: Mutex<VecDeque<Result<MeteringResponse, ProviderError>>>,
    pub calls: Mutex<Vec<MeterCall>>,
}

impl ScriptedCsp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<MeteringResponse, ProviderError>) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> Vec<MeterCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CspProvider for ScriptedCsp {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn meter_billing(
        &self,
        _config: &Config,
        dimensions: &[DimensionUnits],
        _timestamp: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<MeteringResponse, ProviderError> {
        let call_number = {
            let mut calls = self.calls.lock();
            calls.push(MeterCall {
                dimensions: dimensions.to_vec(),
                dry_run,
            });
            calls.len()
        };

        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(MeteringResponse::Legacy(format!("record-{call_number}"))),
        }
    }

    async fn get_csp_config_metadata(
        &self,
        _config: &Config,
    ) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({ "marketplace": "scripted" }))
    }

    async fn get_account_info(&self, _config: &Config) -> Result<serde_json::Value, ProviderError> {
        Ok(serde_json::json!({ "account_id": "test-account" }))
    }
}

/// General provider answering usage queries from a script; fabricates a
/// fresh sample when the script runs dry.
#[derive(Default)]
pub struct ScriptedUsage {
    responses: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    setup_error: Mutex<Option<String>>,
}

impl ScriptedUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<serde_json::Value, ProviderError>) {
        self.responses.lock().push_back(response);
    }

    /// Make `setup_adapter` fail with the given detail.
    pub fn fail_setup(&self, detail: &str) {
        *self.setup_error.lock() = Some(detail.to_string());
    }
}

#[async_trait]
impl GeneralProvider for ScriptedUsage {
    fn name(&self) -> &str {
        "scripted-usage"
    }

    fn version(&self) -> &str {
        "0.0.0-test"
    }

    async fn setup_adapter(&self, _config: &Config) -> Result<(), ProviderError> {
        match self.setup_error.lock().clone() {
            Some(detail) => Err(ProviderError::Permanent(detail)),
            None => Ok(()),
        }
    }

    async fn get_usage_data(&self, _config: &Config) -> Result<serde_json::Value, ProviderError> {
        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(usage_json(9, Utc::now())),
        }
    }
}

/// A usage endpoint payload for the test metric.
pub fn usage_json(count: u64, reporting_time: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "managed_node_count": count,
        "reporting_time": reporting_time.to_rfc3339(),
        "base_product": BASE_PRODUCT,
    })
}

/// A usage record for pre-seeding the cache.
pub fn usage_record(count: u64, reporting_time: DateTime<Utc>) -> UsageRecord {
    UsageRecord {
        reporting_time,
        base_product: BASE_PRODUCT.into(),
        metrics: [("managed_node_count".to_string(), UsageValue::Count(count))].into(),
    }
}

/// The test configuration: one tiered metric, monthly billing, hourly
/// reporting, five-minute sampling.
pub fn test_config_yaml() -> serde_yaml::Value {
    serde_yaml::from_str(
        r"
        version: 1.1.0
        billing_interval: monthly
        query_interval: 300
        reporting_interval: 3600
        product_code: example-product
        usage_metrics:
          managed_node_count:
            usage_aggregation: maximum
            consumption_reporting: tiered
            dimensions:
              - dimension: dim_1
                min: 0
                max: 30
              - dimension: dim_2
                min: 31
                max: 40
              - dimension: dim_3
                min: 41
        ",
    )
    .unwrap()
}

pub fn test_config() -> Config {
    Config::from_yaml(test_config_yaml(), serde_yaml::Value::Null).unwrap()
}

pub struct Harness {
    pub storage: Arc<RecordingStorage>,
    pub csp: Arc<ScriptedCsp>,
    pub usage: Arc<ScriptedUsage>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RecordingStorage::new()),
            csp: Arc::new(ScriptedCsp::new()),
            usage: Arc::new(ScriptedUsage::new()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            storage: self.storage.clone(),
            csp: self.csp.clone(),
            general: self.usage.clone(),
        }
    }

    /// An event loop over the harness providers with the given cache.
    pub fn event_loop(&self, config: &Config, cache: Cache) -> EventLoop {
        let csp_config = CspConfig::seed(cache.adapter_start_time, config, serde_json::Value::Null);
        EventLoop::new(config.clone(), self.providers(), cache, csp_config)
    }
}
