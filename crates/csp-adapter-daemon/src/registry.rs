//! Provider discovery and binding.
//!
//! Exactly one storage, one CSP and one general provider must be bound
//! before the loop starts; registering a second provider for a slot is
//! fatal, as is leaving one empty. Composition is static: the built-in
//! back-ends are selected by name from the configuration file.

use std::sync::Arc;

use serde::Deserialize;

use csp_adapter_core::{
    config::{CspSection, StorageSection, UsageApiSection},
    CspProvider, GeneralProvider,
};
use csp_adapter_local::{FailureMode, LocalCsp, StaticUsage};
use csp_adapter_store::{FileStore, MemoryStore, Storage};

use crate::error::FatalError;
use crate::product::HttpUsage;

/// The bound capability providers the loop runs against.
#[derive(Clone)]
pub struct Providers {
    /// Persists the cache, csp-config and archive documents.
    pub storage: Arc<dyn Storage>,
    /// Submits metering calls to the CSP.
    pub csp: Arc<dyn CspProvider>,
    /// Adapter preflight and the application usage endpoint.
    pub general: Arc<dyn GeneralProvider>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

/// Collects providers during startup, rejecting duplicates.
#[derive(Default)]
pub struct ProviderRegistry {
    storage: Option<Arc<dyn Storage>>,
    csp: Option<Arc<dyn CspProvider>>,
    general: Option<Arc<dyn GeneralProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the storage provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a storage provider is already
    /// registered.
    pub fn register_storage(&mut self, provider: Arc<dyn Storage>) -> Result<(), FatalError> {
        if self.storage.is_some() {
            return Err(FatalError::Config(
                "duplicate storage provider registered".into(),
            ));
        }
        self.storage = Some(provider);
        Ok(())
    }

    /// Register the CSP provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a CSP provider is already
    /// registered.
    pub fn register_csp(&mut self, provider: Arc<dyn CspProvider>) -> Result<(), FatalError> {
        if self.csp.is_some() {
            return Err(FatalError::Config(
                "duplicate CSP provider registered".into(),
            ));
        }
        self.csp = Some(provider);
        Ok(())
    }

    /// Register the general provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a general provider is already
    /// registered.
    pub fn register_general(&mut self, provider: Arc<dyn GeneralProvider>) -> Result<(), FatalError> {
        if self.general.is_some() {
            return Err(FatalError::Config(
                "duplicate general provider registered".into(),
            ));
        }
        self.general = Some(provider);
        Ok(())
    }

    /// Finish registration, requiring one provider per slot.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when any slot is empty.
    pub fn bind(self) -> Result<Providers, FatalError> {
        Ok(Providers {
            storage: self
                .storage
                .ok_or_else(|| FatalError::Config("no storage provider registered".into()))?,
            csp: self
                .csp
                .ok_or_else(|| FatalError::Config("no CSP provider registered".into()))?,
            general: self
                .general
                .ok_or_else(|| FatalError::Config("no general provider registered".into()))?,
        })
    }
}

/// The provider-selection slice of the configuration file, read before
/// full validation so defaults from the bound general provider can be
/// merged in.
#[derive(Debug, Default, Deserialize)]
struct Wiring {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    csp: CspSection,
    #[serde(default)]
    usage_api: Option<UsageApiSection>,
}

/// Select and register the built-in providers named by the raw
/// configuration.
///
/// # Errors
///
/// Returns a configuration error for unknown provider names or a storage
/// back-end that cannot be opened.
pub fn wire_default_providers(raw: &serde_yaml::Value) -> Result<ProviderRegistry, FatalError> {
    let wiring: Wiring = if raw.is_null() {
        Wiring::default()
    } else {
        serde_yaml::from_value(raw.clone())
            .map_err(|err| FatalError::Config(err.to_string()))?
    };

    let mut registry = ProviderRegistry::new();

    match wiring.storage.provider.as_str() {
        "file" => {
            let store = FileStore::open(&wiring.storage.data_dir)
                .map_err(|err| FatalError::Config(format!("storage.data_dir: {err}")))?;
            registry.register_storage(Arc::new(store))?;
        }
        "memory" => registry.register_storage(Arc::new(MemoryStore::new()))?,
        other => {
            return Err(FatalError::Config(format!(
                "storage.provider: unknown provider '{other}'"
            )))
        }
    }

    match wiring.csp.provider.as_str() {
        "local" => registry.register_csp(Arc::new(LocalCsp::with_failure_mode(
            FailureMode::Occasional,
        )))?,
        other => {
            return Err(FatalError::Config(format!(
                "csp.provider: unknown provider '{other}'"
            )))
        }
    }

    match wiring.usage_api {
        Some(section) => {
            registry.register_general(Arc::new(HttpUsage::new(section.timeout_seconds)))?;
        }
        None => registry.register_general(Arc::new(StaticUsage::new()))?,
    }

    Ok(registry)
}
