//! In-process storage for tests and ephemeral runs.

use parking_lot::Mutex;

use csp_adapter_core::{ArchiveEntry, Cache, CspConfig};

use crate::error::Result;
use crate::Storage;

/// Storage that keeps all three documents in memory. State is lost when
/// the process exits, so this back-end is only suitable for tests and
/// throwaway deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Documents>,
}

#[derive(Debug, Default)]
struct Documents {
    cache: Option<Cache>,
    csp_config: Option<CspConfig>,
    archive: Vec<ArchiveEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn get_cache(&self) -> Result<Option<Cache>> {
        Ok(self.inner.lock().cache.clone())
    }

    fn save_cache(&self, cache: &Cache) -> Result<()> {
        self.inner.lock().cache = Some(cache.clone());
        Ok(())
    }

    fn get_csp_config(&self) -> Result<Option<CspConfig>> {
        Ok(self.inner.lock().csp_config.clone())
    }

    fn save_csp_config(&self, csp_config: &CspConfig) -> Result<()> {
        self.inner.lock().csp_config = Some(csp_config.clone());
        Ok(())
    }

    fn get_archive(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self.inner.lock().archive.clone())
    }

    fn save_archive(&self, archive: &[ArchiveEntry]) -> Result<()> {
        self.inner.lock().archive = archive.to_vec();
        Ok(())
    }
}
