//! JSON documents on local disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use csp_adapter_core::{ArchiveEntry, Cache, CspConfig};

use crate::error::Result;
use crate::Storage;

const CACHE_FILE: &str = "cache.json";
const CSP_CONFIG_FILE: &str = "csp-config.json";
const ARCHIVE_FILE: &str = "archive.json";

/// File-backed storage: one pretty-printed JSON file per document inside a
/// data directory, so operator tooling can read csp-config directly.
///
/// Writes go through a temp file in the same directory followed by an
/// atomic rename; a crash mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Open the store, creating the data directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.data_dir.join(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write_document<T: Serialize>(&self, name: &str, document: &T) -> Result<()> {
        let path = self.data_dir.join(name);
        let temp = NamedTempFile::new_in(&self.data_dir)?;
        serde_json::to_writer_pretty(&temp, document)?;
        temp.persist(&path).map_err(|err| err.error)?;
        tracing::debug!(path = %path.display(), "persisted document");
        Ok(())
    }

    /// The path of the externally readable csp-config document.
    #[must_use]
    pub fn csp_config_path(&self) -> PathBuf {
        self.data_dir.join(CSP_CONFIG_FILE)
    }

    /// The data directory this store writes into.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Storage for FileStore {
    fn get_cache(&self) -> Result<Option<Cache>> {
        self.read_document(CACHE_FILE)
    }

    fn save_cache(&self, cache: &Cache) -> Result<()> {
        self.write_document(CACHE_FILE, cache)
    }

    fn get_csp_config(&self) -> Result<Option<CspConfig>> {
        self.read_document(CSP_CONFIG_FILE)
    }

    fn save_csp_config(&self, csp_config: &CspConfig) -> Result<()> {
        self.write_document(CSP_CONFIG_FILE, csp_config)
    }

    fn get_archive(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(self.read_document(ARCHIVE_FILE)?.unwrap_or_default())
    }

    fn save_archive(&self, archive: &[ArchiveEntry]) -> Result<()> {
        self.write_document(ARCHIVE_FILE, &archive)
    }
}
