//! Storage facade for the CSP billing adapter.
//!
//! The adapter persists three documents: the private `cache`, the
//! externally readable `csp-config`, and the `archive` of billed cycles.
//! This crate defines the [`Storage`] trait the control loop writes
//! through, plus two back-ends:
//!
//! - [`FileStore`]: JSON documents on local disk, replaced atomically so a
//!   partially-written document is never observed
//! - [`MemoryStore`]: in-process storage for tests and ephemeral runs
//!
//! The control loop is the sole writer and serialises all writes, so the
//! facade does not provide cross-document transactions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod file;
pub mod memory;

pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;

use csp_adapter_core::{ArchiveEntry, Cache, CspConfig};

/// The storage capability bound at process start.
///
/// Implementations must guarantee that a reader never observes a
/// partially-written document.
pub trait Storage: Send + Sync {
    /// Read the cache document.
    ///
    /// # Errors
    ///
    /// Returns an error when the back-end fails; an absent document is
    /// `Ok(None)`.
    fn get_cache(&self) -> Result<Option<Cache>>;

    /// Atomically replace the cache document.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn save_cache(&self, cache: &Cache) -> Result<()>;

    /// Read the csp-config document.
    ///
    /// # Errors
    ///
    /// Returns an error when the back-end fails; an absent document is
    /// `Ok(None)`.
    fn get_csp_config(&self) -> Result<Option<CspConfig>>;

    /// Atomically replace the csp-config document.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn save_csp_config(&self, csp_config: &CspConfig) -> Result<()>;

    /// Read the archive; an absent archive is empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the back-end fails.
    fn get_archive(&self) -> Result<Vec<ArchiveEntry>>;

    /// Atomically replace the archive.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    fn save_archive(&self, archive: &[ArchiveEntry]) -> Result<()>;

    /// Read-modify-write the cache document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no cache exists yet, or the
    /// underlying read/write error.
    fn update_cache(&self, mutate: &mut dyn FnMut(&mut Cache)) -> Result<()> {
        let mut cache = self.get_cache()?.ok_or(StoreError::NotFound)?;
        mutate(&mut cache);
        self.save_cache(&cache)
    }

    /// Read-modify-write the csp-config document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no csp-config exists yet, or
    /// the underlying read/write error.
    fn update_csp_config(&self, mutate: &mut dyn FnMut(&mut CspConfig)) -> Result<()> {
        let mut csp_config = self.get_csp_config()?.ok_or(StoreError::NotFound)?;
        mutate(&mut csp_config);
        self.save_csp_config(&csp_config)
    }
}
