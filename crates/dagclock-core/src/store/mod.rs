//! Storage for highest-before vectors.
//!
//! Three tiers, leaves first:
//!
//! - [`KvStore`]: the persistent ordered byte-key store supplied by the node
//!   ([`MemoryStore`] and [`SqliteStore`] are provided).
//! - [`BackedMap`]: resident LRU cache over a [`KvStore`] with a byte
//!   budget; [`BackedMap::unload_to_budget`] spills the coldest entries.
//! - [`OverlayStore`]: pending-write buffer over a [`BackedMap`], the only
//!   type the index talks to.
//!
//! The overlay only ever puts and point-reads. Delete, iteration, snapshots,
//! caller-side batches and compaction are not part of its API.

pub mod backed;
pub mod memory;
pub mod overlay;
pub mod sqlite;

pub use backed::BackedMap;
pub use memory::MemoryStore;
pub use overlay::OverlayStore;
pub use sqlite::SqliteStore;

use crate::error::ErrorCode;

/// Approximate per-entry overhead of a resident hash map entry, in bytes.
pub const MAP_ENTRY_OVERHEAD: usize = 100;

/// Memory estimate charged for one key/value pair.
#[must_use]
pub const fn entry_mem_est(key_len: usize, value_len: usize) -> usize {
    MAP_ENTRY_OVERHEAD + key_len + value_len
}

/// Errors from the storage tiers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector store is closed")]
    Closed,

    #[error("vector store: key is empty")]
    EmptyKey,

    #[error("vector store: value is empty")]
    EmptyValue,

    /// Error from the persistent store, passed through untouched.
    #[error("persistent store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::backend(err)
    }
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Closed => ErrorCode::StoreClosed,
            Self::EmptyKey => ErrorCode::EmptyKey,
            Self::EmptyValue => ErrorCode::EmptyValue,
            Self::Backend(_) => ErrorCode::BackendFailure,
        }
    }
}

/// Persistent ordered byte-key/byte-value store beneath the overlay.
///
/// Implementations provide their own durability; the overlay never retries.
pub trait KvStore {
    /// Point read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Point write, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Existence check.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Write several pairs at once. Backends with transactions should
    /// override this to write them atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn write_batch(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Release the backend handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
