//! Append/overwrite-only overlay for the vector index.
//!
//! Writes accumulate in a pending map until [`OverlayStore::flush`] moves
//! them into the [`BackedMap`], which then spills its coldest entries to the
//! persistent store to honour its byte budget. `put` never fails because of
//! memory pressure; only `flush` bounds memory. Within one flush, pending
//! entries enter the cache in key order.

use std::collections::HashMap;

use tracing::debug;

use super::{BackedMap, KvStore, StoreError, entry_mem_est};

/// Bounded-memory overlay over a persistent [`KvStore`].
#[derive(Debug)]
pub struct OverlayStore<S> {
    /// `None` once closed.
    pending: Option<HashMap<Vec<u8>, Vec<u8>>>,
    backing: BackedMap<S>,
    mem_size: usize,
}

impl<S: KvStore> OverlayStore<S> {
    /// Wrap `parent` with a resident budget of `cache_size` estimated bytes,
    /// spilling to it in batches of about `batch_size` bytes.
    pub fn new(parent: S, cache_size: usize, batch_size: usize) -> Self {
        Self {
            pending: Some(HashMap::new()),
            backing: BackedMap::new(parent, cache_size, batch_size),
            mem_size: 0,
        }
    }

    /// Record a pending write, replacing any earlier pending value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyKey`] / [`StoreError::EmptyValue`] for
    /// empty input and [`StoreError::Closed`] after [`Self::close`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let pending = self.pending.as_mut().ok_or(StoreError::Closed)?;
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        if value.is_empty() {
            return Err(StoreError::EmptyValue);
        }
        pending.insert(key.to_vec(), value.to_vec());
        self.mem_size += entry_mem_est(key.len(), value.len());
        Ok(())
    }

    /// Pending value, else the backing cache, else the persistent store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after [`Self::close`], or the backing
    /// store's error unchanged.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let pending = self.pending.as_ref().ok_or(StoreError::Closed)?;
        if let Some(value) = pending.get(key) {
            return Ok(Some(value.clone()));
        }
        self.backing.get(key)
    }

    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        let pending = self.pending.as_ref().ok_or(StoreError::Closed)?;
        if pending.contains_key(key) {
            return Ok(true);
        }
        self.backing.has(key)
    }

    /// Move pending writes into the backing cache and unload it to budget.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after [`Self::close`], or the
    /// persistent store's write error. On error the pending set is kept
    /// empty and the unspilled entries stay resident in the backing cache.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let pending = self.pending.as_mut().ok_or(StoreError::Closed)?;
        // key order keeps the spill order reproducible across runs
        let mut drained: Vec<_> = pending.drain().collect();
        drained.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let pairs = drained.len();
        for (key, value) in drained {
            self.backing.add(key, value);
        }
        self.mem_size = 0;

        let unloaded = self.backing.unload_to_budget()?;
        debug!(
            pairs,
            unloaded,
            resident = self.backing.resident_len(),
            resident_size = self.backing.resident_size(),
            "flushed vector overlay"
        );
        Ok(())
    }

    /// Discard pending writes.
    pub fn drop_not_flushed(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.clear();
        }
        self.mem_size = 0;
    }

    /// Discard pending writes, drop the backing cache and close the
    /// persistent store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if already closed, or the persistent
    /// store's close error.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.pending.is_none() {
            return Err(StoreError::Closed);
        }
        self.drop_not_flushed();
        self.pending = None;
        self.backing.close()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.pending.is_none()
    }

    /// Number of pending pairs.
    #[must_use]
    pub fn not_flushed_pairs(&self) -> usize {
        self.pending.as_ref().map_or(0, HashMap::len)
    }

    /// Estimated bytes held by pending pairs, counting overwrites.
    #[must_use]
    pub const fn not_flushed_size_est(&self) -> usize {
        self.mem_size
    }

    /// The resident tier, for inspection.
    #[must_use]
    pub const fn backing(&self) -> &BackedMap<S> {
        &self.backing
    }
}
