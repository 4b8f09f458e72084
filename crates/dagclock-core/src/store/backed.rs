//! Resident LRU cache over a [`KvStore`] with a byte budget.
//!
//! Entries added here have not reached the persistent store yet. They stay
//! resident until [`BackedMap::unload_to_budget`] spills the least recently
//! used ones, in batches, to the parent store. Reads that miss the cache
//! fall through to the parent and are not cached.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::{KvStore, StoreError, entry_mem_est};

#[derive(Debug)]
struct Resident {
    value: Vec<u8>,
    tick: u64,
}

/// Byte-budgeted LRU cache in front of a persistent [`KvStore`].
#[derive(Debug)]
pub struct BackedMap<S> {
    parent: Option<S>,
    cache: HashMap<Vec<u8>, Resident>,
    /// recency tick -> key, oldest first
    lru: BTreeMap<u64, Vec<u8>>,
    tick: u64,
    mem_size: usize,
    size_limit: usize,
    batch_size: usize,
}

impl<S: KvStore> BackedMap<S> {
    /// Wrap `parent`, keeping at most `size_limit` estimated bytes resident
    /// after each unload and writing spilled entries in batches of about
    /// `batch_size` bytes.
    pub fn new(parent: S, size_limit: usize, batch_size: usize) -> Self {
        Self {
            parent: Some(parent),
            cache: HashMap::new(),
            lru: BTreeMap::new(),
            tick: 0,
            mem_size: 0,
            size_limit,
            batch_size: batch_size.max(1),
        }
    }

    /// Insert or overwrite a resident entry and mark it most recently used.
    pub fn add(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let tick = self.next_tick();
        let est = entry_mem_est(key.len(), value.len());
        if let Some(prev) = self.cache.get(&key) {
            self.mem_size -= entry_mem_est(key.len(), prev.value.len());
            self.lru.remove(&prev.tick);
        }
        self.lru.insert(tick, key.clone());
        self.cache.insert(key, Resident { value, tick });
        self.mem_size += est;
    }

    /// Resident value (refreshing its recency) or the parent's value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after [`Self::close`], or the parent's
    /// error unchanged.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let parent = self.parent.as_ref().ok_or(StoreError::Closed)?;
        let tick = self.tick + 1;
        if let Some(entry) = self.cache.get_mut(key) {
            let old = std::mem::replace(&mut entry.tick, tick);
            let value = entry.value.clone();
            self.tick = tick;
            if let Some(k) = self.lru.remove(&old) {
                self.lru.insert(tick, k);
            }
            return Ok(Some(value));
        }
        parent.get(key)
    }

    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        let parent = self.parent.as_ref().ok_or(StoreError::Closed)?;
        if self.cache.contains_key(key) {
            return Ok(true);
        }
        parent.has(key)
    }

    /// Spill least recently used entries to the parent until the resident
    /// estimate is within the size limit. Returns how many were spilled.
    ///
    /// Entries leave memory only after their batch was written, so a failed
    /// write loses nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after [`Self::close`], or the parent's
    /// write error unchanged.
    pub fn unload_to_budget(&mut self) -> Result<usize, StoreError> {
        let parent = self.parent.as_mut().ok_or(StoreError::Closed)?;
        let mut unloaded = 0;
        while self.mem_size > self.size_limit {
            let mut batch = Vec::new();
            let mut batch_bytes = 0;
            let mut projected = self.mem_size;
            for key in self.lru.values() {
                if projected <= self.size_limit || batch_bytes >= self.batch_size {
                    break;
                }
                let Some(entry) = self.cache.get(key) else {
                    continue;
                };
                batch_bytes += key.len() + entry.value.len();
                projected -= entry_mem_est(key.len(), entry.value.len());
                batch.push((key.clone(), entry.value.clone()));
            }
            if batch.is_empty() {
                break;
            }

            parent.write_batch(&batch)?;
            for (key, _) in &batch {
                if let Some(entry) = self.cache.remove(key) {
                    self.lru.remove(&entry.tick);
                    self.mem_size -= entry_mem_est(key.len(), entry.value.len());
                }
            }
            unloaded += batch.len();
            debug!(
                batch = batch.len(),
                batch_bytes,
                resident = self.cache.len(),
                mem_size = self.mem_size,
                "spilled vector batch to persistent store"
            );
        }
        Ok(unloaded)
    }

    /// Number of resident entries.
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.cache.len()
    }

    /// Estimated resident bytes.
    #[must_use]
    pub const fn resident_size(&self) -> usize {
        self.mem_size
    }

    #[must_use]
    pub const fn size_limit(&self) -> usize {
        self.size_limit
    }

    /// Borrow the parent store.
    #[must_use]
    pub const fn parent(&self) -> Option<&S> {
        self.parent.as_ref()
    }

    /// Drop resident entries and close the parent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if already closed, or the parent's
    /// close error.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let mut parent = self.parent.take().ok_or(StoreError::Closed)?;
        self.cache.clear();
        self.lru.clear();
        self.mem_size = 0;
        parent.close()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
