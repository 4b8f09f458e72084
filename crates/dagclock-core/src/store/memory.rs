use std::collections::BTreeMap;

use super::{KvStore, StoreError};

/// In-memory ordered [`KvStore`], for tests and ephemeral nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    writes: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total number of pair writes received, counting overwrites.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.data.contains_key(key))
    }
}
