//! In-memory database implementation for state data.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use rust_eth_statedb_common::StateDatabase;

/// Error type for memory database operations.
///
/// The in-memory store itself is infallible; the variants exist so the
/// `StateDatabase` error plumbing stays uniform across backends.
#[derive(Debug, Error)]
pub enum MemoryDBError {
    /// Key not found in database
    #[error("key not found")]
    KeyNotFound,
}

/// In-memory database for trie nodes, account code, and metadata.
///
/// The map is shared behind `Arc<RwLock<..>>` so that clones observe the
/// same data. This is the backing store used in tests and as the bottom of
/// an overlay chain; a disk backend plugs in at the same trait seam.
#[derive(Debug, Clone, Default)]
pub struct MemoryDB {
    entries: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDB {
    /// Creates a new empty memory database.
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Returns the number of entries in the database.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Checks if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears all entries from the database.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl StateDatabase for MemoryDB {
    type Error = MemoryDBError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &[u8], data: Vec<u8>) -> Result<(), Self::Error> {
        self.entries.write().insert(key.to_vec(), data);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> Result<bool, Self::Error> {
        Ok(self.entries.read().contains_key(key))
    }

    fn remove(&self, key: &[u8]) {
        let _ = self.entries.write().remove(key);
    }
}
