//! Overlay database buffering uncommitted writes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use rust_eth_statedb_common::StateDatabase;

/// Error type for overlay database operations.
#[derive(Debug, Error)]
pub enum OverlayDBError {
    /// Backing store operation failed
    #[error("backing store error: {0}")]
    Backing(String),
}

/// One buffered entry: the latest payload and a reference count.
///
/// The count goes up on `insert` and down on `remove`. At flush time a
/// net-positive entry is written to the backing store, a net-negative one
/// deletes from it, and a net-zero entry cancels out entirely.
#[derive(Debug, Clone, Default)]
struct OverlayEntry {
    data: Option<Vec<u8>>,
    rc: i32,
}

/// Content-addressed store with an in-memory overlay over a backing store.
///
/// Reads fall through overlay → backing store. Writes only touch the
/// overlay until [`OverlayDB::commit`] flushes them. The overlay map is
/// shared between clones, so a deep-copied `State` working over a clone of
/// this database observes the same uncommitted trie nodes.
#[derive(Debug, Clone)]
pub struct OverlayDB<DB> {
    overlay: Arc<RwLock<HashMap<Vec<u8>, OverlayEntry>>>,
    backing: DB,
}

impl<DB> OverlayDB<DB>
where
    DB: StateDatabase,
    DB::Error: std::fmt::Debug,
{
    /// Creates a new overlay over the given backing store.
    pub fn new(backing: DB) -> Self {
        Self { overlay: Arc::new(RwLock::new(HashMap::new())), backing }
    }

    /// Returns a reference to the backing store.
    pub fn backing(&self) -> &DB {
        &self.backing
    }

    /// Number of buffered (uncommitted) entries.
    pub fn pending(&self) -> usize {
        self.overlay.read().len()
    }

    /// Decrements the reference count of a key.
    ///
    /// A net-negative count removes the key from the backing store at the
    /// next `commit`. Killing a key that was never inserted is legal.
    pub fn kill(&self, key: &[u8]) {
        let mut overlay = self.overlay.write();
        let entry = overlay.entry(key.to_vec()).or_default();
        entry.rc -= 1;
    }

    /// Flushes the overlay into the backing store.
    ///
    /// Net-positive entries are inserted, net-negative entries are removed,
    /// net-zero entries are dropped. Returns the number of inserts written.
    pub fn commit(&self) -> Result<usize, OverlayDBError> {
        let mut overlay = self.overlay.write();
        let mut written = 0usize;
        for (key, entry) in overlay.drain() {
            if entry.rc > 0 {
                let data = entry.data.ok_or_else(|| {
                    OverlayDBError::Backing("positive refcount without payload".into())
                })?;
                self.backing
                    .insert(&key, data)
                    .map_err(|e| OverlayDBError::Backing(format!("{e:?}")))?;
                written += 1;
            } else if entry.rc < 0 {
                self.backing.remove(&key);
            }
        }
        Ok(written)
    }

    /// Drops every uncommitted overlay entry.
    pub fn rollback(&self) {
        self.overlay.write().clear();
    }
}

impl<DB> StateDatabase for OverlayDB<DB>
where
    DB: StateDatabase,
    DB::Error: std::fmt::Debug,
{
    type Error = OverlayDBError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error> {
        if let Some(entry) = self.overlay.read().get(key) {
            if entry.rc > 0 {
                return Ok(entry.data.clone());
            }
        }
        self.backing.get(key).map_err(|e| OverlayDBError::Backing(format!("{e:?}")))
    }

    fn insert(&self, key: &[u8], data: Vec<u8>) -> Result<(), Self::Error> {
        let mut overlay = self.overlay.write();
        let entry = overlay.entry(key.to_vec()).or_default();
        entry.rc += 1;
        entry.data = Some(data);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> Result<bool, Self::Error> {
        if let Some(entry) = self.overlay.read().get(key) {
            if entry.rc > 0 {
                return Ok(entry.data.is_some());
            }
        }
        self.backing.contains(key).map_err(|e| OverlayDBError::Backing(format!("{e:?}")))
    }

    fn remove(&self, key: &[u8]) {
        self.kill(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_eth_statedb_memorydb::MemoryDB;

    #[test]
    fn test_reads_fall_through_to_backing() {
        let backing = MemoryDB::new();
        backing.insert(b"below", vec![1]).unwrap();

        let overlay = OverlayDB::new(backing);
        assert_eq!(overlay.get(b"below").unwrap(), Some(vec![1]));

        overlay.insert(b"above", vec![2]).unwrap();
        assert_eq!(overlay.get(b"above").unwrap(), Some(vec![2]));
        assert_eq!(overlay.backing().get(b"above").unwrap(), None);
    }

    #[test]
    fn test_commit_flushes_and_rollback_drops() {
        let overlay = OverlayDB::new(MemoryDB::new());
        overlay.insert(b"a", vec![1]).unwrap();
        overlay.insert(b"b", vec![2]).unwrap();
        assert_eq!(overlay.pending(), 2);

        assert_eq!(overlay.commit().unwrap(), 2);
        assert_eq!(overlay.pending(), 0);
        assert_eq!(overlay.backing().get(b"a").unwrap(), Some(vec![1]));

        overlay.insert(b"c", vec![3]).unwrap();
        overlay.rollback();
        assert_eq!(overlay.get(b"c").unwrap(), None);
        overlay.commit().unwrap();
        assert_eq!(overlay.backing().get(b"c").unwrap(), None);
    }

    #[test]
    fn test_kill_is_refcounted() {
        let backing = MemoryDB::new();
        backing.insert(b"node", vec![9]).unwrap();

        let overlay = OverlayDB::new(backing);

        // One insert and one kill cancel out: the backing copy survives.
        overlay.insert(b"node", vec![9]).unwrap();
        overlay.kill(b"node");
        overlay.commit().unwrap();
        assert_eq!(overlay.backing().get(b"node").unwrap(), Some(vec![9]));

        // A net-negative count deletes from the backing store.
        overlay.kill(b"node");
        overlay.commit().unwrap();
        assert_eq!(overlay.backing().get(b"node").unwrap(), None);
    }

    #[test]
    fn test_clones_share_the_overlay() {
        let overlay = OverlayDB::new(MemoryDB::new());
        let copy = overlay.clone();

        overlay.insert(b"k", vec![7]).unwrap();
        assert_eq!(copy.get(b"k").unwrap(), Some(vec![7]));

        copy.rollback();
        assert_eq!(overlay.get(b"k").unwrap(), None);
    }
}
