//! Bounded cache of code sizes keyed by code hash.

use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::RwLock;
use schnellru::{ByLength, LruMap};

const CODE_SIZE_CACHE_ENTRIES: u32 = 100_000;

/// Shared bounded map `code_hash → code size`.
///
/// `EXTCODESIZE`-style queries would otherwise load full code blobs just
/// to measure them. The cache is injected into each `State` (clones share
/// it) rather than living as a process-wide singleton, so tests can reset
/// it.
#[derive(Clone)]
pub struct CodeSizeCache {
    inner: Arc<RwLock<LruMap<B256, usize, ByLength>>>,
}

impl std::fmt::Debug for CodeSizeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSizeCache").field("entries", &self.inner.read().len()).finish()
    }
}

impl CodeSizeCache {
    /// Creates a cache bounded to the default entry count.
    pub fn new() -> Self {
        Self::with_capacity(CODE_SIZE_CACHE_ENTRIES)
    }

    /// Creates a cache bounded to `entries`.
    pub fn with_capacity(entries: u32) -> Self {
        Self { inner: Arc::new(RwLock::new(LruMap::new(ByLength::new(entries)))) }
    }

    /// Records the size of the code identified by `hash`.
    pub fn store(&self, hash: B256, size: usize) {
        self.inner.write().insert(hash, size);
    }

    /// Returns the cached size for `hash`, if present.
    pub fn get(&self, hash: &B256) -> Option<usize> {
        self.inner.write().get(hash).copied()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl Default for CodeSizeCache {
    fn default() -> Self {
        Self::new()
    }
}
