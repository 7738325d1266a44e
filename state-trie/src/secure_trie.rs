//! Secure trie: keccak-hashed keys over the raw Merkle-Patricia trie.

use alloy_primitives::{keccak256, B256, U256};
use alloy_rlp::Decodable;
use thiserror::Error;

use rust_eth_statedb_common::StateDatabase;

use crate::trie::Trie;

/// Secure trie error types
#[derive(Debug, Error)]
pub enum SecureTrieError {
    /// Database operation error
    #[error("database error: {0}")]
    Database(String),
    /// RLP encoding/decoding error
    #[error("RLP encoding error: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// Node not found in trie
    #[error("node not found")]
    NodeNotFound,
    /// Invalid node data
    #[error("invalid node")]
    InvalidNode,
    /// Invalid account data
    #[error("invalid account data")]
    InvalidAccount,
    /// Invalid storage data
    #[error("invalid storage data")]
    InvalidStorage,
}

/// Merkle-Patricia trie whose keys are keccak-hashed before insertion.
///
/// Hashing makes every path a fixed 64 nibbles and keeps adversarially
/// chosen keys from unbalancing the trie. Both the account trie (keyed by
/// address) and per-account storage tries (keyed by the big-endian slot
/// word) go through this wrapper.
#[derive(Debug, Clone)]
pub struct SecureTrie<DB> {
    trie: Trie<DB>,
}

impl<DB> SecureTrie<DB>
where
    DB: StateDatabase + Clone,
    DB::Error: std::fmt::Debug,
{
    /// Creates an empty secure trie.
    pub fn new(db: DB) -> Self {
        Self { trie: Trie::new(db) }
    }

    /// Opens a secure trie at an existing root.
    ///
    /// Fails with [`SecureTrieError::NodeNotFound`] when the root node is
    /// not present in the database.
    pub fn from_root(db: DB, root: B256) -> Result<Self, SecureTrieError> {
        if !Trie::check_root(&db, root)? {
            return Err(SecureTrieError::NodeNotFound);
        }
        Ok(Self { trie: Trie::from_root(db, root) })
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SecureTrieError> {
        self.trie.get(keccak256(key).as_slice())
    }

    /// Inserts `value` under `key`. An empty value removes the key.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), SecureTrieError> {
        self.trie.insert(keccak256(key).as_slice(), value)
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), SecureTrieError> {
        self.trie.remove(keccak256(key).as_slice())
    }

    /// Reads a storage word. Absent keys read as zero.
    pub fn get_word(&self, key: &B256) -> Result<U256, SecureTrieError> {
        match self.get(key.as_slice())? {
            Some(encoded) => {
                U256::decode(&mut encoded.as_slice()).map_err(|_| SecureTrieError::InvalidStorage)
            }
            None => Ok(U256::ZERO),
        }
    }

    /// Writes a storage word as the RLP of its minimal big-endian form.
    /// Zero is never stored: writing zero removes the key.
    pub fn insert_word(&mut self, key: &B256, value: U256) -> Result<(), SecureTrieError> {
        if value.is_zero() {
            self.remove(key.as_slice())
        } else {
            self.insert(key.as_slice(), alloy_rlp::encode(value))
        }
    }

    /// Encodes and persists all dirty nodes, returning the new root hash.
    pub fn root(&mut self) -> Result<B256, SecureTrieError> {
        self.trie.root()
    }
}
