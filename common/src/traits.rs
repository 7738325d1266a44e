//! Database traits for state storage.

use auto_impl::auto_impl;

/// Content-addressed byte store backing the state stack.
///
/// Keys are opaque byte strings; the trie layer uses 32-byte node hashes
/// and the state layer uses code hashes. All methods take `&self` so that
/// implementations can be shared between the account trie and the storage
/// tries of individual accounts.
#[auto_impl(Box, Arc)]
pub trait StateDatabase {
    /// Associated error type for database operations
    type Error;

    /// Get a value from the database by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Insert a value into the database under the given key
    fn insert(&self, key: &[u8], data: Vec<u8>) -> Result<(), Self::Error>;

    /// Check if a key exists in the database
    fn contains(&self, key: &[u8]) -> Result<bool, Self::Error>;

    /// Remove a key from the database
    fn remove(&self, key: &[u8]);
}
