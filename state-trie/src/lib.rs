//! Secure Merkle-Patricia trie over a pluggable state database.
//!
//! Keys are keccak-hashed before insertion, so every path has a fixed
//! width and adversarial key shapes cannot unbalance the trie. Nodes of
//! 32 encoded bytes or more are content-addressed into the database; the
//! 32-byte root commits to every contained key-value pair.

pub mod account;
mod nibbles;
pub mod node;
pub mod secure_trie;
mod trie;

#[cfg(test)]
mod secure_trie_test;

pub use account::StateAccount;
pub use secure_trie::{SecureTrie, SecureTrieError};
pub use trie::Trie;
