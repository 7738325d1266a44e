//! Account state layer over the secure trie.
//!
//! A [`State`] caches accounts observed or mutated during execution and
//! journals every atomic change so that nested message calls can be
//! reverted with [`State::rollback`]. [`State::commit`] materializes the
//! dirty cache into the authenticated trie and produces a new state root.

pub mod account;
mod change;
mod code_cache;
pub mod pod_account;
mod state;

#[cfg(test)]
mod state_test;

pub use account::Account;
pub use code_cache::CodeSizeCache;
pub use pod_account::PodAccount;
pub use state::{CommitBehaviour, State, StateError};
