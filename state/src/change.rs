//! Atomic state changelog entries.

use alloy_primitives::{Address, U256};

/// One reversible mutation recorded in the state changelog.
///
/// Each entry captures enough to undo the mutation it was logged for;
/// rollback pops entries in LIFO order and applies the inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    /// Account balance changed.
    /// Action: `increase` was wrapping-added to the balance.
    /// Revert: wrapping-subtract `increase`.
    Balance {
        address: Address,
        increase: U256,
    },
    /// A storage slot's pending overlay value changed.
    /// Action: the overlay entry for `key` was written.
    /// Revert: restore `prev_value` (`None` removes the overlay entry so
    /// the slot reads from the committed trie again).
    Storage {
        address: Address,
        key: U256,
        prev_value: Option<U256>,
    },
    /// Account nonce was increased by one.
    /// Revert: decrease it by one.
    Nonce {
        address: Address,
    },
    /// Account was created; it did not exist before.
    /// Revert: drop it from the cache and remember the address as absent.
    Create {
        address: Address,
    },
    /// New code was installed by create-message execution.
    /// Revert: clear the code and restore the empty code hash.
    NewCode {
        address: Address,
    },
    /// Account entered the touched set for the first time.
    /// Revert: remove it from the touched set.
    Touch {
        address: Address,
    },
}
