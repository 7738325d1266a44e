//! Plain-old-data account used to seed a state (genesis, test fixtures).

use std::collections::BTreeMap;

use alloy_primitives::U256;

/// Fully specified account contents, unhashed and uncommitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodAccount {
    /// Account balance in wei.
    pub balance: U256,
    /// Account nonce.
    pub nonce: U256,
    /// Contract code, if any.
    pub code: Option<Vec<u8>>,
    /// Storage slots to seed.
    pub storage: BTreeMap<U256, U256>,
}

impl PodAccount {
    /// Balance-only account, the common genesis shape.
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }
}
