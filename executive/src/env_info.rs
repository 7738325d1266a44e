//! Block environment visible to executing transactions.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};

/// Information concerning the block the transaction executes in.
#[derive(Debug, Clone)]
pub struct EnvInfo {
    /// Block number.
    pub number: u64,
    /// Block author (fee recipient).
    pub author: Address,
    /// Block timestamp.
    pub timestamp: u64,
    /// Block difficulty.
    pub difficulty: U256,
    /// Block gas limit.
    pub gas_limit: U256,
    /// Gas used by earlier transactions in the block.
    pub gas_used: U256,
    /// Hashes of the most recent ancestor blocks, most recent first.
    pub last_hashes: Arc<Vec<B256>>,
}

impl Default for EnvInfo {
    fn default() -> Self {
        Self {
            number: 0,
            author: Address::ZERO,
            timestamp: 0,
            difficulty: U256::ZERO,
            gas_limit: U256::ZERO,
            gas_used: U256::ZERO,
            last_hashes: Arc::new(Vec::new()),
        }
    }
}
