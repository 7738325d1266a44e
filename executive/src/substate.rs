//! Per-call accumulated side effects.

use std::collections::HashSet;

use alloy_primitives::{Address, B256, U256};

/// One log emitted during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Address of the logging account.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Opaque log payload.
    pub data: Vec<u8>,
}

/// Side effects a message call accumulates while it runs.
///
/// On a successful return the callee's sub-state is accrued into the
/// caller's; on revert it is discarded wholesale.
#[derive(Debug, Clone, Default)]
pub struct SubState {
    /// Accounts marked for destruction at finalization.
    pub suicides: HashSet<Address>,
    /// Accounts touched by this call.
    pub touched: HashSet<Address>,
    /// Logs in emission order.
    pub logs: Vec<LogEntry>,
    /// Gas refunds earned (storage clears; suicide refunds are added at
    /// finalization).
    pub refunds: U256,
}

impl SubState {
    /// An empty sub-state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a completed child call's side effects into this one.
    pub fn accrue(&mut self, other: SubState) {
        self.suicides.extend(other.suicides);
        self.touched.extend(other.touched);
        self.logs.extend(other.logs);
        self.refunds = self.refunds.wrapping_add(other.refunds);
    }

    /// Discards everything; the revert path.
    pub fn clear(&mut self) {
        self.suicides.clear();
        self.touched.clear();
        self.logs.clear();
        self.refunds = U256::ZERO;
    }
}
