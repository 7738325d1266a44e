//! Transaction envelope consumed by the executive.

use alloy_primitives::{Address, U256};

use crate::error::ExecutionError;
use crate::schedule::Schedule;

/// What the transaction targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deploys a contract; the data field carries the init code.
    Create,
    /// Calls the given address; the data field carries the call input.
    Call(Address),
}

/// One transaction, with its sender already recovered.
///
/// Signature handling lives outside this subsystem: the `sender` slot
/// holds the recovered address, or nothing when recovery failed, in
/// which case [`Transaction::sender`] surfaces `InvalidSignature` exactly
/// where a lazy recovery would.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Sender nonce.
    pub nonce: U256,
    /// Price per unit of gas.
    pub gas_price: U256,
    /// Gas limit of this transaction.
    pub gas: U256,
    /// Call target or contract creation.
    pub action: Action,
    /// Value transferred to the target.
    pub value: U256,
    /// Call input or init code.
    pub data: Vec<u8>,
    sender: Option<Address>,
}

impl Transaction {
    /// Builds a transaction with an unrecovered sender.
    pub fn new(
        action: Action,
        value: U256,
        gas: U256,
        gas_price: U256,
        nonce: U256,
        data: Vec<u8>,
    ) -> Self {
        Self { nonce, gas_price, gas, action, value, data, sender: None }
    }

    /// Attaches the recovered sender address.
    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    /// The recovered sender, or `InvalidSignature` when recovery failed.
    pub fn sender(&self) -> Result<Address, ExecutionError> {
        self.sender.ok_or(ExecutionError::InvalidSignature)
    }

    /// True for contract-creating transactions.
    pub fn is_creation(&self) -> bool {
        matches!(self.action, Action::Create)
    }

    /// Intrinsic gas: the flat transaction (or creation) cost plus the
    /// per-byte cost of the data payload.
    pub fn base_gas_required(&self, schedule: &Schedule) -> U256 {
        let flat = if self.is_creation() { schedule.tx_create_gas } else { schedule.tx_gas };
        let data_gas: u128 = self
            .data
            .iter()
            .map(|byte| {
                if *byte == 0 {
                    schedule.tx_data_zero_gas as u128
                } else {
                    schedule.tx_data_non_zero_gas as u128
                }
            })
            .sum();
        U256::from(flat as u128 + data_gas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;

    #[test]
    fn test_base_gas_counts_zero_and_nonzero_bytes() {
        let schedule = Schedule::homestead();
        let tx = Transaction::new(
            Action::Call(Address::ZERO),
            U256::ZERO,
            U256::from(100_000),
            U256::from(1),
            U256::ZERO,
            vec![0, 0, 1, 2],
        );
        assert_eq!(tx.base_gas_required(&schedule), U256::from(21_000 + 4 + 4 + 68 + 68));

        let create = Transaction::new(
            Action::Create,
            U256::ZERO,
            U256::from(100_000),
            U256::from(1),
            U256::ZERO,
            Vec::new(),
        );
        assert_eq!(create.base_gas_required(&schedule), U256::from(53_000));
    }

    #[test]
    fn test_missing_sender_is_invalid_signature() {
        let tx = Transaction::new(
            Action::Create,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Vec::new(),
        );
        assert!(matches!(tx.sender(), Err(ExecutionError::InvalidSignature)));
        let tx = tx.with_sender(Address::repeat_byte(1));
        assert_eq!(tx.sender().unwrap(), Address::repeat_byte(1));
    }
}
