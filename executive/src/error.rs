//! Transaction-level error taxonomy.

use alloy_primitives::U256;
use thiserror::Error;

use rust_eth_statedb_state::StateError;

/// Deterministic transaction outcome classification.
///
/// Every node must compute the same variant for the same transaction;
/// the value is recorded in the execution result after the executive's
/// savepoint has been reverted. The outer transaction still consumes the
/// up-front gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionException {
    /// Transaction would push the block over its gas limit
    BlockGasLimitReached,
    /// Intrinsic gas exceeds the supplied gas
    OutOfGasBase,
    /// Sender nonce does not match the account nonce
    InvalidNonce,
    /// Sender could not be recovered
    InvalidSignature,
    /// Sender cannot afford value + gas
    NotEnoughCash,
    /// Execution ran out of gas
    OutOfGas,
    /// Undefined instruction was executed
    BadInstruction,
    /// Stack underflow during execution
    StackUnderflow,
    /// Stack grew past its limit
    OutOfStack,
    /// Jump to a non-JUMPDEST target
    BadJumpDestination,
    /// Execution reverted explicitly
    Revert,
}

/// Error surfaced by transaction validation and the state underneath.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The transaction does not fit in the remaining block gas
    #[error("block gas limit reached: limit {gas_limit}, used {gas_used}, require {required}")]
    BlockGasLimitReached {
        /// The block gas limit
        gas_limit: U256,
        /// Gas already used in the block
        gas_used: U256,
        /// Gas demanded by this transaction
        required: U256,
    },
    /// The supplied gas does not cover the intrinsic cost
    #[error("not enough base gas: require {required}, got {got}")]
    OutOfGasBase {
        /// Intrinsic gas required
        required: U256,
        /// Gas supplied
        got: U256,
    },
    /// The transaction nonce is wrong
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce {
        /// Nonce the state expects
        expected: U256,
        /// Nonce the transaction carries
        got: U256,
    },
    /// The sender signature cannot be recovered
    #[error("invalid signature")]
    InvalidSignature,
    /// The sender cannot afford value plus the up-front gas cost
    #[error("not enough cash: require {required}, got {got}")]
    NotEnoughCash {
        /// Total cost of the transaction
        required: U256,
        /// Sender balance
        got: U256,
    },
    /// State layer failure
    #[error(transparent)]
    State(#[from] StateError),
}

impl ExecutionError {
    /// The deterministic exception recorded for this validation failure,
    /// if it maps to one.
    pub fn exception(&self) -> Option<TransactionException> {
        match self {
            Self::BlockGasLimitReached { .. } => Some(TransactionException::BlockGasLimitReached),
            Self::OutOfGasBase { .. } => Some(TransactionException::OutOfGasBase),
            Self::InvalidNonce { .. } => Some(TransactionException::InvalidNonce),
            Self::InvalidSignature => Some(TransactionException::InvalidSignature),
            Self::NotEnoughCash { .. } => Some(TransactionException::NotEnoughCash),
            Self::State(_) => None,
        }
    }
}
