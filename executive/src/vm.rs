//! The abstract interface between the executive and a bytecode
//! interpreter backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use crate::env_info::EnvInfo;
use crate::error::TransactionException;
use crate::instructions::Instruction;
use crate::schedule::Schedule;

/// Which interpreter backend to instantiate.
///
/// The interpreter is forced whenever a tracer is attached, because
/// tracers need per-opcode visibility that optimized backends may not
/// provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmKind {
    /// Whatever the engine considers fastest.
    Default,
    /// The stepping interpreter.
    Interpreter,
}

/// Deterministic failures of bytecode execution.
///
/// These are normal protocol outcomes: the executive zeroes the gas,
/// records the matching [`TransactionException`], and reverts to its
/// savepoint. `Internal` marks an implementation bug instead, and the
/// executive aborts the process rather than risk committing a divergent
/// post-state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Execution ran out of gas
    #[error("out of gas")]
    OutOfGas,
    /// Undefined instruction
    #[error("bad instruction")]
    BadInstruction,
    /// Stack underflow
    #[error("stack underflow")]
    StackUnderflow,
    /// Stack limit exceeded
    #[error("out of stack")]
    OutOfStack,
    /// Jump to a non-JUMPDEST position
    #[error("bad jump destination")]
    BadJumpDestination,
    /// Explicit REVERT
    #[error("revert instruction")]
    Revert,
    /// Unrecoverable implementation fault
    #[error("internal VM error: {0}")]
    Internal(String),
}

impl VmError {
    /// Translates the VM failure into the exception recorded on the
    /// transaction.
    pub fn as_transaction_exception(&self) -> TransactionException {
        match self {
            VmError::OutOfGas => TransactionException::OutOfGas,
            VmError::BadInstruction => TransactionException::BadInstruction,
            VmError::StackUnderflow => TransactionException::StackUnderflow,
            VmError::OutOfStack => TransactionException::OutOfStack,
            VmError::BadJumpDestination => TransactionException::BadJumpDestination,
            VmError::Revert => TransactionException::Revert,
            // Internal faults never translate; the executive aborts
            // before an exception could be recorded.
            VmError::Internal(_) => TransactionException::OutOfGas,
        }
    }
}

/// One executed step, as reported to a tracer.
#[derive(Debug)]
pub struct VmStep<'a> {
    /// Steps executed so far in this frame.
    pub steps: u64,
    /// Program counter of the instruction.
    pub pc: u64,
    /// The instruction executed.
    pub instruction: Instruction,
    /// New memory word count if the instruction grew memory.
    pub new_mem_size: Option<u64>,
    /// Gas charged for the step.
    pub gas_cost: U256,
    /// Gas remaining before the step.
    pub gas: U256,
    /// The full VM stack, bottom first.
    pub stack: &'a [U256],
    /// The VM memory.
    pub memory: &'a [u8],
}

/// The execution context a tracer may inspect alongside each step.
#[derive(Debug)]
pub struct VmStepExt<'a> {
    /// Call depth of the executing frame.
    pub depth: usize,
    /// Address whose code is executing.
    pub my_address: Address,
    /// Pending (uncommitted) storage writes of that address.
    pub storage: &'a BTreeMap<U256, U256>,
}

/// Per-opcode tracer callback, invoked by interpreter backends.
pub type OnOp<'a> = Option<&'a mut dyn FnMut(&VmStep<'_>, &VmStepExt<'_>)>;

/// Outcome of a nested message call made from inside the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageCallResult {
    /// The callee returned normally.
    Success {
        /// Gas left over from the callee's allowance.
        gas_left: U256,
        /// The callee's return data.
        output: Vec<u8>,
    },
    /// The callee failed; its state changes were reverted.
    Failed,
}

/// Outcome of a nested CREATE made from inside the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCreateResult {
    /// The contract was deployed.
    Created {
        /// Address of the new contract.
        address: Address,
        /// Gas left over from the creation allowance.
        gas_left: U256,
    },
    /// Creation failed; its state changes were reverted.
    Failed,
}

/// Parameters of a single message call.
#[derive(Debug, Clone)]
pub struct CallParameters {
    /// Account whose code runs.
    pub code_address: Address,
    /// Account receiving the value and, usually, hosting the execution.
    pub receive_address: Address,
    /// Immediate caller.
    pub sender: Address,
    /// Value actually moved from sender to receiver.
    pub value: U256,
    /// Value the callee observes (differs under CALLCODE/DELEGATECALL).
    pub apparent_value: U256,
    /// Gas allowance for the call.
    pub gas: U256,
    /// Call input data.
    pub data: Vec<u8>,
}

impl CallParameters {
    /// Plain value-bearing call: code, receiver, and apparent value all
    /// at the target address.
    pub fn transfer(
        sender: Address,
        receive_address: Address,
        value: U256,
        gas: U256,
        data: Vec<u8>,
    ) -> Self {
        Self {
            code_address: receive_address,
            receive_address,
            sender,
            value,
            apparent_value: value,
            gas,
            data,
        }
    }
}

/// Externalities interface: everything an interpreter backend may ask of
/// its surrounding execution context.
pub trait Ext {
    /// Block environment of the execution.
    fn env_info(&self) -> &EnvInfo;
    /// Gas schedule in force.
    fn schedule(&self) -> &Schedule;
    /// Call depth of this frame (0 for the outer transaction).
    fn depth(&self) -> usize;
    /// Address whose storage and balance this frame operates on.
    fn my_address(&self) -> Address;
    /// Immediate caller of this frame.
    fn caller(&self) -> Address;
    /// Original transaction sender.
    fn origin(&self) -> Address;
    /// Apparent value of this frame.
    fn value(&self) -> U256;
    /// Gas price of the outer transaction.
    fn gas_price(&self) -> U256;
    /// Input data of this frame.
    fn data(&self) -> &[u8];
    /// Code executing in this frame.
    fn code(&self) -> Arc<Vec<u8>>;
    /// Hash of the executing code.
    fn code_hash(&self) -> B256;

    /// Reads a storage slot of `my_address`.
    fn storage_at(&mut self, key: &U256) -> Result<U256, VmError>;
    /// Writes a storage slot of `my_address`.
    fn set_storage(&mut self, key: U256, value: U256) -> Result<(), VmError>;
    /// Whether an account exists at the address.
    fn exists(&mut self, address: &Address) -> Result<bool, VmError>;
    /// Whether an account exists and is non-empty.
    fn exists_and_not_null(&mut self, address: &Address) -> Result<bool, VmError>;
    /// Balance of an arbitrary account.
    fn balance(&mut self, address: &Address) -> Result<U256, VmError>;
    /// Hash of one of the most recent blocks; zero outside the window.
    fn blockhash(&mut self, number: &U256) -> B256;
    /// Code of an arbitrary account.
    fn extcode(&mut self, address: &Address) -> Result<Arc<Vec<u8>>, VmError>;
    /// Code size of an arbitrary account.
    fn extcodesize(&mut self, address: &Address) -> Result<usize, VmError>;
    /// Emits a log from `my_address`.
    fn log(&mut self, topics: Vec<B256>, data: &[u8]);
    /// Self-destructs `my_address`, moving its balance to the refund
    /// address.
    fn suicide(&mut self, refund_address: &Address) -> Result<(), VmError>;
    /// Credits an SSTORE-clear refund.
    fn add_refund(&mut self, amount: u64);

    /// Runs a nested message call through a child executive. `value` is
    /// `None` for DELEGATECALL-style calls that move no funds.
    fn call(
        &mut self,
        gas: U256,
        sender: &Address,
        receive_address: &Address,
        value: Option<U256>,
        data: &[u8],
        code_address: &Address,
        on_op: OnOp<'_>,
    ) -> Result<MessageCallResult, VmError>;

    /// Runs a nested CREATE through a child executive.
    fn create(
        &mut self,
        gas: U256,
        value: U256,
        init: &[u8],
        on_op: OnOp<'_>,
    ) -> Result<ContractCreateResult, VmError>;

    /// The pending storage writes of `my_address`, for tracers.
    fn cached_storage(&mut self) -> BTreeMap<U256, U256>;
}

/// A bytecode interpreter backend.
///
/// `gas` is the frame allowance on entry and the remaining gas on a
/// successful return. On error the executive zeroes it regardless.
pub trait Vm {
    /// Executes the code in `ext`'s frame.
    fn exec(
        &mut self,
        gas: &mut U256,
        ext: &mut dyn Ext,
        on_op: OnOp<'_>,
    ) -> Result<Vec<u8>, VmError>;
}
