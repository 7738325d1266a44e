//! Transaction executive over the account state layer.
//!
//! An [`Executive`] drives one outer transaction or one nested message
//! call against a `State`: it validates the transaction, charges the
//! up-front gas, dispatches to call or create, runs bytecode through the
//! abstract [`Vm`] interface, and finalizes fees, refunds, and
//! self-destructs. Nested calls revert atomically through the state's
//! change journal.

pub mod engine;
mod env_info;
mod error;
mod executive;
mod ext;
pub mod instructions;
mod precompiles;
mod schedule;
mod substate;
mod tracer;
mod transaction;
pub mod vm;


pub use engine::{ChainParams, EthashLikeEngine, SealEngine};
pub use env_info::EnvInfo;
pub use error::{ExecutionError, TransactionException};
pub use executive::{
    contract_address, execute_transaction, CodeDeposit, Executed, Executive, Permanence, Receipt,
};
pub use ext::ExtVm;
pub use instructions::Instruction;
pub use schedule::Schedule;
pub use substate::{LogEntry, SubState};
pub use tracer::{StandardTrace, TraceOptions};
pub use transaction::{Action, Transaction};
pub use vm::{
    CallParameters, ContractCreateResult, Ext, MessageCallResult, OnOp, Vm, VmError, VmKind,
    VmStep, VmStepExt,
};
