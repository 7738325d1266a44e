//! The transaction-level driver: validation, gas accounting, dispatch,
//! and finalization.

use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::{Encodable, Header};
use tracing::{error, trace, warn};

use rust_eth_statedb_common::StateDatabase;
use rust_eth_statedb_state::{CommitBehaviour, State};

use crate::engine::SealEngine;
use crate::env_info::EnvInfo;
use crate::error::{ExecutionError, TransactionException};
use crate::ext::ExtVm;
use crate::substate::{LogEntry, SubState};
use crate::transaction::{Action, Transaction};
use crate::vm::{CallParameters, OnOp, VmError, VmKind};

/// Whether `execute_transaction` commits the state afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permanence {
    /// Leave the state uncommitted; the caller rolls back or discards
    /// its state copy.
    Reverted,
    /// Commit with the fork-appropriate empty-account behavior.
    Committed,
}

/// Outcome of the code-deposit phase of a creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeDeposit {
    /// Not a creation, or the VM never ran.
    #[default]
    None,
    /// The deposit was unaffordable and the schedule tolerates that:
    /// the account is left without code.
    Failed,
    /// The code was deposited and paid for.
    Success,
}

/// The result of applying one transaction.
#[derive(Debug, Clone, Default)]
pub struct Executed {
    /// Gas supplied by the transaction.
    pub gas: U256,
    /// Gas finally charged, refunds applied.
    pub gas_used: U256,
    /// The clamped refund credited back to the sender.
    pub gas_refunded: U256,
    /// Return data of the outermost frame.
    pub output: Vec<u8>,
    /// Address created, for creation transactions that survived.
    pub new_address: Option<Address>,
    /// The deterministic exception, if execution failed.
    pub excepted: Option<TransactionException>,
    /// Code-deposit outcome of a creation.
    pub code_deposit: CodeDeposit,
    /// Logs emitted by the surviving execution.
    pub logs: Vec<LogEntry>,
}

/// Transaction receipt (pre-Byzantium shape: post-state root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// State root after this transaction.
    pub state_root: B256,
    /// Cumulative block gas after this transaction.
    pub gas_used: U256,
    /// Logs of this transaction.
    pub logs: Vec<LogEntry>,
}

/// The CREATE address: the low 160 bits of the hash of the canonical
/// list `[sender, nonce]`, with the sender's nonce before its increment.
pub fn contract_address(sender: &Address, nonce: &U256) -> Address {
    let mut payload = Vec::new();
    sender.encode(&mut payload);
    nonce.encode(&mut payload);
    let mut encoded = Vec::with_capacity(payload.len() + 2);
    Header { list: true, payload_length: payload.len() }.encode(&mut encoded);
    encoded.extend(payload);
    Address::from_slice(&keccak256(&encoded)[12..])
}

/// The pending VM frame, captured by `call`/`create` and consumed by
/// `go`.
struct VmFrame {
    my_address: Address,
    sender: Address,
    origin: Address,
    value: U256,
    gas_price: U256,
    data: Vec<u8>,
    code: Arc<Vec<u8>>,
    code_hash: B256,
    is_creation: bool,
}

/// Drives one outer transaction or one nested message call.
///
/// Lifecycle: `initialize` (validation) → `execute` (up-front gas debit
/// and dispatch) → `go` (run the VM if code is involved) → `finalize`
/// (refunds, fees, self-destructs). Nested calls skip `initialize` and
/// `finalize`; the parent accrues their sub-state instead.
pub struct Executive<'a, DB> {
    state: &'a mut State<DB>,
    env: &'a EnvInfo,
    engine: &'a dyn SealEngine,
    schedule: crate::schedule::Schedule,
    depth: usize,
    t: Option<Transaction>,
    gas: U256,
    gas_cost: U256,
    base_gas_required: U256,
    savepoint: usize,
    frame: Option<VmFrame>,
    sub: SubState,
    output: Vec<u8>,
    new_address: Option<Address>,
    excepted: Option<TransactionException>,
    code_deposit: CodeDeposit,
    refunded: U256,
    is_creation: bool,
}

impl<'a, DB> Executive<'a, DB>
where
    DB: StateDatabase + Clone + Send + Sync,
    DB::Error: std::fmt::Debug,
{
    /// An executive for an outer transaction.
    pub fn new(state: &'a mut State<DB>, env: &'a EnvInfo, engine: &'a dyn SealEngine) -> Self {
        Self::from_parent(state, env, engine, 0)
    }

    /// An executive for a nested message call at the given depth.
    pub fn from_parent(
        state: &'a mut State<DB>,
        env: &'a EnvInfo,
        engine: &'a dyn SealEngine,
        depth: usize,
    ) -> Self {
        let schedule = engine.schedule(env);
        Self {
            state,
            env,
            engine,
            schedule,
            depth,
            t: None,
            gas: U256::ZERO,
            gas_cost: U256::ZERO,
            base_gas_required: U256::ZERO,
            savepoint: 0,
            frame: None,
            sub: SubState::new(),
            output: Vec::new(),
            new_address: None,
            excepted: None,
            code_deposit: CodeDeposit::None,
            refunded: U256::ZERO,
            is_creation: false,
        }
    }

    /// Gas remaining in this frame.
    pub fn gas_left(&self) -> U256 {
        self.gas
    }

    /// Gas consumed so far, relative to the transaction's allowance.
    pub fn gas_used(&self) -> U256 {
        match &self.t {
            Some(t) => t.gas - self.gas,
            None => U256::ZERO,
        }
    }

    /// The exception recorded for this frame, if it failed.
    pub fn excepted(&self) -> Option<TransactionException> {
        self.excepted
    }

    /// Return data of this frame.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// The created contract address, for creations.
    pub fn new_address(&self) -> Option<Address> {
        self.new_address
    }

    /// Merges this frame's accumulated side effects into the parent's.
    pub fn accrue_substate(&mut self, parent: &mut SubState) {
        parent.accrue(std::mem::take(&mut self.sub));
    }

    /// Validates the transaction against the block and the sender's
    /// account. Nothing is mutated; failures surface the deterministic
    /// taxonomy the whole network must agree on.
    pub fn initialize(&mut self, t: Transaction) -> Result<(), ExecutionError> {
        // Transactions that would take the block past its gas limit.
        let required = self.env.gas_used.checked_add(t.gas);
        if required.map_or(true, |required| required > self.env.gas_limit) {
            warn!(
                target: "executive",
                number = self.env.number,
                gas = %t.gas,
                "cannot fit transaction in block"
            );
            return Err(ExecutionError::BlockGasLimitReached {
                gas_limit: self.env.gas_limit,
                gas_used: self.env.gas_used,
                required: t.gas,
            });
        }

        // The supplied gas must cover the intrinsic cost.
        self.base_gas_required = t.base_gas_required(&self.schedule);
        if self.base_gas_required > t.gas {
            warn!(
                target: "executive",
                required = %self.base_gas_required,
                got = %t.gas,
                "not enough gas to cover the intrinsic transaction cost"
            );
            return Err(ExecutionError::OutOfGasBase {
                required: self.base_gas_required,
                got: t.gas,
            });
        }

        let sender = match t.sender() {
            Ok(sender) => sender,
            Err(e) => {
                warn!(target: "executive", "invalid signature");
                return Err(e);
            }
        };

        let expected_nonce = self.state.get_nonce(&sender)?;
        if t.nonce != expected_nonce {
            warn!(
                target: "executive",
                expected = %expected_nonce,
                got = %t.nonce,
                "invalid nonce"
            );
            return Err(ExecutionError::InvalidNonce { expected: expected_nonce, got: t.nonce });
        }

        // Unaffordable transactions. A cost overflowing 256 bits cannot
        // be covered by any balance.
        let balance = self.state.balance(&sender)?;
        let gas_cost = t.gas.checked_mul(t.gas_price);
        let total_cost = gas_cost.and_then(|gas_cost| gas_cost.checked_add(t.value));
        match (gas_cost, total_cost) {
            (Some(gas_cost), Some(total_cost)) if balance >= total_cost => {
                self.gas_cost = gas_cost;
            }
            _ => {
                warn!(
                    target: "executive",
                    required = %total_cost.unwrap_or(U256::MAX),
                    got = %balance,
                    sender = %sender,
                    "not enough cash"
                );
                return Err(ExecutionError::NotEnoughCash {
                    required: total_cost.unwrap_or(U256::MAX),
                    got: balance,
                });
            }
        }

        self.t = Some(t);
        Ok(())
    }

    /// Charges the up-front gas cost and dispatches the validated
    /// transaction. Returns `true` when nothing is left to run.
    pub fn execute(&mut self) -> Result<bool, ExecutionError> {
        let t = self.t.clone().expect("execute requires a successful initialize");
        let sender = t.sender()?;

        trace!(target: "executive", cost = %self.gas_cost, "charging up-front gas");
        // The up-front gas debit precedes the savepoint; rollback never
        // refunds it.
        self.state.sub_balance(&sender, self.gas_cost)?;

        let gas = t.gas - self.base_gas_required;
        match t.action {
            Action::Create => {
                self.create(sender, t.value, t.gas_price, gas, t.data.clone(), sender)
            }
            Action::Call(to) => self.call(
                CallParameters::transfer(sender, to, t.value, gas, t.data.clone()),
                t.gas_price,
                sender,
            ),
        }
    }

    /// Sets up a message call: nonce bump for outer transactions,
    /// savepoint, precompile dispatch or VM frame capture, value
    /// transfer. Returns `true` when no VM run is pending.
    pub fn call(
        &mut self,
        mut params: CallParameters,
        gas_price: U256,
        origin: Address,
    ) -> Result<bool, ExecutionError> {
        if self.t.is_some() {
            self.state.inc_nonce(&params.sender)?;
        }

        self.savepoint = self.state.savepoint();

        if self.engine.is_precompiled(&params.code_address, self.env.number) {
            let cost = self.engine.cost_of_precompiled(
                &params.code_address,
                &params.data,
                self.env.number,
            );
            if params.gas < cost {
                self.gas = U256::ZERO;
                self.excepted = Some(TransactionException::OutOfGasBase);
                // An empty precompile account must still be deletable
                // after the fork even when the call ran out of gas, so
                // mark it touched for the end-of-transaction sweep.
                if self.env.number >= self.engine.params().eip158_fork_block {
                    self.state.add_balance(&params.code_address, U256::ZERO)?;
                }
                return Ok(true);
            }
            self.gas = params.gas - cost;
            let (ok, output) = self.engine.execute_precompiled(
                &params.code_address,
                &params.data,
                self.env.number,
            );
            if ok {
                self.output = output;
            } else {
                self.gas = U256::ZERO;
                self.excepted = Some(TransactionException::OutOfGas);
            }
        } else {
            self.gas = params.gas;
            if self.state.address_has_code(&params.code_address)? {
                let code = self.state.code(&params.code_address)?;
                let code_hash = self.state.code_hash(&params.code_address)?;
                self.frame = Some(VmFrame {
                    my_address: params.receive_address,
                    sender: params.sender,
                    origin,
                    value: params.apparent_value,
                    gas_price,
                    data: std::mem::take(&mut params.data),
                    code,
                    code_hash,
                    is_creation: false,
                });
            }
        }

        self.state.transfer_balance(&params.sender, &params.receive_address, params.value)?;
        Ok(self.frame.is_none())
    }

    /// Sets up a contract creation: nonce bump, savepoint, address
    /// derivation, endowment transfer, the post-fork creation nonce, and
    /// the init-code frame. Returns `true` when no VM run is pending.
    pub fn create(
        &mut self,
        sender: Address,
        endowment: U256,
        gas_price: U256,
        gas: U256,
        init: Vec<u8>,
        origin: Address,
    ) -> Result<bool, ExecutionError> {
        let nonce = self.state.get_nonce(&sender)?;
        self.state.inc_nonce(&sender)?;

        self.savepoint = self.state.savepoint();
        self.is_creation = true;

        let new_address = contract_address(&sender, &nonce);
        self.new_address = Some(new_address);
        self.gas = gas;

        // Transfer the endowment before running init code; this also
        // creates the account if it does not exist yet.
        self.state.transfer_balance(&sender, &new_address, endowment)?;

        if self.env.number >= self.engine.params().eip158_fork_block {
            self.state.inc_nonce(&new_address)?;
        }

        if !init.is_empty() {
            let code_hash = keccak256(&init);
            self.frame = Some(VmFrame {
                my_address: new_address,
                sender,
                origin,
                value: endowment,
                gas_price,
                data: Vec::new(),
                code: Arc::new(init),
                code_hash,
                is_creation: true,
            });
        } else if self.state.address_has_code(&new_address)? {
            // Address collision with an existing contract: overwrite
            // with empty code. Synthetic-test territory.
            self.state.set_new_code(&new_address, Vec::new())?;
        }

        Ok(self.frame.is_none())
    }

    /// Runs the captured VM frame, if any. VM failures zero the gas,
    /// record the matching exception, and revert to the savepoint; any
    /// other failure aborts the process, because silently producing a
    /// different post-state from peers is a consensus fault.
    pub fn go(&mut self, mut on_op: OnOp<'_>) -> Result<bool, ExecutionError> {
        let Some(frame) = self.frame.take() else {
            return Ok(true);
        };

        // Tracers need per-opcode visibility only the interpreter
        // provides.
        let kind = if on_op.is_some() { VmKind::Interpreter } else { VmKind::Default };
        let mut vm = self.engine.vm(kind);

        let mut gas = self.gas;
        let (result, child_sub) = {
            let mut ext = ExtVm::new(
                &mut *self.state,
                self.env,
                self.engine,
                frame.my_address,
                frame.sender,
                frame.origin,
                frame.value,
                frame.gas_price,
                frame.data,
                frame.code,
                frame.code_hash,
                self.depth,
            );
            let result = vm.exec(&mut gas, &mut ext, on_op.as_deref_mut());
            (result, std::mem::take(&mut ext.sub))
        };
        self.gas = gas;

        match result {
            Ok(out) => {
                self.sub.accrue(child_sub);
                if frame.is_creation {
                    self.finish_creation(frame.my_address, out)?;
                } else {
                    self.output = out;
                }
            }
            Err(VmError::Internal(message)) => {
                error!(
                    target: "executive",
                    message,
                    "unexpected exception in VM; aborting to avoid consensus divergence"
                );
                std::process::abort();
            }
            Err(vm_error) => {
                trace!(target: "executive", error = %vm_error, "safe VM exception");
                self.vm_failure(&vm_error);
            }
        }
        Ok(true)
    }

    /// Applies the code-deposit policy to the init-code output.
    fn finish_creation(&mut self, new_address: Address, out: Vec<u8>) -> Result<(), ExecutionError> {
        if out.len() > self.schedule.max_code_size {
            self.vm_failure(&VmError::OutOfGas);
            return Ok(());
        }
        let deposit_gas =
            U256::from(out.len() as u64) * U256::from(self.schedule.create_data_gas);
        if deposit_gas <= self.gas {
            self.code_deposit = CodeDeposit::Success;
            self.gas -= deposit_gas;
            self.output = out.clone();
            self.state.set_new_code(&new_address, out)?;
        } else if self.schedule.exceptional_failed_code_deposit {
            self.vm_failure(&VmError::OutOfGas);
        } else {
            // The deposit is unaffordable but tolerated: the account
            // stays code-less and keeps the remaining gas.
            self.code_deposit = CodeDeposit::Failed;
            self.output = Vec::new();
            self.state.set_new_code(&new_address, Vec::new())?;
        }
        Ok(())
    }

    fn vm_failure(&mut self, vm_error: &VmError) {
        self.gas = U256::ZERO;
        self.excepted = Some(vm_error.as_transaction_exception());
        self.revert();
    }

    /// Settles the outer transaction: suicide and storage refunds
    /// (clamped to half the gas used), the sender's refund, the block
    /// author's fee, pending self-destructs, and the final result.
    pub fn finalize(mut self) -> Result<Executed, ExecutionError> {
        // Accumulate refunds for self-destructs.
        let suicide_refunds = U256::from(self.schedule.suicide_refund_gas)
            .wrapping_mul(U256::from(self.sub.suicides.len() as u64));
        self.sub.refunds = self.sub.refunds.wrapping_add(suicide_refunds);

        // Storage refunds, clamped, before the author collects fees.
        if let Some(t) = &self.t {
            self.refunded =
                std::cmp::min((t.gas - self.gas) / U256::from(2), self.sub.refunds);
        }
        self.gas += self.refunded;

        if let Some(t) = self.t.clone() {
            let sender = t.sender()?;
            self.state.add_balance(&sender, self.gas * t.gas_price)?;

            let fees_earned = (t.gas - self.gas) * t.gas_price;
            self.state.add_balance(&self.env.author, fees_earned)?;
        }

        // Self-destructs happen past the last savepoint.
        let suicides: Vec<Address> = self.sub.suicides.iter().copied().collect();
        for address in suicides {
            self.state.kill(&address);
        }

        Ok(Executed {
            gas: self.t.as_ref().map(|t| t.gas).unwrap_or(U256::ZERO),
            gas_used: self.gas_used(),
            gas_refunded: self.refunded,
            output: std::mem::take(&mut self.output),
            new_address: if self.is_creation { self.new_address } else { None },
            excepted: self.excepted,
            code_deposit: self.code_deposit,
            logs: std::mem::take(&mut self.sub.logs),
        })
    }

    /// Discards this frame's side effects and unwinds the state to the
    /// frame's savepoint.
    fn revert(&mut self) {
        self.sub.clear();
        self.new_address = None;
        self.state.rollback(self.savepoint);
    }
}

/// Applies one transaction to the state: validate, execute, finalize,
/// and (for [`Permanence::Committed`]) commit with the fork-appropriate
/// empty-account behavior. Returns the execution result and the receipt.
pub fn execute_transaction<DB>(
    state: &mut State<DB>,
    env: &EnvInfo,
    engine: &dyn SealEngine,
    t: &Transaction,
    permanence: Permanence,
    on_op: OnOp<'_>,
) -> Result<(Executed, Receipt), ExecutionError>
where
    DB: StateDatabase + Clone + Send + Sync,
    DB::Error: std::fmt::Debug,
{
    state.note_account_start_nonce(engine.params().account_start_nonce)?;

    let mut executive = Executive::new(state, env, engine);
    executive.initialize(t.clone())?;
    let finished = executive.execute()?;
    if !finished {
        executive.go(on_op)?;
    }
    let executed = executive.finalize()?;

    let state_root = match permanence {
        Permanence::Committed => {
            let behaviour = if env.number >= engine.params().eip158_fork_block {
                CommitBehaviour::RemoveEmptyAccounts
            } else {
                CommitBehaviour::KeepEmptyAccounts
            };
            state.commit(behaviour)?
        }
        Permanence::Reverted => state.root(),
    };

    let receipt = Receipt {
        state_root,
        gas_used: env.gas_used + executed.gas_used,
        logs: executed.logs.clone(),
    };
    Ok((executed, receipt))
}
