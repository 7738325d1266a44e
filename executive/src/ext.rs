//! Externalities implementation: the captured context a VM executes in.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};

use rust_eth_statedb_common::StateDatabase;
use rust_eth_statedb_state::{State, StateError};

use crate::engine::SealEngine;
use crate::env_info::EnvInfo;
use crate::error::ExecutionError;
use crate::executive::Executive;
use crate::schedule::Schedule;
use crate::substate::{LogEntry, SubState};
use crate::vm::{
    CallParameters, ContractCreateResult, Ext, MessageCallResult, OnOp, VmError,
};

fn state_fault(error: StateError) -> VmError {
    VmError::Internal(format!("state failure during execution: {error}"))
}

fn exec_fault(error: ExecutionError) -> VmError {
    VmError::Internal(format!("nested executive failure: {error}"))
}

/// One frame's view of the world, handed to the VM backend.
///
/// Captures the executing address, caller, origin, value, input, and
/// code, and accumulates the frame's [`SubState`]. Nested calls and
/// creates run through child [`Executive`]s against the same state; a
/// successful child accrues its sub-state here, a failed one was already
/// reverted and contributes nothing.
pub struct ExtVm<'a, DB> {
    state: &'a mut State<DB>,
    env: &'a EnvInfo,
    engine: &'a dyn SealEngine,
    schedule: Schedule,
    my_address: Address,
    caller: Address,
    origin: Address,
    value: U256,
    gas_price: U256,
    data: Vec<u8>,
    code: Arc<Vec<u8>>,
    code_hash: B256,
    depth: usize,
    /// Side effects accumulated by this frame.
    pub sub: SubState,
}

impl<'a, DB> ExtVm<'a, DB>
where
    DB: StateDatabase + Clone + Send + Sync,
    DB::Error: std::fmt::Debug,
{
    /// Captures a call context.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a mut State<DB>,
        env: &'a EnvInfo,
        engine: &'a dyn SealEngine,
        my_address: Address,
        caller: Address,
        origin: Address,
        value: U256,
        gas_price: U256,
        data: Vec<u8>,
        code: Arc<Vec<u8>>,
        code_hash: B256,
        depth: usize,
    ) -> Self {
        let schedule = engine.schedule(env);
        Self {
            state,
            env,
            engine,
            schedule,
            my_address,
            caller,
            origin,
            value,
            gas_price,
            data,
            code,
            code_hash,
            depth,
            sub: SubState::new(),
        }
    }
}

impl<DB> Ext for ExtVm<'_, DB>
where
    DB: StateDatabase + Clone + Send + Sync,
    DB::Error: std::fmt::Debug,
{
    fn env_info(&self) -> &EnvInfo {
        self.env
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn my_address(&self) -> Address {
        self.my_address
    }

    fn caller(&self) -> Address {
        self.caller
    }

    fn origin(&self) -> Address {
        self.origin
    }

    fn value(&self) -> U256 {
        self.value
    }

    fn gas_price(&self) -> U256 {
        self.gas_price
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn code(&self) -> Arc<Vec<u8>> {
        self.code.clone()
    }

    fn code_hash(&self) -> B256 {
        self.code_hash
    }

    fn storage_at(&mut self, key: &U256) -> Result<U256, VmError> {
        self.state.storage(&self.my_address, key).map_err(state_fault)
    }

    fn set_storage(&mut self, key: U256, value: U256) -> Result<(), VmError> {
        self.state.set_storage(&self.my_address, key, value).map_err(state_fault)
    }

    fn exists(&mut self, address: &Address) -> Result<bool, VmError> {
        self.state.address_in_use(address).map_err(state_fault)
    }

    fn exists_and_not_null(&mut self, address: &Address) -> Result<bool, VmError> {
        self.state.nonempty_and_existing(address).map_err(state_fault)
    }

    fn balance(&mut self, address: &Address) -> Result<U256, VmError> {
        self.state.balance(address).map_err(state_fault)
    }

    fn blockhash(&mut self, number: &U256) -> B256 {
        if *number >= U256::from(self.env.number) {
            return B256::ZERO;
        }
        let age = self.env.number - 1 - number.to::<u64>();
        self.env.last_hashes.get(age as usize).copied().unwrap_or(B256::ZERO)
    }

    fn extcode(&mut self, address: &Address) -> Result<Arc<Vec<u8>>, VmError> {
        self.state.code(address).map_err(state_fault)
    }

    fn extcodesize(&mut self, address: &Address) -> Result<usize, VmError> {
        self.state.code_size(address).map_err(state_fault)
    }

    fn log(&mut self, topics: Vec<B256>, data: &[u8]) {
        self.sub.logs.push(LogEntry { address: self.my_address, topics, data: data.to_vec() });
    }

    fn suicide(&mut self, refund_address: &Address) -> Result<(), VmError> {
        let balance = self.state.balance(&self.my_address).map_err(state_fault)?;
        self.state
            .transfer_balance(&self.my_address, refund_address, balance)
            .map_err(state_fault)?;
        self.sub.suicides.insert(self.my_address);
        Ok(())
    }

    fn add_refund(&mut self, amount: u64) {
        self.sub.refunds = self.sub.refunds.wrapping_add(U256::from(amount));
    }

    fn call(
        &mut self,
        gas: U256,
        sender: &Address,
        receive_address: &Address,
        value: Option<U256>,
        data: &[u8],
        code_address: &Address,
        on_op: OnOp<'_>,
    ) -> Result<MessageCallResult, VmError> {
        // An unaffordable transfer is a failed call, not a fault; the
        // caller keeps its gas.
        if let Some(value) = value {
            if self.state.balance(sender).map_err(state_fault)? < value {
                return Ok(MessageCallResult::Failed);
            }
        }

        let params = CallParameters {
            code_address: *code_address,
            receive_address: *receive_address,
            sender: *sender,
            value: value.unwrap_or(U256::ZERO),
            apparent_value: value.unwrap_or(self.value),
            gas,
            data: data.to_vec(),
        };

        let mut executive =
            Executive::from_parent(&mut *self.state, self.env, self.engine, self.depth + 1);
        let finished = executive.call(params, self.gas_price, self.origin).map_err(exec_fault)?;
        if !finished {
            executive.go(on_op).map_err(exec_fault)?;
        }
        let gas_left = executive.gas_left();
        let excepted = executive.excepted();
        let output = executive.output().to_vec();
        executive.accrue_substate(&mut self.sub);

        if excepted.is_none() {
            Ok(MessageCallResult::Success { gas_left, output })
        } else {
            Ok(MessageCallResult::Failed)
        }
    }

    fn create(
        &mut self,
        gas: U256,
        value: U256,
        init: &[u8],
        on_op: OnOp<'_>,
    ) -> Result<ContractCreateResult, VmError> {
        if self.state.balance(&self.my_address).map_err(state_fault)? < value {
            return Ok(ContractCreateResult::Failed);
        }

        let mut executive =
            Executive::from_parent(&mut *self.state, self.env, self.engine, self.depth + 1);
        let finished = executive
            .create(self.my_address, value, self.gas_price, gas, init.to_vec(), self.origin)
            .map_err(exec_fault)?;
        if !finished {
            executive.go(on_op).map_err(exec_fault)?;
        }
        let gas_left = executive.gas_left();
        let excepted = executive.excepted();
        let address = executive.new_address();
        executive.accrue_substate(&mut self.sub);

        match (excepted, address) {
            (None, Some(address)) => Ok(ContractCreateResult::Created { address, gas_left }),
            _ => Ok(ContractCreateResult::Failed),
        }
    }

    fn cached_storage(&mut self) -> BTreeMap<U256, U256> {
        self.state.cached_storage(&self.my_address)
    }
}
