//! The seal-engine abstraction: chain parameters, fork-conditional gas
//! schedules, precompiles, and the VM factory hook.

use std::sync::Arc;

use alloy_primitives::{Address, U256};

use crate::env_info::EnvInfo;
use crate::precompiles::BUILTINS;
use crate::schedule::Schedule;
use crate::vm::{Vm, VmKind};

/// Typed chain parameters the executive consults.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Initial nonce of newly created accounts.
    pub account_start_nonce: U256,
    /// First block of the homestead rules.
    pub homestead_fork_block: u64,
    /// First block of the EIP-158 empty-account rules.
    pub eip158_fork_block: u64,
    /// Network identifier.
    pub network_id: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            account_start_nonce: U256::ZERO,
            homestead_fork_block: 0,
            eip158_fork_block: 0,
            network_id: 1,
        }
    }
}

impl ChainParams {
    /// Parameters for a chain that never activates either fork, the
    /// frontier-forever configuration tests use for pre-fork behavior.
    pub fn frontier_forever() -> Self {
        Self {
            homestead_fork_block: u64::MAX,
            eip158_fork_block: u64::MAX,
            ..Self::default()
        }
    }
}

/// The consensus-engine surface the executive depends on.
///
/// Everything fork-conditional flows through here: the gas schedule for
/// a block, the precompile table, and the chain parameters. The engine
/// also owns VM instantiation so the interpreter backend stays a
/// pluggable collaborator.
pub trait SealEngine: Send + Sync {
    /// The gas schedule in force for the given block.
    fn schedule(&self, env: &EnvInfo) -> Schedule;

    /// Typed chain parameters.
    fn params(&self) -> &ChainParams;

    /// Whether the address is a precompiled contract at this block.
    fn is_precompiled(&self, address: &Address, block_number: u64) -> bool;

    /// Gas cost of invoking the precompile on the given input.
    fn cost_of_precompiled(&self, address: &Address, data: &[u8], block_number: u64) -> U256;

    /// Runs the precompile. The bool reports success; failure consumes
    /// all gas at the call site.
    fn execute_precompiled(
        &self,
        address: &Address,
        data: &[u8],
        block_number: u64,
    ) -> (bool, Vec<u8>);

    /// Instantiates a VM backend of the requested kind.
    fn vm(&self, kind: VmKind) -> Box<dyn Vm>;
}

/// Factory closure producing VM backends.
pub type VmFactory = dyn Fn(VmKind) -> Box<dyn Vm> + Send + Sync;

/// A mainnet-shaped engine: fork-scheduled gas tables and the builtin
/// precompile table. The VM backend is injected at construction.
pub struct EthashLikeEngine {
    params: ChainParams,
    vm_factory: Arc<VmFactory>,
}

impl EthashLikeEngine {
    /// Builds an engine over the given parameters and VM factory.
    pub fn new(params: ChainParams, vm_factory: Arc<VmFactory>) -> Self {
        Self { params, vm_factory }
    }
}

impl SealEngine for EthashLikeEngine {
    fn schedule(&self, env: &EnvInfo) -> Schedule {
        if env.number >= self.params.eip158_fork_block {
            Schedule::eip158()
        } else if env.number >= self.params.homestead_fork_block {
            Schedule::homestead()
        } else {
            Schedule::frontier()
        }
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn is_precompiled(&self, address: &Address, _block_number: u64) -> bool {
        BUILTINS.contains_key(address)
    }

    fn cost_of_precompiled(&self, address: &Address, data: &[u8], _block_number: u64) -> U256 {
        BUILTINS.get(address).map(|builtin| builtin.cost(data)).unwrap_or(U256::ZERO)
    }

    fn execute_precompiled(
        &self,
        address: &Address,
        data: &[u8],
        _block_number: u64,
    ) -> (bool, Vec<u8>) {
        match BUILTINS.get(address) {
            Some(builtin) => builtin.execute(data),
            None => (false, Vec::new()),
        }
    }

    fn vm(&self, kind: VmKind) -> Box<dyn Vm> {
        (self.vm_factory)(kind)
    }
}
