//! Builtin precompiled contracts.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use once_cell::sync::Lazy;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// One natively implemented contract with its linear gas pricing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Builtin {
    base_gas: u64,
    word_gas: u64,
    kind: BuiltinKind,
}

#[derive(Debug, Clone, Copy)]
enum BuiltinKind {
    Sha256,
    Ripemd160,
    Identity,
}

impl Builtin {
    /// The schedule-defined cost of running this builtin on `input`.
    pub(crate) fn cost(&self, input: &[u8]) -> U256 {
        let words = (input.len() as u64 + 31) / 32;
        U256::from(self.base_gas + self.word_gas * words)
    }

    /// Runs the builtin. The bool mirrors the engine interface; the
    /// hash and identity builtins cannot fail.
    pub(crate) fn execute(&self, input: &[u8]) -> (bool, Vec<u8>) {
        match self.kind {
            BuiltinKind::Sha256 => (true, Sha256::digest(input).to_vec()),
            BuiltinKind::Ripemd160 => {
                // The 20-byte hash is returned right-aligned to 32 bytes.
                let hash = Ripemd160::digest(input);
                let mut output = vec![0u8; 32];
                output[12..].copy_from_slice(&hash);
                (true, output)
            }
            BuiltinKind::Identity => (true, input.to_vec()),
        }
    }
}

/// The builtin table at the canonical low addresses. ecrecover (0x01)
/// needs a signature-recovery backend and is left to the embedding
/// engine to register.
pub(crate) static BUILTINS: Lazy<HashMap<Address, Builtin>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        Address::with_last_byte(2),
        Builtin { base_gas: 60, word_gas: 12, kind: BuiltinKind::Sha256 },
    );
    table.insert(
        Address::with_last_byte(3),
        Builtin { base_gas: 600, word_gas: 120, kind: BuiltinKind::Ripemd160 },
    );
    table.insert(
        Address::with_last_byte(4),
        Builtin { base_gas: 15, word_gas: 3, kind: BuiltinKind::Identity },
    );
    table
});
