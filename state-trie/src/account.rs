//! State account structure and canonical encoding.

use alloy_primitives::{keccak256, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};

/// The four-field account record committed to the state trie.
///
/// Encoded as the RLP list `[nonce, balance, storage_root, code_hash]`
/// with minimal-length big-endian integers, which is the consensus
/// account encoding of Ethereum-compatible chains.
///
/// - `nonce`: transaction counter for externally owned accounts, creation
///   counter for contracts.
/// - `balance`: balance in wei.
/// - `storage_root`: root of the account's storage trie;
///   `EMPTY_ROOT_HASH` when the account has no storage.
/// - `code_hash`: keccak-256 of the account code; `KECCAK_EMPTY` when the
///   account carries none.
#[derive(Copy, Clone, Debug, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct StateAccount {
    /// Account nonce.
    pub nonce: U256,
    /// Account balance in wei.
    pub balance: U256,
    /// Storage trie root hash for this account's storage.
    pub storage_root: B256,
    /// Keccak-256 hash of the account's contract code.
    pub code_hash: B256,
}

impl Default for StateAccount {
    fn default() -> Self {
        Self {
            nonce: U256::ZERO,
            balance: U256::ZERO,
            storage_root: alloy_trie::EMPTY_ROOT_HASH,
            code_hash: alloy_trie::KECCAK_EMPTY,
        }
    }
}

impl StateAccount {
    /// Set custom nonce
    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.nonce = nonce;
        self
    }

    /// Set custom balance
    pub fn with_balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    /// Set custom storage_root
    pub fn with_storage_root(mut self, storage_root: B256) -> Self {
        self.storage_root = storage_root;
        self
    }

    /// Set custom code_hash
    pub fn with_code_hash(mut self, code_hash: B256) -> Self {
        self.code_hash = code_hash;
        self
    }

    /// Hash of the encoding as committed to the trie.
    pub fn trie_hash(&self) -> B256 {
        keccak256(self.to_rlp())
    }

    /// Encode the account as RLP.
    pub fn to_rlp(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    /// Decode a StateAccount from RLP encoded bytes
    pub fn from_rlp(data: &[u8]) -> Result<Self, alloy_rlp::Error> {
        StateAccount::decode(&mut &*data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_account_hash() {
        let account = StateAccount::default();

        // Known hash of the canonical empty-account encoding.
        let expected = "0943e8ddb43403e237cc56ac8ec3e256006e0f75d8e79ca1457b123e5d51a45c";
        assert_eq!(format!("{:x}", account.trie_hash()), expected);

        let decoded = StateAccount::from_rlp(&account.to_rlp()).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_account_rlp_roundtrip() {
        let account = StateAccount::default()
            .with_nonce(U256::from(99))
            .with_balance(U256::from(1_000_000_000u64))
            .with_storage_root(keccak256(b"storage"))
            .with_code_hash(keccak256(b"code"));

        let decoded = StateAccount::from_rlp(&account.to_rlp()).unwrap();
        assert_eq!(decoded, account);
    }
}
