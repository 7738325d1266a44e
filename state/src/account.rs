//! Cached mutable view of a single account.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{keccak256, B256, U256};
use alloy_trie::KECCAK_EMPTY;

use rust_eth_statedb_common::StateDatabase;
use rust_eth_statedb_trie::{SecureTrie, SecureTrieError, StateAccount};

/// In-memory mutable account.
///
/// Storage writes buffer in `storage_overlay` and only reach the storage
/// trie when [`Account::commit_storage`] runs; a pending zero value means
/// the slot is deleted at commit. Code loads lazily by `code_hash` the
/// first time it is asked for.
#[derive(Debug, Clone)]
pub struct Account {
    nonce: U256,
    balance: U256,
    storage_root: B256,
    storage_overlay: HashMap<U256, U256>,
    code_hash: B256,
    code: Option<Arc<Vec<u8>>>,
    dirty: bool,
    has_new_code: bool,
    alive: bool,
}

impl Account {
    /// Creates a fresh (dirty) account with the given nonce and balance.
    pub fn new_basic(nonce: U256, balance: U256) -> Self {
        Self {
            nonce,
            balance,
            storage_root: alloy_trie::EMPTY_ROOT_HASH,
            storage_overlay: HashMap::new(),
            code_hash: KECCAK_EMPTY,
            code: None,
            dirty: true,
            has_new_code: false,
            alive: true,
        }
    }

    /// Builds a clean cache entry from a trie-decoded account.
    pub fn from_state_account(account: StateAccount) -> Self {
        Self {
            nonce: account.nonce,
            balance: account.balance,
            storage_root: account.storage_root,
            storage_overlay: HashMap::new(),
            code_hash: account.code_hash,
            code: None,
            dirty: false,
            has_new_code: false,
            alive: true,
        }
    }

    /// The four-field record as it will be committed to the trie.
    ///
    /// Only meaningful once the storage overlay has been folded into
    /// `storage_root` by [`Account::commit_storage`].
    pub fn to_state_account(&self) -> StateAccount {
        StateAccount {
            nonce: self.nonce,
            balance: self.balance,
            storage_root: self.storage_root,
            code_hash: self.code_hash,
        }
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn storage_root(&self) -> B256 {
        self.storage_root
    }

    pub fn code_hash(&self) -> B256 {
        self.code_hash
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn has_new_code(&self) -> bool {
        self.has_new_code
    }

    /// An account is empty iff nonce and balance are zero and it carries
    /// no code. Empty touched accounts are swept after the EIP-158 fork.
    pub fn is_empty(&self) -> bool {
        self.nonce.is_zero() && self.balance.is_zero() && self.code_hash == KECCAK_EMPTY
    }

    /// Sets the balance outright. Seeding only; journaled mutations go
    /// through the add/sub pair.
    pub fn set_balance(&mut self, balance: U256) {
        self.balance = balance;
        self.dirty = true;
    }

    /// Adds to the balance, wrapping. The change journal records the
    /// wrapped delta so rollback subtracts exactly what was added.
    pub fn add_balance(&mut self, amount: U256) {
        self.balance = self.balance.wrapping_add(amount);
        self.dirty = true;
    }

    /// Subtracts from the balance, wrapping. Callers check affordability;
    /// this is also the rollback path for journaled balance increases.
    pub fn sub_balance(&mut self, amount: U256) {
        self.balance = self.balance.wrapping_sub(amount);
        self.dirty = true;
    }

    pub fn inc_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(U256::from(1));
        self.dirty = true;
    }

    /// Rollback inverse of [`Account::inc_nonce`].
    pub fn dec_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_sub(U256::from(1));
        self.dirty = true;
    }

    /// Buffers a storage write. Zero marks the slot for deletion.
    pub fn set_storage(&mut self, key: U256, value: U256) {
        self.storage_overlay.insert(key, value);
        self.dirty = true;
    }

    /// The pending overlay value for a slot, if any write is buffered.
    pub fn overlay_value(&self, key: &U256) -> Option<U256> {
        self.storage_overlay.get(key).copied()
    }

    /// Restores a slot's overlay state during rollback: `Some` rewrites
    /// the previous pending value, `None` clears the entry so the slot
    /// reads from the committed trie again.
    pub fn restore_storage(&mut self, key: U256, prev_value: Option<U256>) {
        match prev_value {
            Some(value) => {
                self.storage_overlay.insert(key, value);
            }
            None => {
                self.storage_overlay.remove(&key);
            }
        }
    }

    pub fn storage_overlay(&self) -> &HashMap<U256, U256> {
        &self.storage_overlay
    }

    /// Installs freshly deployed code.
    pub fn set_new_code(&mut self, code: Vec<u8>) {
        self.code_hash = keccak256(&code);
        self.code = Some(Arc::new(code));
        self.has_new_code = true;
        self.dirty = true;
    }

    /// Rollback inverse of [`Account::set_new_code`].
    pub fn reset_code(&mut self) {
        self.code_hash = KECCAK_EMPTY;
        self.code = None;
        self.has_new_code = false;
    }

    /// Clears the new-code flag once the code bytes have been persisted.
    pub fn note_code_committed(&mut self) {
        self.has_new_code = false;
    }

    /// Marks the account clean after its record reached the trie.
    pub fn note_committed(&mut self) {
        self.dirty = false;
    }

    /// Marks the account for removal at commit and drops pending storage.
    pub fn kill(&mut self) {
        self.alive = false;
        self.dirty = true;
        self.storage_overlay.clear();
        self.code = None;
    }

    /// Returns the account code, loading it from the database by hash on
    /// first use.
    pub fn code<DB>(&mut self, db: &DB) -> Result<Arc<Vec<u8>>, SecureTrieError>
    where
        DB: StateDatabase,
        DB::Error: std::fmt::Debug,
    {
        if self.code_hash == KECCAK_EMPTY {
            return Ok(Arc::new(Vec::new()));
        }
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        let bytes = db
            .get(self.code_hash.as_slice())
            .map_err(|e| SecureTrieError::Database(format!("{e:?}")))?
            .ok_or(SecureTrieError::NodeNotFound)?;
        let code = Arc::new(bytes);
        self.code = Some(code.clone());
        Ok(code)
    }

    /// The cached code bytes, if already loaded or freshly set.
    pub fn cached_code(&self) -> Option<Arc<Vec<u8>>> {
        if self.code_hash == KECCAK_EMPTY {
            return Some(Arc::new(Vec::new()));
        }
        self.code.clone()
    }

    /// Folds the storage overlay into the account's storage trie and
    /// updates `storage_root`. Pending zero values remove their slot.
    pub fn commit_storage<DB>(&mut self, db: DB) -> Result<(), SecureTrieError>
    where
        DB: StateDatabase + Clone,
        DB::Error: std::fmt::Debug,
    {
        if self.storage_overlay.is_empty() {
            return Ok(());
        }
        let mut trie = SecureTrie::from_root(db, self.storage_root)?;
        for (key, value) in self.storage_overlay.drain() {
            trie.insert_word(&B256::from(key), value)?;
        }
        self.storage_root = trie.root()?;
        Ok(())
    }
}
