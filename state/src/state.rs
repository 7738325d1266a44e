//! Model of the world state: account cache, change journal, trie commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::{Address, B256, U256};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

use reth_metrics::{metrics::Histogram, Metrics};

use rust_eth_statedb_common::StateDatabase;
use rust_eth_statedb_trie::{SecureTrie, SecureTrieError, StateAccount};

use crate::account::Account;
use crate::change::Change;
use crate::code_cache::CodeSizeCache;
use crate::pod_account::PodAccount;

/// Clean cache entries become eligible for eviction past this many
/// cached accounts. Dirty entries are never evicted before commit.
const MAX_CACHE_SIZE: usize = 4096;

/// Sentinel marking an unset account start nonce.
pub const INVALID_START_NONCE: U256 = U256::MAX;

/// Metrics for `State` commits.
#[derive(Metrics, Clone)]
#[metrics(scope = "rust.eth.statedb")]
pub(crate) struct StateMetrics {
    /// Histogram of commit durations (in seconds)
    pub(crate) commit_duration: Histogram,
    /// Histogram of storage overlay fold durations (in seconds)
    pub(crate) storage_commit_duration: Histogram,
}

/// Error type for state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// Balance too low for a requested subtraction
    #[error("insufficient balance of {address}: have {balance}, need {required}")]
    InsufficientBalance {
        /// The account charged
        address: Address,
        /// Its current balance
        balance: U256,
        /// The amount requested
        required: U256,
    },
    /// The requested state root is not present in the database
    #[error("state root {0} not found in database")]
    InvalidStateRoot(B256),
    /// Trie operation failed
    #[error(transparent)]
    Trie(#[from] SecureTrieError),
    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
    /// The account start nonce was never configured
    #[error("invalid account start nonce in state")]
    InvalidAccountStartNonceInState,
    /// The configured account start nonce disagrees with the chain
    #[error("incorrect account start nonce in state")]
    IncorrectAccountStartNonceInState,
}

/// Whether `commit` sweeps touched-and-empty accounts from the trie.
///
/// `RemoveEmptyAccounts` is the post-EIP-158 behavior; before the fork
/// empty accounts persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitBehaviour {
    /// Pre-fork: empty accounts are committed like any other.
    KeepEmptyAccounts,
    /// Post-fork: every touched account that is empty is deleted.
    RemoveEmptyAccounts,
}

/// Model of the world state, a caching facade over the account trie.
///
/// Every atomic mutation is appended to the changelog; [`State::rollback`]
/// pops entries back to a [`State::savepoint`] and undoes them in LIFO
/// order, which is how nested message calls revert. Nothing reaches the
/// trie until [`State::commit`].
///
/// A clone is an independent state (own cache, changelog, and touched
/// set) over the shared database overlay, suitable for speculative
/// execution.
#[derive(Clone)]
pub struct State<DB> {
    db: DB,
    trie: SecureTrie<DB>,
    root: B256,
    cache: HashMap<Address, Account>,
    /// Clean cache entries in load order, candidates for eviction.
    unchanged_entries: Vec<Address>,
    /// Addresses proven absent, so repeat lookups skip the trie.
    non_existing_cache: HashSet<Address>,
    /// Every address touched since the last commit.
    touched: HashSet<Address>,
    account_start_nonce: U256,
    change_log: Vec<Change>,
    code_size_cache: CodeSizeCache,
    metrics: StateMetrics,
}

impl<DB> std::fmt::Debug for State<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("root", &self.root)
            .field("cached_accounts", &self.cache.len())
            .field("touched", &self.touched.len())
            .field("change_log_len", &self.change_log.len())
            .field("account_start_nonce", &self.account_start_nonce)
            .field("db", &format!("<{}>", std::any::type_name::<DB>()))
            .finish()
    }
}

impl<DB> State<DB>
where
    DB: StateDatabase + Clone + Send + Sync,
    DB::Error: std::fmt::Debug,
{
    /// Creates a state over an empty trie.
    pub fn new(db: DB, account_start_nonce: U256) -> Self {
        Self {
            trie: SecureTrie::new(db.clone()),
            db,
            root: EMPTY_ROOT_HASH,
            cache: HashMap::new(),
            unchanged_entries: Vec::new(),
            non_existing_cache: HashSet::new(),
            touched: HashSet::new(),
            account_start_nonce,
            change_log: Vec::new(),
            code_size_cache: CodeSizeCache::new(),
            metrics: StateMetrics::new_with_labels(&[("instance", "default")]),
        }
    }

    /// Opens a state at a previously committed root.
    pub fn from_existing(
        db: DB,
        root: B256,
        account_start_nonce: U256,
    ) -> Result<Self, StateError> {
        let trie = SecureTrie::from_root(db.clone(), root)
            .map_err(|_| StateError::InvalidStateRoot(root))?;
        let mut state = Self::new(db, account_start_nonce);
        state.trie = trie;
        state.root = root;
        Ok(state)
    }

    /// Replaces the injected code-size cache (clones share it).
    pub fn with_code_size_cache(mut self, cache: CodeSizeCache) -> Self {
        self.code_size_cache = cache;
        self
    }

    /// Returns the underlying database handle.
    pub fn db(&self) -> &DB {
        &self.db
    }

    /// The root as of the last commit. Not meaningful while uncommitted
    /// changes are pending.
    pub fn root(&self) -> B256 {
        self.root
    }

    /// The configured initial nonce for newly created accounts.
    pub fn account_start_nonce(&self) -> U256 {
        self.account_start_nonce
    }

    /// The start nonce, or an error if it was never configured.
    pub fn require_account_start_nonce(&self) -> Result<U256, StateError> {
        if self.account_start_nonce == INVALID_START_NONCE {
            return Err(StateError::InvalidAccountStartNonceInState);
        }
        Ok(self.account_start_nonce)
    }

    /// Records the chain's actual start nonce, rejecting a mismatch with
    /// a dedicated error rather than silently diverging.
    pub fn note_account_start_nonce(&mut self, actual: U256) -> Result<(), StateError> {
        if self.account_start_nonce == INVALID_START_NONCE {
            self.account_start_nonce = actual;
            return Ok(());
        }
        if self.account_start_nonce != actual {
            return Err(StateError::IncorrectAccountStartNonceInState);
        }
        Ok(())
    }

    // --- queries ---------------------------------------------------------

    /// True iff the address holds an account in this state.
    pub fn address_in_use(&mut self, address: &Address) -> Result<bool, StateError> {
        self.ensure_cached(address)
    }

    /// True iff the account exists and is non-empty. The two notions are
    /// equivalent after EIP-158.
    pub fn nonempty_and_existing(&mut self, address: &Address) -> Result<bool, StateError> {
        Ok(self.existing(address)?.map(|account| !account.is_empty()).unwrap_or(false))
    }

    /// True iff the address holds executable code.
    pub fn address_has_code(&mut self, address: &Address) -> Result<bool, StateError> {
        Ok(self.code_hash(address)? != KECCAK_EMPTY)
    }

    /// The account balance; zero if the address was never used.
    pub fn balance(&mut self, address: &Address) -> Result<U256, StateError> {
        Ok(self.existing(address)?.map(Account::balance).unwrap_or(U256::ZERO))
    }

    /// The account nonce; the start nonce if the address was never used.
    pub fn get_nonce(&mut self, address: &Address) -> Result<U256, StateError> {
        match self.existing(address)? {
            Some(account) => Ok(account.nonce()),
            None => self.require_account_start_nonce(),
        }
    }

    /// Reads a storage slot: the pending overlay value if one is
    /// buffered, otherwise the committed storage trie. Zero for absent
    /// accounts and unset slots.
    pub fn storage(&mut self, address: &Address, key: &U256) -> Result<U256, StateError> {
        let (storage_root, overlay) = match self.existing(address)? {
            Some(account) => (account.storage_root(), account.overlay_value(key)),
            None => return Ok(U256::ZERO),
        };
        if let Some(value) = overlay {
            return Ok(value);
        }
        let trie = SecureTrie::from_root(self.db.clone(), storage_root)?;
        Ok(trie.get_word(&B256::from(*key))?)
    }

    /// The committed storage root of an account, if it exists.
    pub fn storage_root(&mut self, address: &Address) -> Result<Option<B256>, StateError> {
        Ok(self.existing(address)?.map(Account::storage_root))
    }

    /// The buffered (uncommitted) storage writes of an account, sorted by
    /// slot. This is what execution tracers dump between steps.
    pub fn cached_storage(&mut self, address: &Address) -> BTreeMap<U256, U256> {
        self.cache
            .get(address)
            .filter(|account| account.is_alive())
            .map(|account| account.storage_overlay().iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    /// Whether the address was touched since the last commit.
    pub fn is_touched(&self, address: &Address) -> bool {
        self.touched.contains(address)
    }

    /// The account code; empty if the address holds none.
    pub fn code(&mut self, address: &Address) -> Result<Arc<Vec<u8>>, StateError> {
        if !self.ensure_cached(address)? {
            return Ok(Arc::new(Vec::new()));
        }
        let db = self.db.clone();
        match self.cache.get_mut(address) {
            Some(account) => Ok(account.code(&db)?),
            None => Ok(Arc::new(Vec::new())),
        }
    }

    /// The code hash; `KECCAK_EMPTY` if the address holds no account or
    /// no code.
    pub fn code_hash(&mut self, address: &Address) -> Result<B256, StateError> {
        Ok(self.existing(address)?.map(Account::code_hash).unwrap_or(KECCAK_EMPTY))
    }

    /// The byte size of the account code, served from the code-size cache
    /// when possible.
    pub fn code_size(&mut self, address: &Address) -> Result<usize, StateError> {
        let hash = self.code_hash(address)?;
        if hash == KECCAK_EMPTY {
            return Ok(0);
        }
        if let Some(size) = self.code_size_cache.get(&hash) {
            return Ok(size);
        }
        let code = self.code(address)?;
        self.code_size_cache.store(hash, code.len());
        Ok(code.len())
    }

    // --- mutations -------------------------------------------------------

    /// Adds to an account's balance, creating the account if absent and
    /// marking it touched. A zero amount still touches, which is how
    /// empty accounts become candidates for the post-fork sweep.
    pub fn add_balance(&mut self, address: &Address, amount: U256) -> Result<(), StateError> {
        if self.ensure_cached(address)? {
            if !amount.is_zero() {
                if let Some(account) = self.cache.get_mut(address) {
                    account.add_balance(amount);
                    self.change_log.push(Change::Balance { address: *address, increase: amount });
                }
            }
        } else {
            let start_nonce = self.require_account_start_nonce()?;
            self.create_cached_account(*address, Account::new_basic(start_nonce, amount));
        }
        self.touch(*address);
        Ok(())
    }

    /// Subtracts from an account's balance.
    pub fn sub_balance(&mut self, address: &Address, amount: U256) -> Result<(), StateError> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = self.balance(address)?;
        if balance < amount {
            return Err(StateError::InsufficientBalance {
                address: *address,
                balance,
                required: amount,
            });
        }
        if let Some(account) = self.cache.get_mut(address) {
            account.sub_balance(amount);
            // The journaled delta is what was *added*; undo subtracts it.
            self.change_log.push(Change::Balance {
                address: *address,
                increase: U256::ZERO.wrapping_sub(amount),
            });
        }
        Ok(())
    }

    /// Moves `amount` between two accounts, sub before add in journal
    /// order.
    pub fn transfer_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: U256,
    ) -> Result<(), StateError> {
        self.sub_balance(from, amount)?;
        self.add_balance(to, amount)
    }

    /// Sets an account's balance outright, journaled as the equivalent
    /// delta. A seeding convenience for genesis and tests.
    pub fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError> {
        let current = self.balance(address)?;
        if balance >= current {
            self.add_balance(address, balance - current)
        } else {
            self.sub_balance(address, current - balance)
        }
    }

    /// Increments an account's nonce, creating the account if absent.
    pub fn inc_nonce(&mut self, address: &Address) -> Result<(), StateError> {
        if !self.ensure_cached(address)? {
            let start_nonce = self.require_account_start_nonce()?;
            self.create_cached_account(*address, Account::new_basic(start_nonce, U256::ZERO));
        }
        if let Some(account) = self.cache.get_mut(address) {
            account.inc_nonce();
            self.change_log.push(Change::Nonce { address: *address });
        }
        Ok(())
    }

    /// Buffers a storage write, journaling the slot's previous overlay
    /// state so rollback can restore it exactly.
    pub fn set_storage(
        &mut self,
        address: &Address,
        key: U256,
        value: U256,
    ) -> Result<(), StateError> {
        if !self.ensure_cached(address)? {
            let start_nonce = self.require_account_start_nonce()?;
            self.create_cached_account(*address, Account::new_basic(start_nonce, U256::ZERO));
        }
        if let Some(account) = self.cache.get_mut(address) {
            let prev_value = account.overlay_value(&key);
            account.set_storage(key, value);
            self.change_log.push(Change::Storage { address: *address, key, prev_value });
        }
        Ok(())
    }

    /// Creates a contract account with the start nonce, no code, and any
    /// balance the address already held.
    pub fn create_contract(&mut self, address: &Address) -> Result<(), StateError> {
        let balance = self.balance(address)?;
        let start_nonce = self.require_account_start_nonce()?;
        self.create_cached_account(*address, Account::new_basic(start_nonce, balance));
        Ok(())
    }

    /// Installs freshly deployed code on an account. Must only be called
    /// during or after contract creation.
    pub fn set_new_code(&mut self, address: &Address, code: Vec<u8>) -> Result<(), StateError> {
        if !self.ensure_cached(address)? {
            let start_nonce = self.require_account_start_nonce()?;
            self.create_cached_account(*address, Account::new_basic(start_nonce, U256::ZERO));
        }
        if let Some(account) = self.cache.get_mut(address) {
            account.set_new_code(code);
            self.change_log.push(Change::NewCode { address: *address });
        }
        Ok(())
    }

    /// Marks an account for removal at the next commit. Used while
    /// processing self-destructs during finalization, which happens past
    /// the last savepoint, so no journal entry is written.
    pub fn kill(&mut self, address: &Address) {
        if let Some(account) = self.cache.get_mut(address) {
            account.kill();
        }
    }

    // --- journal ---------------------------------------------------------

    /// Marks the current changelog position. Rolling back to the returned
    /// index undoes every later mutation.
    pub fn savepoint(&self) -> usize {
        self.change_log.len()
    }

    /// Undoes all changes down to `savepoint`, strictly LIFO.
    ///
    /// Infallible by construction: every journal entry references an
    /// account that was cached when the entry was written.
    pub fn rollback(&mut self, savepoint: usize) {
        trace!(target: "state", entries = self.change_log.len() - savepoint.min(self.change_log.len()), "rolling back");
        while self.change_log.len() > savepoint {
            let Some(change) = self.change_log.pop() else {
                break;
            };
            match change {
                Change::Balance { address, increase } => {
                    if let Some(account) = self.cache.get_mut(&address) {
                        account.sub_balance(increase);
                    }
                }
                Change::Storage { address, key, prev_value } => {
                    if let Some(account) = self.cache.get_mut(&address) {
                        account.restore_storage(key, prev_value);
                    }
                }
                Change::Nonce { address } => {
                    if let Some(account) = self.cache.get_mut(&address) {
                        account.dec_nonce();
                    }
                }
                Change::Create { address } => {
                    self.cache.remove(&address);
                    self.non_existing_cache.insert(address);
                }
                Change::NewCode { address } => {
                    if let Some(account) = self.cache.get_mut(&address) {
                        account.reset_code();
                    }
                }
                Change::Touch { address } => {
                    self.touched.remove(&address);
                }
            }
        }
    }

    // --- commit ----------------------------------------------------------

    /// Materializes every dirty account into the trie and returns the new
    /// state root. With [`CommitBehaviour::RemoveEmptyAccounts`], touched
    /// accounts that are empty are deleted first.
    ///
    /// The changelog and touched set are cleared; nothing can roll back
    /// across a commit. Flushing the database overlay to its backing
    /// store remains a separate explicit step.
    pub fn commit(&mut self, behaviour: CommitBehaviour) -> Result<B256, StateError> {
        let commit_start = Instant::now();

        if behaviour == CommitBehaviour::RemoveEmptyAccounts {
            self.remove_empty_accounts();
        }

        // Fold the storage overlays of dirty accounts into their storage
        // tries. Accounts are independent, so the folds run in parallel;
        // the resulting roots do not depend on scheduling.
        let storage_start = Instant::now();
        let db = self.db.clone();
        {
            let mut jobs: Vec<&mut Account> = self
                .cache
                .values_mut()
                .filter(|account| {
                    account.is_dirty()
                        && account.is_alive()
                        && !account.storage_overlay().is_empty()
                })
                .collect();
            jobs.par_iter_mut()
                .try_for_each(|account| account.commit_storage(db.clone()))?;
        }
        self.metrics.storage_commit_duration.record(storage_start.elapsed().as_secs_f64());

        for (address, account) in self.cache.iter_mut() {
            if !account.is_dirty() {
                continue;
            }
            if !account.is_alive() {
                self.trie.remove(address.as_slice())?;
                continue;
            }
            if account.has_new_code() {
                if let Some(code) = account.cached_code() {
                    self.db
                        .insert(account.code_hash().as_slice(), code.as_ref().clone())
                        .map_err(|e| StateError::Database(format!("{e:?}")))?;
                    self.code_size_cache.store(account.code_hash(), code.len());
                }
                account.note_code_committed();
            }
            self.trie.insert(address.as_slice(), account.to_state_account().to_rlp())?;
            account.note_committed();
        }

        // Removed accounts now read as absent.
        let killed: Vec<Address> = self
            .cache
            .iter()
            .filter(|(_, account)| !account.is_alive())
            .map(|(address, _)| *address)
            .collect();
        for address in killed {
            self.cache.remove(&address);
            self.non_existing_cache.insert(address);
        }

        let root = self.trie.root()?;
        self.root = root;
        self.change_log.clear();
        self.touched.clear();

        self.metrics.commit_duration.record(commit_start.elapsed().as_secs_f64());
        debug!(target: "state", %root, "committed state");
        Ok(root)
    }

    /// Seeds accounts directly into the cache, bypassing the journal.
    /// Meant for genesis population and test fixtures; follow with a
    /// `commit` to obtain the seeded root.
    pub fn populate_from(&mut self, accounts: BTreeMap<Address, PodAccount>) {
        for (address, pod) in accounts {
            let mut account = Account::new_basic(pod.nonce, U256::ZERO);
            account.set_balance(pod.balance);
            if let Some(code) = pod.code {
                account.set_new_code(code);
            }
            for (key, value) in pod.storage {
                account.set_storage(key, value);
            }
            self.non_existing_cache.remove(&address);
            self.cache.insert(address, account);
        }
        self.change_log.clear();
    }

    // --- internals -------------------------------------------------------

    /// Turns every touched empty account into a not-alive one, so commit
    /// removes it from the trie.
    fn remove_empty_accounts(&mut self) {
        let touched: Vec<Address> = self.touched.iter().copied().collect();
        for address in touched {
            if let Some(account) = self.cache.get_mut(&address) {
                if account.is_alive() && account.is_empty() {
                    account.kill();
                }
            }
        }
    }

    /// Loads the account at `address` into the cache if needed. Returns
    /// whether a live account exists there.
    fn ensure_cached(&mut self, address: &Address) -> Result<bool, StateError> {
        if let Some(account) = self.cache.get(address) {
            return Ok(account.is_alive());
        }
        if self.non_existing_cache.contains(address) {
            return Ok(false);
        }
        match self.trie.get(address.as_slice())? {
            Some(encoded) => {
                let decoded = StateAccount::from_rlp(&encoded)
                    .map_err(|_| SecureTrieError::InvalidAccount)?;
                self.clear_cache_if_too_large();
                self.cache.insert(*address, Account::from_state_account(decoded));
                self.unchanged_entries.push(*address);
                Ok(true)
            }
            None => {
                self.non_existing_cache.insert(*address);
                Ok(false)
            }
        }
    }

    /// The live account at `address`, if any.
    fn existing(&mut self, address: &Address) -> Result<Option<&Account>, StateError> {
        if self.ensure_cached(address)? {
            Ok(self.cache.get(address).filter(|account| account.is_alive()))
        } else {
            Ok(None)
        }
    }

    /// Installs a freshly created account and journals the creation.
    fn create_cached_account(&mut self, address: Address, account: Account) {
        self.non_existing_cache.remove(&address);
        self.cache.insert(address, account);
        self.change_log.push(Change::Create { address });
    }

    /// Adds `address` to the touched set, journaling first entry.
    fn touch(&mut self, address: Address) {
        if self.touched.insert(address) {
            self.change_log.push(Change::Touch { address });
        }
    }

    /// Evicts still-clean cache entries once the cache grows past the
    /// high-water mark. Runs before a new load, so the entry about to be
    /// inserted is never swept.
    fn clear_cache_if_too_large(&mut self) {
        if self.cache.len() <= MAX_CACHE_SIZE {
            return;
        }
        for address in std::mem::take(&mut self.unchanged_entries) {
            let clean = self.cache.get(&address).map(|a| !a.is_dirty()).unwrap_or(false);
            if clean {
                self.cache.remove(&address);
            }
        }
    }
}
