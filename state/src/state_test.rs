use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, U256};
use alloy_trie::KECCAK_EMPTY;

use rust_eth_statedb_common::StateDatabase;
use rust_eth_statedb_memorydb::MemoryDB;
use rust_eth_statedb_overlaydb::OverlayDB;

use crate::pod_account::PodAccount;
use crate::state::{CommitBehaviour, State, StateError, INVALID_START_NONCE};

type TestState = State<OverlayDB<MemoryDB>>;

fn new_state() -> TestState {
    State::new(OverlayDB::new(MemoryDB::new()), U256::ZERO)
}

fn addr(byte: u8) -> Address {
    Address::from_slice(&[byte; 20])
}

#[test]
fn test_absent_account_defaults() {
    let mut state = new_state();
    let a = addr(1);
    assert!(!state.address_in_use(&a).unwrap());
    assert_eq!(state.balance(&a).unwrap(), U256::ZERO);
    assert_eq!(state.get_nonce(&a).unwrap(), U256::ZERO);
    assert_eq!(state.storage(&a, &U256::from(1)).unwrap(), U256::ZERO);
    assert_eq!(state.code_hash(&a).unwrap(), KECCAK_EMPTY);
    assert_eq!(state.code_size(&a).unwrap(), 0);
    assert!(state.code(&a).unwrap().is_empty());
}

#[test]
fn test_add_balance_creates_and_touches() {
    let mut state = new_state();
    let a = addr(1);

    state.add_balance(&a, U256::from(100)).unwrap();
    assert!(state.address_in_use(&a).unwrap());
    assert_eq!(state.balance(&a).unwrap(), U256::from(100));
    assert!(state.is_touched(&a));

    // A zero-value add still marks the account touched.
    let b = addr(2);
    state.add_balance(&b, U256::ZERO).unwrap();
    assert!(state.is_touched(&b));
    assert!(state.address_in_use(&b).unwrap());
}

#[test]
fn test_set_balance_journals_the_delta() {
    let mut state = new_state();
    let a = addr(1);
    state.set_balance(&a, U256::from(700)).unwrap();
    assert_eq!(state.balance(&a).unwrap(), U256::from(700));

    let sp = state.savepoint();
    state.set_balance(&a, U256::from(50)).unwrap();
    assert_eq!(state.balance(&a).unwrap(), U256::from(50));
    state.rollback(sp);
    assert_eq!(state.balance(&a).unwrap(), U256::from(700));
}

#[test]
fn test_sub_balance_insufficient() {
    let mut state = new_state();
    let a = addr(1);
    state.add_balance(&a, U256::from(500)).unwrap();

    let err = state.sub_balance(&a, U256::from(1000)).unwrap_err();
    assert!(matches!(err, StateError::InsufficientBalance { .. }));
    // The failed subtraction must not have changed anything.
    assert_eq!(state.balance(&a).unwrap(), U256::from(500));

    // Transfer is sub-then-add: the same failure leaves both sides alone.
    let b = addr(2);
    assert!(state.transfer_balance(&a, &b, U256::from(1000)).is_err());
    assert_eq!(state.balance(&a).unwrap(), U256::from(500));
    assert!(!state.address_in_use(&b).unwrap());
}

#[test]
fn test_rollback_is_inverse_of_mutations() {
    let mut state = new_state();
    let a = addr(1);
    let b = addr(2);
    let c = addr(3);

    // Prefix M1..Mk.
    state.add_balance(&a, U256::from(1_000_000)).unwrap();
    state.inc_nonce(&a).unwrap();
    state.set_storage(&a, U256::from(7), U256::from(70)).unwrap();
    state.add_balance(&b, U256::from(5)).unwrap();

    let nonce_a = state.get_nonce(&a).unwrap();
    let balance_a = state.balance(&a).unwrap();

    let sp = state.savepoint();

    // Suffix Mk+1..Mn, exercising every change kind.
    state.transfer_balance(&a, &b, U256::from(300)).unwrap();
    state.inc_nonce(&a).unwrap();
    state.set_storage(&a, U256::from(7), U256::from(71)).unwrap();
    state.set_storage(&a, U256::from(8), U256::from(80)).unwrap();
    state.add_balance(&c, U256::from(42)).unwrap();
    state.set_new_code(&c, b"\x60\x00".to_vec()).unwrap();
    state.inc_nonce(&c).unwrap();

    state.rollback(sp);

    assert_eq!(state.balance(&a).unwrap(), balance_a);
    assert_eq!(state.get_nonce(&a).unwrap(), nonce_a);
    assert_eq!(state.storage(&a, &U256::from(7)).unwrap(), U256::from(70));
    assert_eq!(state.storage(&a, &U256::from(8)).unwrap(), U256::ZERO);
    assert_eq!(state.balance(&b).unwrap(), U256::from(5));

    // The created account is gone, along with its code and touch mark.
    assert!(!state.address_in_use(&c).unwrap());
    assert_eq!(state.code_hash(&c).unwrap(), KECCAK_EMPTY);
    assert!(!state.is_touched(&c));

    // The prefix state commits to the same root as a state that never saw
    // the suffix.
    let root_after_rollback = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    let mut pristine = new_state();
    pristine.add_balance(&a, U256::from(1_000_000)).unwrap();
    pristine.inc_nonce(&a).unwrap();
    pristine.set_storage(&a, U256::from(7), U256::from(70)).unwrap();
    pristine.add_balance(&b, U256::from(5)).unwrap();
    let root_pristine = pristine.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    assert_eq!(root_after_rollback, root_pristine);
}

#[test]
fn test_rollback_restores_storage_overlay_layering() {
    let mut state = new_state();
    let a = addr(1);

    state.add_balance(&a, U256::from(1)).unwrap();
    state.set_storage(&a, U256::from(1), U256::from(10)).unwrap();
    state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    // Overlay a new value over the committed slot, then roll it back:
    // the read must fall through to the committed trie again.
    let sp = state.savepoint();
    state.set_storage(&a, U256::from(1), U256::from(20)).unwrap();
    assert_eq!(state.storage(&a, &U256::from(1)).unwrap(), U256::from(20));
    state.rollback(sp);
    assert_eq!(state.storage(&a, &U256::from(1)).unwrap(), U256::from(10));
}

#[test]
fn test_commit_root_is_order_independent() {
    let mutations: [(Address, u64); 4] = [(addr(1), 10), (addr(2), 20), (addr(3), 30), (addr(4), 40)];

    let mut forward = new_state();
    for (address, amount) in mutations {
        forward.add_balance(&address, U256::from(amount)).unwrap();
        forward.set_storage(&address, U256::from(1), U256::from(amount)).unwrap();
    }
    let forward_root = forward.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    let mut backward = new_state();
    for (address, amount) in mutations.iter().rev() {
        backward.add_balance(address, U256::from(*amount)).unwrap();
        backward.set_storage(address, U256::from(1), U256::from(*amount)).unwrap();
    }
    let backward_root = backward.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    assert_eq!(forward_root, backward_root);
}

#[test]
fn test_empty_account_sweep() {
    let mut state = new_state();
    let untouched_empty = addr(1);
    let touched_empty = addr(2);
    let touched_nonempty = addr(3);

    // Pre-fork block: an empty account lands in the trie and stays there.
    state.add_balance(&untouched_empty, U256::ZERO).unwrap();
    let root_pre = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();
    assert!(state.address_in_use(&untouched_empty).unwrap());

    // Post-fork block touching one empty and one funded account.
    state.add_balance(&touched_empty, U256::ZERO).unwrap();
    state.add_balance(&touched_nonempty, U256::from(9)).unwrap();
    let root_post = state.commit(CommitBehaviour::RemoveEmptyAccounts).unwrap();

    assert!(!state.address_in_use(&touched_empty).unwrap());
    assert!(state.address_in_use(&touched_nonempty).unwrap());
    // The untouched empty account from the earlier block is untouched.
    assert!(state.address_in_use(&untouched_empty).unwrap());
    assert_ne!(root_pre, root_post);

    // Sweeping a touched empty account that never existed leaves the trie
    // exactly as it was.
    let ghost = addr(4);
    state.add_balance(&ghost, U256::ZERO).unwrap();
    let root_ghost = state.commit(CommitBehaviour::RemoveEmptyAccounts).unwrap();
    assert_eq!(root_ghost, root_post);
}

#[test]
fn test_kill_and_commit_removes_account() {
    let mut state = new_state();
    let a = addr(1);
    state.add_balance(&a, U256::from(10)).unwrap();
    state.set_storage(&a, U256::from(1), U256::from(1)).unwrap();
    let root_with = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    state.kill(&a);
    let root_without = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    assert_ne!(root_with, root_without);
    assert!(!state.address_in_use(&a).unwrap());
    assert_eq!(state.balance(&a).unwrap(), U256::ZERO);
}

#[test]
fn test_new_code_commit_and_size_cache() {
    let mut state = new_state();
    let a = addr(1);
    let code = b"\x60\x01\x60\x02\x01".to_vec();
    let code_hash = keccak256(&code);

    state.add_balance(&a, U256::from(1)).unwrap();
    state.set_new_code(&a, code.clone()).unwrap();
    assert_eq!(state.code_hash(&a).unwrap(), code_hash);
    assert!(state.address_has_code(&a).unwrap());

    state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    // Code is persisted under its hash and readable after a reload.
    assert_eq!(state.db().get(code_hash.as_slice()).unwrap(), Some(code.clone()));
    assert_eq!(state.code_size(&a).unwrap(), code.len());

    let mut reloaded =
        State::from_existing(state.db().clone(), state.root(), U256::ZERO).unwrap();
    assert_eq!(*reloaded.code(&a).unwrap(), code);
    assert_eq!(reloaded.code_size(&a).unwrap(), code.len());
}

#[test]
fn test_reopen_across_overlay_flush() {
    let backing = MemoryDB::new();
    let overlay = OverlayDB::new(backing.clone());
    let mut state = State::new(overlay.clone(), U256::ZERO);

    let a = addr(1);
    state.add_balance(&a, U256::from(1234)).unwrap();
    state.set_storage(&a, U256::from(5), U256::from(55)).unwrap();
    let root = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    // Before the overlay flush nothing reached the backing store.
    let fresh_overlay = OverlayDB::new(backing.clone());
    assert!(State::from_existing(fresh_overlay, root, U256::ZERO).is_err());

    overlay.commit().unwrap();

    let mut reopened =
        State::from_existing(OverlayDB::new(backing), root, U256::ZERO).unwrap();
    assert_eq!(reopened.balance(&a).unwrap(), U256::from(1234));
    assert_eq!(reopened.storage(&a, &U256::from(5)).unwrap(), U256::from(55));
}

#[test]
fn test_clone_is_independent_over_shared_overlay() {
    let mut state = new_state();
    let a = addr(1);
    state.add_balance(&a, U256::from(100)).unwrap();
    state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    let mut copy = state.clone();
    copy.add_balance(&a, U256::from(1)).unwrap();
    assert_eq!(copy.balance(&a).unwrap(), U256::from(101));

    // The original cache and journal are unaffected by the copy's work.
    assert_eq!(state.balance(&a).unwrap(), U256::from(100));
    assert_eq!(state.savepoint(), 0);
}

#[test]
fn test_populate_from_seeds_a_root() {
    let mut genesis = BTreeMap::new();
    genesis.insert(addr(1), PodAccount::with_balance(U256::from(10).pow(U256::from(18))));
    genesis.insert(
        addr(2),
        PodAccount {
            balance: U256::from(1),
            nonce: U256::from(3),
            code: Some(b"\x60\x00".to_vec()),
            storage: BTreeMap::from([(U256::from(1), U256::from(2))]),
        },
    );

    let mut state = new_state();
    state.populate_from(genesis.clone());
    let root = state.commit(CommitBehaviour::KeepEmptyAccounts).unwrap();

    // The same genesis seeded into a second state commits identically.
    let mut again = new_state();
    again.populate_from(genesis);
    assert_eq!(again.commit(CommitBehaviour::KeepEmptyAccounts).unwrap(), root);

    assert_eq!(state.get_nonce(&addr(2)).unwrap(), U256::from(3));
    assert_eq!(state.storage(&addr(2), &U256::from(1)).unwrap(), U256::from(2));
}

#[test]
fn test_account_start_nonce_is_required_for_creation() {
    let mut state = State::new(OverlayDB::new(MemoryDB::new()), INVALID_START_NONCE);
    let err = state.add_balance(&addr(1), U256::from(1)).unwrap_err();
    assert!(matches!(err, StateError::InvalidAccountStartNonceInState));

    state.note_account_start_nonce(U256::ZERO).unwrap();
    state.add_balance(&addr(1), U256::from(1)).unwrap();

    let err = state.note_account_start_nonce(U256::from(7)).unwrap_err();
    assert!(matches!(err, StateError::IncorrectAccountStartNonceInState));
}

#[test]
fn test_from_existing_rejects_unknown_root() {
    let err = State::from_existing(
        OverlayDB::new(MemoryDB::new()),
        keccak256(b"no such root"),
        U256::ZERO,
    )
    .err()
    .expect("unknown root must be rejected");
    assert!(matches!(err, StateError::InvalidStateRoot(_)));
}

#[test]
fn test_created_account_starts_at_configured_nonce() {
    let mut state = State::new(OverlayDB::new(MemoryDB::new()), U256::from(1 << 20));
    let a = addr(1);
    assert_eq!(state.get_nonce(&a).unwrap(), U256::from(1 << 20));
    state.inc_nonce(&a).unwrap();
    assert_eq!(state.get_nonce(&a).unwrap(), U256::from((1 << 20) + 1));
}
