use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_trie::EMPTY_ROOT_HASH;
use rust_eth_statedb_memorydb::MemoryDB;

use crate::account::StateAccount;
use crate::secure_trie::SecureTrie;
use crate::trie::Trie;

#[test]
fn test_empty_trie_root() {
    let mut trie = Trie::new(MemoryDB::new());
    assert_eq!(trie.root().unwrap(), EMPTY_ROOT_HASH);

    let mut secure = SecureTrie::new(MemoryDB::new());
    assert_eq!(secure.root().unwrap(), EMPTY_ROOT_HASH);
}

#[test]
fn test_known_root_any_insertion_order() {
    // The classic cross-client trie vector.
    let pairs: [(&[u8], &[u8]); 4] =
        [(b"do", b"verb"), (b"dog", b"puppy"), (b"doge", b"coin"), (b"horse", b"stallion")];
    let expected =
        B256::from_slice(&hex("5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"));

    let orders: [[usize; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2]];
    for order in orders {
        let mut trie = Trie::new(MemoryDB::new());
        for i in order {
            let (key, value) = pairs[i];
            trie.insert(key, value.to_vec()).unwrap();
        }
        assert_eq!(trie.root().unwrap(), expected);
    }
}

#[test]
fn test_insert_get_remove_roundtrip() {
    let mut trie = Trie::new(MemoryDB::new());
    trie.insert(b"do", b"verb".to_vec()).unwrap();
    trie.insert(b"dog", b"puppy".to_vec()).unwrap();

    assert_eq!(trie.get(b"do").unwrap(), Some(b"verb".to_vec()));
    assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
    assert_eq!(trie.get(b"doge").unwrap(), None);

    let root_before = trie.root().unwrap();
    trie.insert(b"doge", b"coin".to_vec()).unwrap();
    trie.remove(b"doge").unwrap();
    assert_eq!(trie.root().unwrap(), root_before, "removal must restore the prior root");

    // Removing an absent key is tolerated and changes nothing.
    trie.remove(b"absent").unwrap();
    assert_eq!(trie.root().unwrap(), root_before);
}

#[test]
fn test_remove_down_to_empty() {
    let mut trie = Trie::new(MemoryDB::new());
    trie.insert(b"a", vec![1]).unwrap();
    trie.insert(b"b", vec![2]).unwrap();
    trie.remove(b"a").unwrap();
    trie.remove(b"b").unwrap();
    assert_eq!(trie.root().unwrap(), EMPTY_ROOT_HASH);
}

#[test]
fn test_reopen_from_root() {
    let db = MemoryDB::new();
    let mut trie = SecureTrie::new(db.clone());

    let mut addresses = Vec::new();
    for i in 1u8..=50 {
        let address = Address::from_slice(&[i; 20]);
        let account = StateAccount::default().with_balance(U256::from(i));
        trie.insert(address.as_slice(), account.to_rlp()).unwrap();
        addresses.push((address, account));
    }
    let root = trie.root().unwrap();

    let reopened = SecureTrie::from_root(db.clone(), root).unwrap();
    for (address, account) in &addresses {
        let data = reopened.get(address.as_slice()).unwrap().expect("account present");
        assert_eq!(StateAccount::from_rlp(&data).unwrap(), *account);
    }

    // A root that was never committed must be rejected.
    assert!(SecureTrie::from_root(db, keccak256(b"nowhere")).is_err());
}

#[test]
fn test_update_reaches_new_root_deterministically() {
    let db = MemoryDB::new();
    let mut trie = SecureTrie::new(db.clone());
    for i in 1u8..=20 {
        let address = Address::from_slice(&[i; 20]);
        trie.insert(address.as_slice(), StateAccount::default().to_rlp()).unwrap();
    }
    let root = trie.root().unwrap();

    // Apply the same update starting from the committed root twice; the
    // roots must agree and differ from the starting root.
    let mut roots = Vec::new();
    for _ in 0..2 {
        let mut reopened = SecureTrie::from_root(db.clone(), root).unwrap();
        let address = Address::from_slice(&[7u8; 20]);
        let account = StateAccount::default().with_balance(U256::from(1234u64));
        reopened.insert(address.as_slice(), account.to_rlp()).unwrap();
        roots.push(reopened.root().unwrap());
    }
    assert_eq!(roots[0], roots[1]);
    assert_ne!(roots[0], root);
}

#[test]
fn test_storage_words() {
    let mut trie = SecureTrie::new(MemoryDB::new());
    let slot = B256::from(U256::from(7));

    assert_eq!(trie.get_word(&slot).unwrap(), U256::ZERO);

    trie.insert_word(&slot, U256::from(0xdeadbeefu64)).unwrap();
    assert_eq!(trie.get_word(&slot).unwrap(), U256::from(0xdeadbeefu64));
    let root_set = trie.root().unwrap();
    assert_ne!(root_set, EMPTY_ROOT_HASH);

    // Writing zero deletes the slot entirely.
    trie.insert_word(&slot, U256::ZERO).unwrap();
    assert_eq!(trie.get_word(&slot).unwrap(), U256::ZERO);
    assert_eq!(trie.root().unwrap(), EMPTY_ROOT_HASH);
}

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}
