//! Merkle-Patricia trie operations over a state database.

use alloy_primitives::{keccak256, B256};
use alloy_rlp::{Encodable, Header};
use alloy_trie::EMPTY_ROOT_HASH;

use rust_eth_statedb_common::StateDatabase;

use crate::nibbles::{common_prefix, hp_encode, key_to_nibbles};
use crate::node::Node;
use crate::secure_trie::SecureTrieError;

/// Merkle-Patricia trie rooted at an in-memory node.
///
/// Mutations build an in-memory subtree; untouched regions stay as lazy
/// hash references into the database. [`Trie::root`] encodes the dirty
/// subtree, persists every node of 32 encoded bytes or more under the
/// keccak of its encoding, and collapses the in-memory state back to a
/// single hash reference.
#[derive(Debug, Clone)]
pub struct Trie<DB> {
    db: DB,
    root: Node,
}

impl<DB> Trie<DB>
where
    DB: StateDatabase + Clone,
    DB::Error: std::fmt::Debug,
{
    /// Creates an empty trie.
    pub fn new(db: DB) -> Self {
        Self { db, root: Node::Empty }
    }

    /// Opens a trie at an existing root.
    ///
    /// The root node itself is resolved lazily; use
    /// [`Trie::check_root`] to validate the root is present up front.
    pub fn from_root(db: DB, root: B256) -> Self {
        let node = if root == EMPTY_ROOT_HASH { Node::Empty } else { Node::Hash(root) };
        Self { db, root: node }
    }

    /// Verifies that the root node is resolvable from the database.
    pub fn check_root(db: &DB, root: B256) -> Result<bool, SecureTrieError> {
        if root == EMPTY_ROOT_HASH {
            return Ok(true);
        }
        db.contains(root.as_slice()).map_err(|e| SecureTrieError::Database(format!("{e:?}")))
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SecureTrieError> {
        let path = key_to_nibbles(key);
        self.get_at(&self.root, &path)
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), SecureTrieError> {
        if value.is_empty() {
            return self.remove(key);
        }
        let path = key_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = self.insert_at(root, &path, value)?;
        Ok(())
    }

    /// Removes `key` from the trie. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), SecureTrieError> {
        let path = key_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = self.remove_at(root, &path)?;
        Ok(())
    }

    /// Encodes and persists all dirty nodes, returning the new root hash.
    pub fn root(&mut self) -> Result<B256, SecureTrieError> {
        let hash = match &self.root {
            Node::Empty => return Ok(EMPTY_ROOT_HASH),
            Node::Hash(hash) => *hash,
            node => {
                let encoded = self.encode_node(node)?;
                let hash = keccak256(&encoded);
                self.store(hash, encoded)?;
                hash
            }
        };
        self.root = Node::Hash(hash);
        Ok(hash)
    }

    fn load(&self, hash: B256) -> Result<Node, SecureTrieError> {
        let bytes = self
            .db
            .get(hash.as_slice())
            .map_err(|e| SecureTrieError::Database(format!("{e:?}")))?
            .ok_or(SecureTrieError::NodeNotFound)?;
        Ok(Node::decode(&bytes)?)
    }

    fn resolve(&self, node: Node) -> Result<Node, SecureTrieError> {
        match node {
            Node::Hash(hash) => self.load(hash),
            other => Ok(other),
        }
    }

    fn store(&self, hash: B256, encoded: Vec<u8>) -> Result<(), SecureTrieError> {
        self.db
            .insert(hash.as_slice(), encoded)
            .map_err(|e| SecureTrieError::Database(format!("{e:?}")))
    }

    fn get_at(&self, node: &Node, path: &[u8]) -> Result<Option<Vec<u8>>, SecureTrieError> {
        match node {
            Node::Empty => Ok(None),
            Node::Leaf { path: leaf_path, value } => {
                Ok((leaf_path.as_slice() == path).then(|| value.clone()))
            }
            Node::Extension { path: ext_path, child } => {
                if path.len() >= ext_path.len() && path[..ext_path.len()] == ext_path[..] {
                    self.get_at(child, &path[ext_path.len()..])
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => match path.split_first() {
                None => Ok(value.clone()),
                Some((nibble, rest)) => self.get_at(&children[*nibble as usize], rest),
            },
            Node::Hash(hash) => {
                let loaded = self.load(*hash)?;
                self.get_at(&loaded, path)
            }
        }
    }

    fn insert_at(&self, node: Node, path: &[u8], value: Vec<u8>) -> Result<Node, SecureTrieError> {
        match node {
            Node::Empty => Ok(Node::Leaf { path: path.to_vec(), value }),
            Node::Leaf { path: leaf_path, value: leaf_value } => {
                if leaf_path == path {
                    return Ok(Node::Leaf { path: leaf_path, value });
                }
                let shared = common_prefix(&leaf_path, path);
                let mut children = Node::empty_children();
                let mut branch_value = None;

                match leaf_path.get(shared) {
                    None => branch_value = Some(leaf_value),
                    Some(&nibble) => {
                        children[nibble as usize] =
                            Node::Leaf { path: leaf_path[shared + 1..].to_vec(), value: leaf_value };
                    }
                }
                match path.get(shared) {
                    None => branch_value = Some(value),
                    Some(&nibble) => {
                        children[nibble as usize] =
                            Node::Leaf { path: path[shared + 1..].to_vec(), value };
                    }
                }

                let branch = Node::Branch { children, value: branch_value };
                Ok(self.wrap_extension(&path[..shared], branch))
            }
            Node::Extension { path: ext_path, child } => {
                let shared = common_prefix(&ext_path, path);
                if shared == ext_path.len() {
                    let resolved = self.resolve(*child)?;
                    let new_child = self.insert_at(resolved, &path[shared..], value)?;
                    return Ok(Node::Extension { path: ext_path, child: Box::new(new_child) });
                }

                // The extension splits: the shared prefix keeps pointing at
                // a new branch holding both remainders.
                let mut children = Node::empty_children();
                let mut branch_value = None;

                let ext_nibble = ext_path[shared] as usize;
                let ext_rest = &ext_path[shared + 1..];
                children[ext_nibble] = if ext_rest.is_empty() {
                    *child
                } else {
                    Node::Extension { path: ext_rest.to_vec(), child }
                };

                match path.get(shared) {
                    None => branch_value = Some(value),
                    Some(&nibble) => {
                        children[nibble as usize] =
                            Node::Leaf { path: path[shared + 1..].to_vec(), value };
                    }
                }

                let branch = Node::Branch { children, value: branch_value };
                Ok(self.wrap_extension(&path[..shared], branch))
            }
            Node::Branch { mut children, value: branch_value } => match path.split_first() {
                None => Ok(Node::Branch { children, value: Some(value) }),
                Some((nibble, rest)) => {
                    let index = *nibble as usize;
                    let child = std::mem::replace(&mut children[index], Node::Empty);
                    let resolved = self.resolve(child)?;
                    children[index] = self.insert_at(resolved, rest, value)?;
                    Ok(Node::Branch { children, value: branch_value })
                }
            },
            Node::Hash(hash) => {
                let loaded = self.load(hash)?;
                self.insert_at(loaded, path, value)
            }
        }
    }

    fn remove_at(&self, node: Node, path: &[u8]) -> Result<Node, SecureTrieError> {
        match node {
            Node::Empty => Ok(Node::Empty),
            Node::Leaf { path: leaf_path, value } => {
                if leaf_path == path {
                    Ok(Node::Empty)
                } else {
                    Ok(Node::Leaf { path: leaf_path, value })
                }
            }
            Node::Extension { path: ext_path, child } => {
                if path.len() < ext_path.len() || path[..ext_path.len()] != ext_path[..] {
                    return Ok(Node::Extension { path: ext_path, child });
                }
                let resolved = self.resolve(*child)?;
                let new_child = self.remove_at(resolved, &path[ext_path.len()..])?;
                self.merge_extension(ext_path, new_child)
            }
            Node::Branch { mut children, value } => {
                let mut value = value;
                match path.split_first() {
                    None => value = None,
                    Some((nibble, rest)) => {
                        let index = *nibble as usize;
                        let child = std::mem::replace(&mut children[index], Node::Empty);
                        let resolved = self.resolve(child)?;
                        children[index] = self.remove_at(resolved, rest)?;
                    }
                }
                self.collapse_branch(children, value)
            }
            Node::Hash(hash) => {
                let loaded = self.load(hash)?;
                self.remove_at(loaded, path)
            }
        }
    }

    /// Re-attaches an extension prefix to whatever its child became.
    fn merge_extension(&self, prefix: Vec<u8>, child: Node) -> Result<Node, SecureTrieError> {
        let child = self.resolve(child)?;
        Ok(match child {
            Node::Empty => Node::Empty,
            Node::Leaf { path, value } => {
                let mut merged = prefix;
                merged.extend_from_slice(&path);
                Node::Leaf { path: merged, value }
            }
            Node::Extension { path, child } => {
                let mut merged = prefix;
                merged.extend_from_slice(&path);
                Node::Extension { path: merged, child }
            }
            branch @ Node::Branch { .. } => {
                Node::Extension { path: prefix, child: Box::new(branch) }
            }
            Node::Hash(_) => unreachable!("resolve returned a hash reference"),
        })
    }

    /// Restores the branch invariant after a child was removed: a branch
    /// with a lone remainder collapses into a leaf or extension.
    fn collapse_branch(
        &self,
        mut children: Box<[Node; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<Node, SecureTrieError> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| !matches!(child, Node::Empty))
            .map(|(i, _)| i)
            .collect();

        match (occupied.len(), value) {
            (0, None) => Ok(Node::Empty),
            (0, Some(value)) => Ok(Node::Leaf { path: Vec::new(), value }),
            (1, None) => {
                let index = occupied[0];
                let child = std::mem::replace(&mut children[index], Node::Empty);
                self.merge_extension(vec![index as u8], child)
            }
            (_, value) => Ok(Node::Branch { children, value }),
        }
    }

    fn wrap_extension(&self, prefix: &[u8], node: Node) -> Node {
        if prefix.is_empty() {
            node
        } else {
            Node::Extension { path: prefix.to_vec(), child: Box::new(node) }
        }
    }

    /// Full RLP encoding of a node, persisting committed children.
    fn encode_node(&self, node: &Node) -> Result<Vec<u8>, SecureTrieError> {
        let payload = match node {
            Node::Leaf { path, value } => {
                let mut payload = Vec::new();
                hp_encode(path, true).as_slice().encode(&mut payload);
                value.as_slice().encode(&mut payload);
                payload
            }
            Node::Extension { path, child } => {
                let mut payload = Vec::new();
                hp_encode(path, false).as_slice().encode(&mut payload);
                payload.extend(self.node_ref(child)?);
                payload
            }
            Node::Branch { children, value } => {
                let mut payload = Vec::new();
                for child in children.iter() {
                    payload.extend(self.node_ref(child)?);
                }
                match value {
                    Some(value) => value.as_slice().encode(&mut payload),
                    None => payload.push(alloy_rlp::EMPTY_STRING_CODE),
                }
                payload
            }
            Node::Empty | Node::Hash(_) => {
                return Err(SecureTrieError::InvalidNode);
            }
        };
        let mut out = Vec::with_capacity(payload.len() + 4);
        Header { list: true, payload_length: payload.len() }.encode(&mut out);
        out.extend(payload);
        Ok(out)
    }

    /// RLP item embedding a child in its parent: inline when the encoding
    /// is shorter than 32 bytes, otherwise a stored 32-byte hash.
    fn node_ref(&self, node: &Node) -> Result<Vec<u8>, SecureTrieError> {
        match node {
            Node::Empty => Ok(vec![alloy_rlp::EMPTY_STRING_CODE]),
            Node::Hash(hash) => {
                let mut out = Vec::with_capacity(33);
                hash.as_slice().encode(&mut out);
                Ok(out)
            }
            node => {
                let encoded = self.encode_node(node)?;
                if encoded.len() < 32 {
                    Ok(encoded)
                } else {
                    let hash = keccak256(&encoded);
                    self.store(hash, encoded)?;
                    let mut out = Vec::with_capacity(33);
                    hash.as_slice().encode(&mut out);
                    Ok(out)
                }
            }
        }
    }
}
