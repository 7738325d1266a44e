//! Trie node algebra and consensus node decoding.

use alloy_primitives::B256;
use alloy_rlp::{Error as RlpError, Header};

use crate::nibbles::hp_decode;

/// Node types of the Merkle-Patricia trie.
///
/// `Hash` is a lazy by-hash reference to a node stored in the database;
/// it is resolved on demand during traversal. Inline children (encodings
/// shorter than 32 bytes) are decoded eagerly, matching the consensus
/// rule that such nodes are embedded in their parent rather than stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Absent subtree
    Empty,
    /// Terminal node carrying the remaining path and a value
    Leaf {
        /// Remaining nibble path
        path: Vec<u8>,
        /// Stored value bytes
        value: Vec<u8>,
    },
    /// Shared-prefix node with a single child
    Extension {
        /// Shared nibble prefix
        path: Vec<u8>,
        /// The child under the prefix
        child: Box<Node>,
    },
    /// Sixteen-way branch with an optional value at this path
    Branch {
        /// One child per nibble
        children: Box<[Node; 16]>,
        /// Value terminating exactly at this node
        value: Option<Vec<u8>>,
    },
    /// Reference to a node by the hash of its encoding
    Hash(B256),
}

impl Node {
    /// Creates an empty 16-way child array.
    pub fn empty_children() -> Box<[Node; 16]> {
        Box::new(std::array::from_fn(|_| Node::Empty))
    }

    /// Decodes an RLP-encoded trie node.
    pub fn decode(buf: &[u8]) -> Result<Node, RlpError> {
        let mut items = buf;
        let header = Header::decode(&mut items)?;
        if !header.list {
            return Err(RlpError::Custom("trie node must be a list"));
        }
        if header.payload_length > items.len() {
            return Err(RlpError::InputTooShort);
        }
        let mut payload = &items[..header.payload_length];

        let first = take_item(&mut payload)?;
        // A two-item node is a leaf or extension; seventeen items form a
        // branch. The element count is cheapest to discover by walking.
        let second = take_item(&mut payload)?;
        if payload.is_empty() {
            return Self::decode_short(first, second);
        }

        let mut children = Self::empty_children();
        children[0] = Self::decode_ref(first)?;
        children[1] = Self::decode_ref(second)?;
        for child in children.iter_mut().skip(2) {
            *child = Self::decode_ref(take_item(&mut payload)?)?;
        }
        let value_item = take_item(&mut payload)?;
        if !payload.is_empty() {
            return Err(RlpError::Custom("invalid number of list elements"));
        }
        let value_payload = string_payload(value_item)?;
        let value = if value_payload.is_empty() { None } else { Some(value_payload.to_vec()) };
        Ok(Node::Branch { children, value })
    }

    fn decode_short(path_item: &[u8], value_item: &[u8]) -> Result<Node, RlpError> {
        let compact = string_payload(path_item)?;
        let (path, leaf) =
            hp_decode(compact).ok_or(RlpError::Custom("invalid hex-prefix flag"))?;
        if leaf {
            let value = string_payload(value_item)?.to_vec();
            Ok(Node::Leaf { path, value })
        } else {
            let child = Self::decode_ref(value_item)?;
            Ok(Node::Extension { path, child: Box::new(child) })
        }
    }

    /// Decodes a child reference: an embedded list (< 32 bytes), an empty
    /// string, or a 32-byte hash string.
    pub fn decode_ref(item: &[u8]) -> Result<Node, RlpError> {
        let first = *item.first().ok_or(RlpError::InputTooShort)?;
        if first >= 0xc0 {
            if item.len() >= 32 {
                return Err(RlpError::Custom("oversized embedded node, wants < 32 bytes"));
            }
            return Node::decode(item);
        }
        let payload = string_payload(item)?;
        match payload.len() {
            0 => Ok(Node::Empty),
            32 => Ok(Node::Hash(B256::from_slice(payload))),
            _ => Err(RlpError::Custom("invalid RLP string size, want 0 or 32 bytes")),
        }
    }
}

/// Splits the next RLP item (header included) off the front of `buf`.
pub(crate) fn take_item<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], RlpError> {
    let original = *buf;
    let mut walker = *buf;
    let header = Header::decode(&mut walker)?;
    let header_len = original.len() - walker.len();
    let total = header_len
        .checked_add(header.payload_length)
        .ok_or(RlpError::Overflow)?;
    if total > original.len() {
        return Err(RlpError::InputTooShort);
    }
    let item = &original[..total];
    *buf = &original[total..];
    Ok(item)
}

/// Returns the payload of a string item, rejecting lists.
pub(crate) fn string_payload(item: &[u8]) -> Result<&[u8], RlpError> {
    let mut walker = item;
    let header = Header::decode(&mut walker)?;
    if header.list {
        return Err(RlpError::Custom("expected RLP string"));
    }
    Ok(&walker[..header.payload_length])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibbles::hp_encode;
    use alloy_rlp::Encodable;

    fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = items.iter().flatten().copied().collect();
        let mut out = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut out);
        out.extend(payload);
        out
    }

    fn rlp_string(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        payload.encode(&mut out);
        out
    }

    #[test]
    fn test_leaf_roundtrip() {
        let path = vec![0x1, 0x2, 0x3];
        let encoded = rlp_list(&[
            rlp_string(&hp_encode(&path, true)),
            rlp_string(b"value"),
        ]);
        match Node::decode(&encoded).unwrap() {
            Node::Leaf { path: p, value } => {
                assert_eq!(p, path);
                assert_eq!(value, b"value");
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn test_extension_with_hash_child() {
        let child_hash = B256::repeat_byte(0xab);
        let encoded = rlp_list(&[
            rlp_string(&hp_encode(&[0xa], false)),
            rlp_string(child_hash.as_slice()),
        ]);
        match Node::decode(&encoded).unwrap() {
            Node::Extension { path, child } => {
                assert_eq!(path, vec![0xa]);
                assert_eq!(*child, Node::Hash(child_hash));
            }
            other => panic!("expected extension, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_with_value_and_embedded_leaf() {
        // Child 3 is an embedded leaf (its encoding is shorter than 32
        // bytes), the value slot holds a one-byte payload.
        let embedded = rlp_list(&[rlp_string(&hp_encode(&[0x5], true)), rlp_string(b"x")]);
        assert!(embedded.len() < 32);

        let mut items: Vec<Vec<u8>> = vec![rlp_string(&[]); 17];
        items[3] = embedded.clone();
        items[16] = rlp_string(b"v");
        let encoded = rlp_list(&items);

        match Node::decode(&encoded).unwrap() {
            Node::Branch { children, value } => {
                assert_eq!(value, Some(b"v".to_vec()));
                assert!(matches!(&children[3], Node::Leaf { .. }));
                for (i, child) in children.iter().enumerate() {
                    if i != 3 {
                        assert_eq!(*child, Node::Empty);
                    }
                }
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_element_count() {
        let encoded = rlp_list(&[rlp_string(b"a"), rlp_string(b"b"), rlp_string(b"c")]);
        assert!(Node::decode(&encoded).is_err());
    }
}
