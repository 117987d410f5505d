// Path: crates/state/src/tree/encode.rs

//! Compact on-disk node forms: length-discriminated arrays, arity 3 for
//! leaves and arity 6 for branches. The same forms flow into snapshot
//! chunks, so a decoded form can recompute its content hash without the
//! store.

use canopy_types::codec::{write_array_header, write_bin, write_uint, Reader};
use canopy_types::error::StateError;
use canopy_types::hash::{branch_hash, leaf_hash, NodeHash};
use canopy_types::Version;

use super::node::{Branch, ChildRef, Leaf, Node};

const LEAF_ARITY: usize = 3;
const BRANCH_ARITY: usize = 6;

/// `[key, value, version]`
pub(crate) fn encode_leaf(leaf: &Leaf) -> Vec<u8> {
    let mut out = Vec::with_capacity(leaf.key.len() + leaf.value.len() + 16);
    write_array_header(&mut out, LEAF_ARITY);
    write_bin(&mut out, &leaf.key);
    write_bin(&mut out, &leaf.value);
    write_uint(&mut out, u64::from(leaf.version));
    out
}

/// `[key, version, leftHeight, rightHeight, leftHash, rightHash]`
pub(crate) fn encode_branch(branch: &Branch) -> Result<Vec<u8>, StateError> {
    let left = branch
        .left
        .hash
        .ok_or_else(|| StateError::Corruption("encoding branch with unpersisted left child".into()))?;
    let right = branch
        .right
        .hash
        .ok_or_else(|| StateError::Corruption("encoding branch with unpersisted right child".into()))?;
    let mut out = Vec::with_capacity(branch.key.len() + 2 * 34 + 20);
    write_array_header(&mut out, BRANCH_ARITY);
    write_bin(&mut out, &branch.key);
    write_uint(&mut out, u64::from(branch.version));
    write_uint(&mut out, u64::from(branch.left.height));
    write_uint(&mut out, u64::from(branch.right.height));
    write_bin(&mut out, left.as_bytes());
    write_bin(&mut out, right.as_bytes());
    Ok(out)
}

/// A decoded compact form, not yet bound to a content hash.
#[derive(Debug, Clone)]
pub(crate) enum CompactNode {
    Leaf {
        key: Vec<u8>,
        value: Vec<u8>,
        version: Version,
    },
    Branch {
        key: Vec<u8>,
        version: Version,
        left_height: u32,
        right_height: u32,
        left_hash: NodeHash,
        right_hash: NodeHash,
    },
}

impl CompactNode {
    /// Recomputes the canonical content hash from the recorded fields. A
    /// restored node keeps its original version, so this reproduces the
    /// exact hash it was stored under.
    pub(crate) fn hash(&self) -> NodeHash {
        match self {
            CompactNode::Leaf { key, value, version } => leaf_hash(*version, key, value),
            CompactNode::Branch {
                version,
                left_hash,
                right_hash,
                ..
            } => branch_hash(*version, left_hash, right_hash),
        }
    }

    /// Binds the form to its content hash as a clean in-memory node with
    /// lazy children.
    pub(crate) fn into_node(self, hash: NodeHash) -> Node {
        match self {
            CompactNode::Leaf { key, value, version } => Node::Leaf(Leaf {
                key,
                value,
                version,
                hash: Some(hash),
                dirty: false,
            }),
            CompactNode::Branch {
                key,
                version,
                left_height,
                right_height,
                left_hash,
                right_hash,
            } => Node::Branch(Branch {
                key,
                version,
                left: ChildRef::from_hash(left_hash, left_height),
                right: ChildRef::from_hash(right_hash, right_height),
                hash: Some(hash),
                dirty: false,
            }),
        }
    }
}

fn read_u32(rd: &mut Reader<'_>, what: &str) -> Result<u32, StateError> {
    let n = rd.read_uint().map_err(StateError::Codec)?;
    u32::try_from(n).map_err(|_| StateError::Corruption(format!("{what} out of range: {n}")))
}

fn read_hash(rd: &mut Reader<'_>) -> Result<NodeHash, StateError> {
    let bytes = rd.read_bin().map_err(StateError::Codec)?;
    NodeHash::from_slice(bytes)
}

/// Decodes one compact form from the cursor, leaving it positioned at the
/// next form. Arity discriminates the variant.
pub(crate) fn decode_compact(rd: &mut Reader<'_>) -> Result<CompactNode, StateError> {
    let arity = rd.read_array_header().map_err(StateError::Codec)?;
    match arity {
        LEAF_ARITY => {
            let key = rd.read_bin().map_err(StateError::Codec)?.to_vec();
            let value = rd.read_bin().map_err(StateError::Codec)?.to_vec();
            let version = read_u32(rd, "leaf version")?;
            Ok(CompactNode::Leaf { key, value, version })
        }
        BRANCH_ARITY => {
            let key = rd.read_bin().map_err(StateError::Codec)?.to_vec();
            let version = read_u32(rd, "branch version")?;
            let left_height = read_u32(rd, "left height")?;
            let right_height = read_u32(rd, "right height")?;
            let left_hash = read_hash(rd)?;
            let right_hash = read_hash(rd)?;
            Ok(CompactNode::Branch {
                key,
                version,
                left_height,
                right_height,
                left_hash,
                right_hash,
            })
        }
        n => Err(StateError::Corruption(format!("node form of arity {n}"))),
    }
}

/// Decodes a whole nodes-table value.
pub(crate) fn decode_node(bytes: &[u8], hash: NodeHash) -> Result<Node, StateError> {
    let mut rd = Reader::new(bytes);
    let compact = decode_compact(&mut rd)?;
    rd.finish().map_err(StateError::Codec)?;
    Ok(compact.into_node(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::codec;

    #[test]
    fn leaf_form_round_trips() {
        let leaf = Leaf {
            key: b"key".to_vec(),
            value: codec::pack(b"value"),
            version: 7,
            hash: None,
            dirty: true,
        };
        let bytes = encode_leaf(&leaf);
        let hash = leaf_hash(7, &leaf.key, &leaf.value);
        match decode_node(&bytes, hash).unwrap() {
            Node::Leaf(out) => {
                assert_eq!(out.key, leaf.key);
                assert_eq!(out.value, leaf.value);
                assert_eq!(out.version, 7);
                assert_eq!(out.hash, Some(hash));
                assert!(!out.dirty);
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn branch_form_round_trips() {
        let left = NodeHash([0xaa; 32]);
        let right = NodeHash([0xbb; 32]);
        let branch = Branch {
            key: b"split".to_vec(),
            version: 9,
            left: ChildRef::from_hash(left, 2),
            right: ChildRef::from_hash(right, 3),
            hash: None,
            dirty: false,
        };
        let bytes = encode_branch(&branch).unwrap();
        let hash = branch_hash(9, &left, &right);
        match decode_node(&bytes, hash).unwrap() {
            Node::Branch(out) => {
                assert_eq!(out.key, b"split");
                assert_eq!(out.version, 9);
                assert_eq!(out.left.height, 2);
                assert_eq!(out.right.height, 3);
                assert_eq!(out.left.hash, Some(left));
                assert_eq!(out.right.hash, Some(right));
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn compact_hash_matches_the_canonical_rules() {
        let value = codec::pack(b"v");
        let compact = CompactNode::Leaf {
            key: b"k".to_vec(),
            value: value.clone(),
            version: 3,
        };
        assert_eq!(compact.hash(), leaf_hash(3, b"k", &value));
    }

    #[test]
    fn unknown_arity_is_corruption() {
        let mut bytes = Vec::new();
        write_array_header(&mut bytes, 4);
        assert!(matches!(
            decode_node(&bytes, NodeHash([0; 32])),
            Err(StateError::Corruption(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let leaf = Leaf {
            key: b"k".to_vec(),
            value: codec::pack(b"v"),
            version: 1,
            hash: None,
            dirty: true,
        };
        let mut bytes = encode_leaf(&leaf);
        bytes.push(0);
        assert!(decode_node(&bytes, NodeHash([0; 32])).is_err());
    }

    #[test]
    fn branch_encoding_requires_persisted_children() {
        let branch = Branch {
            key: b"s".to_vec(),
            version: 1,
            left: ChildRef::from_node(Box::new(Node::new_leaf(b"a".to_vec(), codec::pack(b"1")))),
            right: ChildRef::from_hash(NodeHash([1; 32]), 0),
            hash: None,
            dirty: true,
        };
        assert!(matches!(
            encode_branch(&branch),
            Err(StateError::Corruption(_))
        ));
    }
}
