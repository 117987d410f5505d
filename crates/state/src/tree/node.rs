// Path: crates/state/src/tree/node.rs

//! In-memory node model. On disk a branch references its children only by
//! content hash; in memory each side is a [`ChildRef`] that materializes the
//! child lazily from the store and caches it. Mutations mark nodes dirty;
//! `persist` stamps dirty nodes with the committing version and re-hashes
//! them.

use canopy_storage::Store;
use canopy_types::error::{StateError, StorageError};
use canopy_types::hash::NodeHash;
use canopy_types::Version;

use super::encode;

#[derive(Debug)]
pub enum Node {
    Leaf(Leaf),
    Branch(Branch),
}

/// A leaf: user key plus the codec-packed value.
#[derive(Debug)]
pub struct Leaf {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: Version,
    pub(crate) hash: Option<NodeHash>,
    pub(crate) dirty: bool,
}

/// An inner node. `key` is the split key: the smallest key reachable through
/// the right subtree.
#[derive(Debug)]
pub struct Branch {
    pub key: Vec<u8>,
    pub version: Version,
    pub(crate) left: ChildRef,
    pub(crate) right: ChildRef,
    pub(crate) hash: Option<NodeHash>,
    pub(crate) dirty: bool,
}

/// One side of a branch: the recorded child hash and height, plus the
/// materialized child once it has been loaded. A freshly built child has no
/// hash until it is persisted.
#[derive(Debug)]
pub(crate) struct ChildRef {
    pub(crate) hash: Option<NodeHash>,
    pub(crate) height: u32,
    pub(crate) node: Option<Box<Node>>,
}

/// Flat view of one node, yielded by the in-order traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub key: Vec<u8>,
    pub version: Version,
    pub hash: Option<NodeHash>,
    pub leaf: bool,
    pub left_height: u32,
    pub right_height: u32,
}

impl Node {
    /// A fresh, dirty leaf. It receives its version and hash at persist.
    pub(crate) fn new_leaf(key: Vec<u8>, value: Vec<u8>) -> Node {
        Node::Leaf(Leaf {
            key,
            value,
            version: 0,
            hash: None,
            dirty: true,
        })
    }

    /// Materializes the node stored under `hash`.
    pub(crate) fn load(store: &Store, hash: NodeHash) -> Result<Node, StateError> {
        let bytes = store.get_node(&hash).map_err(|e| match e {
            StorageError::NotFound => {
                StateError::Corruption(format!("missing referenced node {hash:?}"))
            }
            other => StateError::Storage(other),
        })?;
        encode::decode_node(&bytes, hash)
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Node::Leaf(leaf) => &leaf.key,
            Node::Branch(branch) => &branch.key,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Node::Leaf(leaf) => leaf.version,
            Node::Branch(branch) => branch.version,
        }
    }

    pub(crate) fn hash(&self) -> Option<NodeHash> {
        match self {
            Node::Leaf(leaf) => leaf.hash,
            Node::Branch(branch) => branch.hash,
        }
    }

    pub(crate) fn height(&self) -> u32 {
        match self {
            Node::Leaf(_) => 0,
            Node::Branch(branch) => branch.height(),
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.dirty,
            Node::Branch(branch) => branch.dirty,
        }
    }
}

impl Branch {
    /// A fresh, dirty branch over two materialized children.
    pub(crate) fn new(key: Vec<u8>, left: Box<Node>, right: Box<Node>) -> Branch {
        Branch {
            key,
            version: 0,
            left: ChildRef::from_node(left),
            right: ChildRef::from_node(right),
            hash: None,
            dirty: true,
        }
    }

    pub(crate) fn height(&self) -> u32 {
        self.left.height.max(self.right.height) + 1
    }

    /// `leftHeight - rightHeight`.
    pub(crate) fn balance_factor(&self) -> i64 {
        i64::from(self.left.height) - i64::from(self.right.height)
    }

    pub(crate) fn set_left(&mut self, child: Box<Node>) {
        self.set_left_ref(ChildRef::from_node(child));
    }

    pub(crate) fn set_right(&mut self, child: Box<Node>) {
        self.set_right_ref(ChildRef::from_node(child));
    }

    /// Replaces the left side. The branch becomes dirty when the child is
    /// dirty or changes identity.
    pub(crate) fn set_left_ref(&mut self, child: ChildRef) {
        if child.is_dirty() || child.hash != self.left.hash {
            self.dirty = true;
        }
        self.left = child;
    }

    pub(crate) fn set_right_ref(&mut self, child: ChildRef) {
        if child.is_dirty() || child.hash != self.right.hash {
            self.dirty = true;
        }
        self.right = child;
    }
}

impl ChildRef {
    pub(crate) fn from_node(node: Box<Node>) -> ChildRef {
        ChildRef {
            hash: node.hash(),
            height: node.height(),
            node: Some(node),
        }
    }

    pub(crate) fn from_hash(hash: NodeHash, height: u32) -> ChildRef {
        ChildRef {
            hash: Some(hash),
            height,
            node: None,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.node.as_deref().map_or(false, Node::is_dirty)
    }

    /// Loads the child from the store on first access and caches it.
    pub(crate) fn materialize(&mut self, store: &Store) -> Result<&mut Node, StateError> {
        if self.node.is_none() {
            let hash = self.hash.ok_or_else(|| {
                StateError::Corruption("child reference with neither node nor hash".into())
            })?;
            self.node = Some(Box::new(Node::load(store, hash)?));
        }
        match self.node.as_deref_mut() {
            Some(node) => Ok(node),
            None => Err(StateError::Corruption("child failed to materialize".into())),
        }
    }

    /// Materializes and detaches the child, leaving the recorded hash in
    /// place for the dirty comparison of whatever replaces it.
    pub(crate) fn take_node(&mut self, store: &Store) -> Result<Box<Node>, StateError> {
        self.materialize(store)?;
        match self.node.take() {
            Some(node) => Ok(node),
            None => Err(StateError::Corruption("child failed to materialize".into())),
        }
    }

    /// Moves the whole reference out, without materializing a lazy child.
    /// Used by rotations to hand an untouched subtree to a new parent.
    pub(crate) fn take_ref(&mut self) -> ChildRef {
        std::mem::replace(
            self,
            ChildRef {
                hash: None,
                height: 0,
                node: None,
            },
        )
    }
}
