// Path: crates/state/src/tree/ops.rs

//! AVL+ operations over the lazy node model: copy-on-write descent, single
//! and double rotations, recursive persist, lookup and traversal. Every
//! mutation rebuilds only the spine it touched; untouched subtrees stay
//! referenced by hash.

use canopy_storage::Store;
use canopy_types::error::StateError;
use canopy_types::hash::{branch_hash, leaf_hash, NodeHash};
use canopy_types::Version;
use std::cmp::Ordering;

use super::encode;
use super::node::{Branch, Node, NodeSummary};

/// Inserts `key` into the subtree, returning its new root. An equal key
/// updates the leaf value in place.
pub(crate) fn insert(
    node: Box<Node>,
    store: &mut Store,
    key: &[u8],
    value: Vec<u8>,
) -> Result<Box<Node>, StateError> {
    match *node {
        Node::Leaf(mut leaf) => match key.cmp(&leaf.key) {
            Ordering::Equal => {
                leaf.value = value;
                leaf.dirty = true;
                Ok(Box::new(Node::Leaf(leaf)))
            }
            Ordering::Less => {
                let split = leaf.key.clone();
                let new_leaf = Box::new(Node::new_leaf(key.to_vec(), value));
                let old_leaf = Box::new(Node::Leaf(leaf));
                Ok(Box::new(Node::Branch(Branch::new(split, new_leaf, old_leaf))))
            }
            Ordering::Greater => {
                let new_leaf = Box::new(Node::new_leaf(key.to_vec(), value));
                let old_leaf = Box::new(Node::Leaf(leaf));
                Ok(Box::new(Node::Branch(Branch::new(
                    key.to_vec(),
                    old_leaf,
                    new_leaf,
                ))))
            }
        },
        Node::Branch(mut branch) => {
            if key < branch.key.as_slice() {
                let child = branch.left.take_node(store)?;
                let child = insert(child, store, key, value)?;
                branch.set_left(child);
            } else {
                let child = branch.right.take_node(store)?;
                let child = insert(child, store, key, value)?;
                branch.set_right(child);
            }
            balance(branch, store)
        }
    }
}

/// Removes `key` from the subtree. `None` means the subtree vanished. A
/// replaced or collapsed node's persisted identity is recorded as an orphan
/// against the committing version.
pub(crate) fn remove(
    node: Box<Node>,
    store: &mut Store,
    key: &[u8],
) -> Result<Option<Box<Node>>, StateError> {
    match *node {
        Node::Leaf(leaf) => {
            if key == leaf.key.as_slice() {
                orphan(store, leaf.hash, leaf.version)?;
                Ok(None)
            } else {
                Ok(Some(Box::new(Node::Leaf(leaf))))
            }
        }
        Node::Branch(mut branch) => {
            if key < branch.key.as_slice() {
                let child = branch.left.take_node(store)?;
                match remove(child, store, key)? {
                    None => {
                        orphan(store, branch.hash, branch.version)?;
                        Ok(Some(branch.right.take_node(store)?))
                    }
                    Some(child) => {
                        branch.set_left(child);
                        Ok(Some(balance(branch, store)?))
                    }
                }
            } else {
                let removed_split = key == branch.key.as_slice();
                let child = branch.right.take_node(store)?;
                match remove(child, store, key)? {
                    None => {
                        orphan(store, branch.hash, branch.version)?;
                        Ok(Some(branch.left.take_node(store)?))
                    }
                    Some(child) => {
                        branch.set_right(child);
                        if removed_split {
                            // The split key was the minimum of the right
                            // subtree; re-derive it from the new minimum.
                            branch.key = leftmost_key(branch.right.materialize(store)?, store)?;
                        }
                        Ok(Some(balance(branch, store)?))
                    }
                }
            }
        }
    }
}

fn orphan(store: &mut Store, hash: Option<NodeHash>, version: Version) -> Result<(), StateError> {
    if let Some(hash) = hash {
        store.put_orphan(&hash, version, None)?;
    }
    Ok(())
}

/// Restores the AVL invariant at `branch` after one child changed height.
pub(crate) fn balance(mut branch: Branch, store: &mut Store) -> Result<Box<Node>, StateError> {
    match branch.balance_factor() {
        2 => {
            let double = match branch.left.materialize(store)? {
                Node::Branch(left) => left.balance_factor() < 0,
                Node::Leaf(_) => false,
            };
            if double {
                let rotated = rotate_left(take_branch(&mut branch.left, store)?, store)?;
                branch.set_left(rotated);
            }
            rotate_right(branch, store)
        }
        -2 => {
            let double = match branch.right.materialize(store)? {
                Node::Branch(right) => right.balance_factor() > 0,
                Node::Leaf(_) => false,
            };
            if double {
                let rotated = rotate_right(take_branch(&mut branch.right, store)?, store)?;
                branch.set_right(rotated);
            }
            rotate_left(branch, store)
        }
        _ => Ok(Box::new(Node::Branch(branch))),
    }
}

fn take_branch(
    child: &mut super::node::ChildRef,
    store: &Store,
) -> Result<Branch, StateError> {
    match *child.take_node(store)? {
        Node::Branch(branch) => Ok(branch),
        Node::Leaf(_) => Err(StateError::Corruption("rotation pivot is a leaf".into())),
    }
}

/// Promotes the right child; the demoted node adopts the pivot's left
/// subtree. Split keys are untouched: each branch keeps the minimum of the
/// right subtree it ends up with.
fn rotate_left(mut branch: Branch, store: &mut Store) -> Result<Box<Node>, StateError> {
    let mut pivot = take_branch(&mut branch.right, store)?;
    branch.set_right_ref(pivot.left.take_ref());
    pivot.set_left(Box::new(Node::Branch(branch)));
    Ok(Box::new(Node::Branch(pivot)))
}

/// Mirror of [`rotate_left`].
fn rotate_right(mut branch: Branch, store: &mut Store) -> Result<Box<Node>, StateError> {
    let mut pivot = take_branch(&mut branch.left, store)?;
    branch.set_left_ref(pivot.right.take_ref());
    pivot.set_right(Box::new(Node::Branch(branch)));
    Ok(Box::new(Node::Branch(pivot)))
}

/// Writes every dirty node in the subtree at `version`, emitting an orphan
/// for each replaced identity, and returns the subtree's hash. Children
/// still referenced only by hash are untouched by definition.
pub(crate) fn persist(
    node: &mut Node,
    store: &mut Store,
    version: Version,
) -> Result<NodeHash, StateError> {
    match node {
        Node::Leaf(leaf) => {
            if leaf.dirty {
                if let Some(previous) = leaf.hash {
                    store.put_orphan(&previous, leaf.version, None)?;
                }
                leaf.version = version;
                let hash = leaf_hash(version, &leaf.key, &leaf.value);
                store.put_node(&hash, &encode::encode_leaf(leaf))?;
                leaf.hash = Some(hash);
                leaf.dirty = false;
            }
            leaf.hash
                .ok_or_else(|| StateError::Corruption("clean leaf without a hash".into()))
        }
        Node::Branch(branch) => {
            if let Some(child) = branch.left.node.as_deref_mut() {
                branch.left.hash = Some(persist(child, store, version)?);
            }
            if let Some(child) = branch.right.node.as_deref_mut() {
                branch.right.hash = Some(persist(child, store, version)?);
            }
            if branch.dirty {
                let left = branch.left.hash.ok_or_else(|| {
                    StateError::Corruption("persisting branch with hashless left child".into())
                })?;
                let right = branch.right.hash.ok_or_else(|| {
                    StateError::Corruption("persisting branch with hashless right child".into())
                })?;
                if let Some(previous) = branch.hash {
                    store.put_orphan(&previous, branch.version, None)?;
                }
                branch.version = version;
                let hash = branch_hash(version, &left, &right);
                branch.hash = Some(hash);
                store.put_node(&hash, &encode::encode_branch(branch)?)?;
                branch.dirty = false;
            }
            branch
                .hash
                .ok_or_else(|| StateError::Corruption("clean branch without a hash".into()))
        }
    }
}

/// Standard BST walk; the leaf matches or the key is absent.
pub(crate) fn find<'a>(
    node: &'a mut Node,
    store: &Store,
    key: &[u8],
) -> Result<Option<&'a super::node::Leaf>, StateError> {
    match node {
        Node::Leaf(leaf) => {
            if leaf.key.as_slice() == key {
                Ok(Some(&*leaf))
            } else {
                Ok(None)
            }
        }
        Node::Branch(branch) => {
            if key < branch.key.as_slice() {
                find(branch.left.materialize(store)?, store, key)
            } else {
                find(branch.right.materialize(store)?, store, key)
            }
        }
    }
}

/// Key of the leftmost leaf in the subtree.
pub(crate) fn leftmost_key(node: &mut Node, store: &Store) -> Result<Vec<u8>, StateError> {
    match node {
        Node::Leaf(leaf) => Ok(leaf.key.clone()),
        Node::Branch(branch) => leftmost_key(branch.left.materialize(store)?, store),
    }
}

/// Canonical left-node-right traversal.
pub(crate) fn traverse(
    node: &mut Node,
    store: &Store,
    out: &mut Vec<NodeSummary>,
) -> Result<(), StateError> {
    match node {
        Node::Leaf(leaf) => {
            out.push(NodeSummary {
                key: leaf.key.clone(),
                version: leaf.version,
                hash: leaf.hash,
                leaf: true,
                left_height: 0,
                right_height: 0,
            });
            Ok(())
        }
        Node::Branch(branch) => {
            traverse(branch.left.materialize(store)?, store, out)?;
            out.push(NodeSummary {
                key: branch.key.clone(),
                version: branch.version,
                hash: branch.hash,
                leaf: false,
                left_height: branch.left.height,
                right_height: branch.right.height,
            });
            traverse(branch.right.materialize(store)?, store, out)
        }
    }
}

/// Strict bottom-up recomputation that ignores every cached hash. Committed
/// trees must reproduce their stored root hash exactly.
pub(crate) fn recompute_hash(node: &mut Node, store: &Store) -> Result<NodeHash, StateError> {
    match node {
        Node::Leaf(leaf) => Ok(leaf_hash(leaf.version, &leaf.key, &leaf.value)),
        Node::Branch(branch) => {
            let left = recompute_hash(branch.left.materialize(store)?, store)?;
            let right = recompute_hash(branch.right.materialize(store)?, store)?;
            Ok(branch_hash(branch.version, &left, &right))
        }
    }
}
