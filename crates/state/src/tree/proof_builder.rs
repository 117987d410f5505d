// Path: crates/state/src/tree/proof_builder.rs

//! Proof construction: post-order collection of the root path for
//! membership proofs, and the down-walk neighbor search backing
//! non-membership proofs.

use canopy_storage::Store;
use canopy_types::error::{ProofError, StateError};
use canopy_types::hash::u32be;

use super::node::Node;
use super::ops;
use super::proof::{BranchTriple, ExistenceProof, LeafTriple, NonExistenceProof};

/// Builds the membership proof for `key`, failing if the path does not end
/// in a matching leaf.
pub(crate) fn existence_proof(
    root: &mut Node,
    store: &Store,
    key: &[u8],
) -> Result<ExistenceProof, ProofError> {
    let mut path = Vec::new();
    let leaf = collect_path(root, store, key, &mut path)?;
    Ok(ExistenceProof { leaf, path })
}

/// Descends to the leaf, then pushes one triple per branch on the way back
/// up — child-to-root order. The sibling recorded at each branch is the
/// child hash on the side the descent did not take.
fn collect_path(
    node: &mut Node,
    store: &Store,
    key: &[u8],
    path: &mut Vec<BranchTriple>,
) -> Result<LeafTriple, ProofError> {
    match node {
        Node::Leaf(leaf) => {
            if leaf.key.as_slice() != key {
                return Err(ProofError::KeyAbsent);
            }
            Ok(LeafTriple {
                version: u32be(leaf.version),
                key: leaf.key.clone(),
                value: leaf.value.clone(),
            })
        }
        Node::Branch(branch) => {
            if key < branch.key.as_slice() {
                let leaf = collect_path(branch.left.materialize(store)?, store, key, path)?;
                let sibling = branch.right.hash.ok_or_else(unpersisted)?;
                path.push(BranchTriple {
                    version: u32be(branch.version),
                    left: None,
                    right: Some(sibling.0),
                });
                Ok(leaf)
            } else {
                let leaf = collect_path(branch.right.materialize(store)?, store, key, path)?;
                let sibling = branch.left.hash.ok_or_else(unpersisted)?;
                path.push(BranchTriple {
                    version: u32be(branch.version),
                    left: Some(sibling.0),
                    right: None,
                });
                Ok(leaf)
            }
        }
    }
}

fn unpersisted() -> ProofError {
    ProofError::State(StateError::Corruption(
        "proof requested over an unpersisted subtree".into(),
    ))
}

/// Builds the non-membership proof for `key`: membership proofs for its
/// in-order neighbors, either of which may be absent at the edges of the
/// key space.
pub(crate) fn non_existence_proof(
    root: Option<&mut Node>,
    store: &Store,
    key: &[u8],
) -> Result<NonExistenceProof, ProofError> {
    let Some(root) = root else {
        return Ok(NonExistenceProof {
            key: key.to_vec(),
            left: None,
            right: None,
        });
    };
    if ops::find(&mut *root, store, key)?.is_some() {
        return Err(ProofError::KeyPresent);
    }
    let left_key = left_neighbor_key(&mut *root, store, key)?;
    let right_key = right_neighbor_key(&mut *root, store, key)?;
    let left = match left_key {
        Some(neighbor) => Some(existence_proof(&mut *root, store, &neighbor)?),
        None => None,
    };
    let right = match right_key {
        Some(neighbor) => Some(existence_proof(&mut *root, store, &neighbor)?),
        None => None,
    };
    Ok(NonExistenceProof {
        key: key.to_vec(),
        left,
        right,
    })
}

/// Largest stored key strictly below `key`. Descending right keeps the
/// branch as a fallback: its split key is a real stored key below the
/// query. A leaf counts only when it lies strictly below the query.
fn left_neighbor_key(
    node: &mut Node,
    store: &Store,
    key: &[u8],
) -> Result<Option<Vec<u8>>, StateError> {
    match node {
        Node::Leaf(leaf) => Ok((leaf.key.as_slice() < key).then(|| leaf.key.clone())),
        Node::Branch(branch) => {
            if key > branch.key.as_slice() {
                let inner = left_neighbor_key(branch.right.materialize(store)?, store, key)?;
                Ok(inner.or_else(|| Some(branch.key.clone())))
            } else {
                left_neighbor_key(branch.left.materialize(store)?, store, key)
            }
        }
    }
}

/// Smallest stored key strictly above `key`; mirror of the left search.
fn right_neighbor_key(
    node: &mut Node,
    store: &Store,
    key: &[u8],
) -> Result<Option<Vec<u8>>, StateError> {
    match node {
        Node::Leaf(leaf) => Ok((leaf.key.as_slice() > key).then(|| leaf.key.clone())),
        Node::Branch(branch) => {
            if key < branch.key.as_slice() {
                let inner = right_neighbor_key(branch.left.materialize(store)?, store, key)?;
                Ok(inner.or_else(|| Some(branch.key.clone())))
            } else {
                right_neighbor_key(branch.right.materialize(store)?, store, key)
            }
        }
    }
}
