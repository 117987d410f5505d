// Path: crates/state/src/tree/proof.rs

//! Merkle proof structures and the pure, stateless verifiers.
//!
//! An existence proof is the leaf triple plus one sibling-hash triple per
//! branch on the root path, child-to-root. Verification folds the leaf hash
//! up through the siblings and compares the result against a trusted root.

use canopy_types::hash::{sha256_concat, NodeHash, RootHash};
use parity_scale_codec::{Decode, Encode};

use canopy_types::error::ProofError;

/// `(u32be(version), key, value)` of the proven leaf. The value is the
/// codec-packed form — byte equality is what verification checks.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeafTriple {
    pub version: [u8; 4],
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// `(u32be(version), leftSibling?, rightSibling?)` for one branch on the
/// path. Exactly one sibling slot is present: the one *not* on the path.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct BranchTriple {
    pub version: [u8; 4],
    pub left: Option<[u8; 32]>,
    pub right: Option<[u8; 32]>,
}

/// Membership proof for one key.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExistenceProof {
    pub leaf: LeafTriple,
    /// Branch triples in child-to-root order.
    pub path: Vec<BranchTriple>,
}

/// Non-membership proof: the queried key plus membership proofs for its
/// in-order neighbors. Both neighbors are absent only for an empty tree.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NonExistenceProof {
    pub key: Vec<u8>,
    pub left: Option<ExistenceProof>,
    pub right: Option<ExistenceProof>,
}

/// Verifies a membership proof against a trusted root hash. `packed_value`
/// is the codec-packed expected value.
pub fn verify_existence(
    root: &RootHash,
    key: &[u8],
    packed_value: &[u8],
    proof: &ExistenceProof,
) -> Result<(), ProofError> {
    if proof.leaf.key != key {
        return Err(ProofError::KeyMismatch);
    }
    if proof.leaf.value != packed_value {
        return Err(ProofError::ValueMismatch);
    }
    let mut acc = sha256_concat(&[&proof.leaf.version, &proof.leaf.key, &proof.leaf.value]);
    for step in &proof.path {
        acc = match (step.left, step.right) {
            (Some(left), _) => sha256_concat(&[&step.version, &left, &acc.0]),
            (None, Some(right)) => sha256_concat(&[&step.version, &acc.0, &right]),
            (None, None) => return Err(ProofError::EmptySiblings),
        };
    }
    if acc != *root {
        return Err(ProofError::RootMismatch);
    }
    Ok(())
}

/// Verifies a non-membership proof. `root` is absent for an empty tree.
/// Each neighbor proof must verify independently and lie strictly on its
/// side of the queried key.
pub fn verify_non_existence(
    root: Option<&RootHash>,
    key: &[u8],
    proof: &NonExistenceProof,
) -> Result<(), ProofError> {
    if proof.key != key {
        return Err(ProofError::KeyMismatch);
    }
    if proof.left.is_none() && proof.right.is_none() {
        // Only an empty tree has no neighbors at all.
        return match root {
            None => Ok(()),
            Some(_) => Err(ProofError::RootMismatch),
        };
    }
    let root = root.ok_or(ProofError::RootMismatch)?;
    if let Some(left) = &proof.left {
        if left.leaf.key.as_slice() >= key {
            return Err(ProofError::MisorderedNeighbor);
        }
        verify_existence(root, &left.leaf.key, &left.leaf.value, left)?;
    }
    if let Some(right) = &proof.right {
        if right.leaf.key.as_slice() <= key {
            return Err(ProofError::MisorderedNeighbor);
        }
        verify_existence(root, &right.leaf.key, &right.leaf.value, right)?;
    }
    Ok(())
}

// --- External tree-proof format mapping ---

/// Hash operation of the external proof format. SHA-256 is the only one the
/// store emits.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOp {
    Sha256,
}

/// Leaf operation: `SHA256(prefix ‖ key ‖ value)` with the version tag as
/// the fixed 4-byte prefix.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeafOp {
    pub hash: HashOp,
    pub prefix: [u8; 4],
}

/// Inner operation: `SHA256(prefix ‖ child ‖ suffix)`. A left sibling rides
/// in the prefix after the version tag; a right sibling is the suffix.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct InnerOp {
    pub hash: HashOp,
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

/// Fixed parameters of the external format: binary inner nodes, 32-byte
/// children in left-then-right order, 4-byte version prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSpec {
    pub leaf_hash: HashOp,
    pub inner_hash: HashOp,
    pub child_size: usize,
    pub min_prefix_len: usize,
    pub max_prefix_len: usize,
    pub child_order: [u8; 2],
}

pub fn proof_spec() -> ProofSpec {
    ProofSpec {
        leaf_hash: HashOp::Sha256,
        inner_hash: HashOp::Sha256,
        child_size: 32,
        min_prefix_len: 4,
        max_prefix_len: 4,
        child_order: [0, 1],
    }
}

impl ExistenceProof {
    /// Renders the proof as the external format's operation list.
    pub fn to_ops(&self) -> Result<(LeafOp, Vec<InnerOp>), ProofError> {
        let leaf = LeafOp {
            hash: HashOp::Sha256,
            prefix: self.leaf.version,
        };
        let mut ops = Vec::with_capacity(self.path.len());
        for step in &self.path {
            let (prefix, suffix) = match (step.left, step.right) {
                (Some(left), _) => ([&step.version[..], &left[..]].concat(), Vec::new()),
                (None, Some(right)) => (step.version.to_vec(), right.to_vec()),
                (None, None) => return Err(ProofError::EmptySiblings),
            };
            ops.push(InnerOp {
                hash: HashOp::Sha256,
                prefix,
                suffix,
            });
        }
        Ok((leaf, ops))
    }
}

/// The external verifier's computation: fold the operation list over the
/// key and packed value. Equals the tree root exactly when the proof holds.
pub fn fold_ops(leaf: &LeafOp, ops: &[InnerOp], key: &[u8], packed_value: &[u8]) -> NodeHash {
    let mut acc = sha256_concat(&[&leaf.prefix, key, packed_value]);
    for op in ops {
        acc = sha256_concat(&[&op.prefix, &acc.0, &op.suffix]);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::hash::{branch_hash, leaf_hash, u32be};

    fn single_step_proof() -> (RootHash, ExistenceProof) {
        // A two-leaf tree built by hand: leaf "a" under a branch whose right
        // child is leaf "b".
        let value_a = b"\xc4\x011".to_vec();
        let value_b = b"\xc4\x012".to_vec();
        let hash_a = leaf_hash(1, b"a", &value_a);
        let hash_b = leaf_hash(2, b"b", &value_b);
        let root = branch_hash(2, &hash_a, &hash_b);
        let proof = ExistenceProof {
            leaf: LeafTriple {
                version: u32be(1),
                key: b"a".to_vec(),
                value: value_a,
            },
            path: vec![BranchTriple {
                version: u32be(2),
                left: None,
                right: Some(hash_b.0),
            }],
        };
        (root, proof)
    }

    #[test]
    fn valid_proof_verifies() {
        let (root, proof) = single_step_proof();
        assert!(verify_existence(&root, b"a", b"\xc4\x011", &proof).is_ok());
    }

    #[test]
    fn each_violation_surfaces_its_own_error() {
        let (root, proof) = single_step_proof();
        assert!(matches!(
            verify_existence(&root, b"x", b"\xc4\x011", &proof),
            Err(ProofError::KeyMismatch)
        ));
        assert!(matches!(
            verify_existence(&root, b"a", b"\xc4\x012", &proof),
            Err(ProofError::ValueMismatch)
        ));

        let mut empty = proof.clone();
        empty.path[0].right = None;
        assert!(matches!(
            verify_existence(&root, b"a", b"\xc4\x011", &empty),
            Err(ProofError::EmptySiblings)
        ));

        let mut tampered = proof;
        tampered.path[0].right = Some([0u8; 32]);
        assert!(matches!(
            verify_existence(&root, b"a", b"\xc4\x011", &tampered),
            Err(ProofError::RootMismatch)
        ));
    }

    #[test]
    fn ops_fold_to_the_same_root() {
        let (root, proof) = single_step_proof();
        let (leaf_op, inner_ops) = proof.to_ops().unwrap();
        assert_eq!(fold_ops(&leaf_op, &inner_ops, b"a", b"\xc4\x011"), root);
        assert_eq!(inner_ops[0].prefix.len(), 4);
        assert_eq!(inner_ops[0].suffix.len(), 32);
    }

    #[test]
    fn proofs_round_trip_through_scale() {
        let (_, proof) = single_step_proof();
        let bytes = proof.encode();
        let decoded = ExistenceProof::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn empty_tree_non_existence_needs_an_empty_root() {
        let proof = NonExistenceProof {
            key: b"k".to_vec(),
            left: None,
            right: None,
        };
        assert!(verify_non_existence(None, b"k", &proof).is_ok());
        assert!(matches!(
            verify_non_existence(Some(&NodeHash([1; 32])), b"k", &proof),
            Err(ProofError::RootMismatch)
        ));
    }

    #[test]
    fn misordered_neighbors_are_rejected() {
        let (root, existence) = single_step_proof();
        let proof = NonExistenceProof {
            key: b"0".to_vec(),
            left: Some(existence),
            right: None,
        };
        // "a" > "0", so it cannot be a left neighbor of "0".
        assert!(matches!(
            verify_non_existence(Some(&root), b"0", &proof),
            Err(ProofError::MisorderedNeighbor)
        ));
    }
}
