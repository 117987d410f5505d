// Path: crates/types/src/hash.rs

//! Canonical hashing: SHA-256 over tagged byte concatenations.

use crate::error::StateError;
use crate::Version;
use sha2::{Digest, Sha256};

/// Length in bytes of every node and root hash.
pub const HASH_LEN: usize = 32;

/// A 32-byte content-addressed hash of a node's canonical preimage. The root
/// hash of a version is the hash of its root node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHash(pub [u8; HASH_LEN]);

/// A version's root hash is a node hash.
pub type RootHash = NodeHash;

impl NodeHash {
    /// Rebuilds a hash from raw bytes, rejecting any length other than 32.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StateError> {
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| StateError::Corruption(format!("hash of {} bytes", bytes.len())))?;
        Ok(NodeHash(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeHash({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encodes a version into the fixed 4-byte big-endian form used by hash
/// preimages, proof steps and ordered table keys.
#[inline]
pub fn u32be(v: Version) -> [u8; 4] {
    v.to_be_bytes()
}

/// SHA-256 over the concatenation of the given parts.
pub fn sha256_concat(parts: &[&[u8]]) -> NodeHash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    NodeHash(hasher.finalize().into())
}

/// `SHA256(u32be(version) ‖ key ‖ value)` — value already codec-packed.
pub fn leaf_hash(version: Version, key: &[u8], value: &[u8]) -> NodeHash {
    sha256_concat(&[&u32be(version), key, value])
}

/// `SHA256(u32be(version) ‖ left_hash ‖ right_hash)`.
pub fn branch_hash(version: Version, left: &NodeHash, right: &NodeHash) -> NodeHash {
    sha256_concat(&[&u32be(version), &left.0, &right.0])
}
