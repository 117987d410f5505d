// Path: crates/state/src/lib.rs

//! The canopy state tree: a versioned, Merkleized, self-balancing ordered
//! key/value store. Leaves carry packed user values; branches carry split
//! keys and the Merkle hashes of their subtrees; every committed write
//! produces a new immutable version identified by its root hash.

pub mod snapshot;
pub mod tree;

pub use tree::proof::{ExistenceProof, NonExistenceProof};
pub use tree::Tree;
