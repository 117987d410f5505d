// Path: crates/state/src/tree/mod.rs

//! The tree facade: a single-writer versioned session over one store
//! directory. Every mutation runs inside a store transaction (implicit when
//! none is open), persists the new spine copy-on-write, and records the new
//! root under the committing version.

pub(crate) mod encode;
pub mod node;
pub(crate) mod ops;
pub mod proof;
pub(crate) mod proof_builder;
#[cfg(test)]
mod tests;

use std::path::Path;

use canopy_storage::Store;
use canopy_types::codec;
use canopy_types::error::{ProofError, SnapshotError, StateError};
use canopy_types::hash::RootHash;
use canopy_types::Version;

use crate::snapshot::{self, SnapshotDescriptor};
use node::{Node, NodeSummary};
use proof::{ExistenceProof, NonExistenceProof};

/// A versioned Merkleized AVL+ tree over a store directory.
pub struct Tree {
    store: Store,
    root: Option<Box<Node>>,
    root_hash: Option<RootHash>,
    /// Root hash at the start of each open transaction frame, restored on
    /// revert.
    frames: Vec<Option<RootHash>>,
}

impl Tree {
    /// Opens (creating if necessary) the tree stored under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StateError> {
        Self::from_store(Store::open(dir)?)
    }

    fn from_store(store: Store) -> Result<Self, StateError> {
        let root_hash = store.get_version(None)?;
        Ok(Tree {
            store,
            root: None,
            root_hash,
            frames: Vec::new(),
        })
    }

    /// A second facade over the same directory: fresh store handle,
    /// independent transaction stack and node cache. It observes committed
    /// state only.
    pub fn clone_handle(&self) -> Result<Tree, StateError> {
        Self::from_store(self.store.clone_handle()?)
    }

    pub fn version(&self) -> Version {
        self.store.version()
    }

    pub fn root_hash(&self) -> Option<RootHash> {
        self.root_hash
    }

    /// Root hash recorded for `version`; absent for unknown versions and for
    /// empty-tree versions alike.
    pub fn root_hash_at(&self, version: Version) -> Result<Option<RootHash>, StateError> {
        Ok(self.store.get_version(Some(version))?)
    }

    pub fn in_transaction(&self) -> bool {
        self.store.in_transaction()
    }

    /// Opens a transaction frame. The outermost frame advances the version.
    pub fn begin_transaction(&mut self) -> Result<(), StateError> {
        self.store.begin_transaction()?;
        self.frames.push(self.root_hash);
        Ok(())
    }

    /// Closes the innermost frame; only the outermost commit makes the
    /// version durable.
    pub fn commit_transaction(&mut self) -> Result<(), StateError> {
        self.store.commit_transaction()?;
        self.frames.pop();
        if self.frames.is_empty() {
            log::debug!(
                "committed version {} root {:?}",
                self.store.version(),
                self.root_hash
            );
        }
        Ok(())
    }

    /// Undoes the innermost frame. The cached subtree is dropped and lazily
    /// reloaded from the rolled-back store.
    pub fn revert_transaction(&mut self) -> Result<(), StateError> {
        self.store.revert_transaction()?;
        if let Some(saved) = self.frames.pop() {
            self.root_hash = saved;
        }
        self.root = None;
        Ok(())
    }

    fn with_transaction<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        if self.store.in_transaction() {
            return body(self);
        }
        self.begin_transaction()?;
        match body(self) {
            Ok(out) => {
                self.commit_transaction()?;
                Ok(out)
            }
            Err(e) => {
                // The enclosing KV transaction aborts on any fault, so no
                // partial writes survive.
                let _ = self.revert_transaction();
                Err(e)
            }
        }
    }

    /// Inserts or updates `key`. The value is packed before it touches the
    /// tree; empty values are rejected outright.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        if value.is_empty() {
            return Err(StateError::InvalidValue("empty value".into()));
        }
        let packed = codec::pack(value);
        self.with_transaction(|tree| tree.insert_packed(key, packed))
    }

    fn insert_packed(&mut self, key: &[u8], packed: Vec<u8>) -> Result<(), StateError> {
        let version = self.store.version();
        let mut root = match self.take_root()? {
            Some(root) => ops::insert(root, &mut self.store, key, packed)?,
            None => Box::new(Node::new_leaf(key.to_vec(), packed)),
        };
        let hash = ops::persist(&mut root, &mut self.store, version)?;
        self.store.put_version(version, Some(&hash))?;
        self.root = Some(root);
        self.root_hash = Some(hash);
        Ok(())
    }

    /// Removes `key`. Removing from an empty tree (or an absent key) is a
    /// structural no-op but still commits a version.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.with_transaction(|tree| tree.remove_inner(key))
    }

    fn remove_inner(&mut self, key: &[u8]) -> Result<(), StateError> {
        let version = self.store.version();
        let root = match self.take_root()? {
            Some(root) => ops::remove(root, &mut self.store, key)?,
            None => None,
        };
        let hash = match root {
            Some(mut root) => {
                let hash = ops::persist(&mut root, &mut self.store, version)?;
                self.root = Some(root);
                Some(hash)
            }
            None => {
                self.root = None;
                None
            }
        };
        self.store.put_version(version, hash.as_ref())?;
        self.root_hash = hash;
        Ok(())
    }

    /// Unpacked value at `key`, or absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.ensure_root_loaded()?;
        let Some(root) = self.root.as_deref_mut() else {
            return Ok(None);
        };
        match ops::find(root, &self.store, key)? {
            Some(leaf) => Ok(Some(codec::unpack(&leaf.value)?)),
            None => Ok(None),
        }
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool, StateError> {
        self.ensure_root_loaded()?;
        match self.root.as_deref_mut() {
            Some(root) => Ok(ops::find(root, &self.store, key)?.is_some()),
            None => Ok(false),
        }
    }

    /// Reclaims versions `[1, to]`.
    pub fn prune(&mut self, to: Version) -> Result<(), StateError> {
        self.prune_range(1, to)
    }

    /// Reclaims the closed version interval `[from, to]` through the store's
    /// orphan tables; the current version is never eligible.
    pub fn prune_range(&mut self, from: Version, to: Version) -> Result<(), StateError> {
        self.store.prune(from, to)?;
        Ok(())
    }

    /// Membership proof for `key` against the current root.
    pub fn get_proof(&mut self, key: &[u8]) -> Result<ExistenceProof, ProofError> {
        self.ensure_root_loaded()?;
        let Some(root) = self.root.as_deref_mut() else {
            return Err(ProofError::KeyAbsent);
        };
        proof_builder::existence_proof(root, &self.store, key)
    }

    /// Non-membership proof for `key`; fails if the key is present.
    pub fn get_non_existence_proof(&mut self, key: &[u8]) -> Result<NonExistenceProof, ProofError> {
        self.ensure_root_loaded()?;
        proof_builder::non_existence_proof(self.root.as_deref_mut(), &self.store, key)
    }

    /// Verifies a membership proof for the *unpacked* `value` against the
    /// current root hash.
    pub fn verify_proof(
        &self,
        proof: &ExistenceProof,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), ProofError> {
        let root = self.root_hash.as_ref().ok_or(ProofError::RootMismatch)?;
        proof::verify_existence(root, key, &codec::pack(value), proof)
    }

    /// Verifies a non-membership proof against the current root hash.
    pub fn verify_non_existence_proof(
        &self,
        proof: &NonExistenceProof,
        key: &[u8],
    ) -> Result<(), ProofError> {
        proof::verify_non_existence(self.root_hash.as_ref(), key, proof)
    }

    /// Serializes `version` (default: current) into `dir`.
    pub fn create_snapshot(
        &self,
        dir: impl AsRef<Path>,
        version: Option<Version>,
        chunk_size: Option<usize>,
    ) -> Result<SnapshotDescriptor, SnapshotError> {
        snapshot::create_snapshot(
            &self.store,
            dir.as_ref(),
            version,
            chunk_size.unwrap_or(snapshot::DEFAULT_CHUNK_SIZE),
        )
    }

    /// Restores a snapshot directory into this tree's store and adopts the
    /// restored version if it is the newest.
    pub fn apply_snapshot(&mut self, dir: impl AsRef<Path>) -> Result<SnapshotDescriptor, SnapshotError> {
        let descriptor = snapshot::apply_snapshot(&mut self.store, dir.as_ref())?;
        self.root = None;
        self.root_hash = self.store.get_version(None)?;
        Ok(descriptor)
    }

    /// In-order traversal of the current version.
    pub fn traverse(&mut self) -> Result<Vec<NodeSummary>, StateError> {
        self.ensure_root_loaded()?;
        let mut out = Vec::new();
        if let Some(root) = self.root.as_deref_mut() {
            ops::traverse(root, &self.store, &mut out)?;
        }
        Ok(out)
    }

    /// Recomputes the root hash bottom-up, ignoring every cached hash.
    pub fn recompute_root_hash(&mut self) -> Result<Option<RootHash>, StateError> {
        self.ensure_root_loaded()?;
        match self.root.as_deref_mut() {
            Some(root) => Ok(Some(ops::recompute_hash(root, &self.store)?)),
            None => Ok(None),
        }
    }

    pub fn version_count(&self) -> Result<u64, StateError> {
        Ok(self.store.version_count()?)
    }

    pub fn node_count(&self) -> Result<u64, StateError> {
        Ok(self.store.node_count()?)
    }

    pub fn orphan_count(&self) -> Result<u64, StateError> {
        Ok(self.store.orphan_count()?)
    }

    fn take_root(&mut self) -> Result<Option<Box<Node>>, StateError> {
        self.ensure_root_loaded()?;
        Ok(self.root.take())
    }

    fn ensure_root_loaded(&mut self) -> Result<(), StateError> {
        if self.root.is_none() {
            if let Some(hash) = self.root_hash {
                self.root = Some(Box::new(Node::load(&self.store, hash)?));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("version", &self.store.version())
            .field("root_hash", &self.root_hash)
            .field("frames", &self.frames.len())
            .finish()
    }
}
