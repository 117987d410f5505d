// Path: crates/state/src/snapshot.rs

//! Full-version snapshots: a directory of size-capped chunk files (named by
//! the MD5 of their content) plus a JSON descriptor. Chunks carry the
//! pre-order stream of compact node forms; because nodes keep their birth
//! versions, restoration reproduces identical content hashes and the tree
//! reassembles itself through the nodes table.

use std::fs;
use std::io;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use canopy_storage::Store;
use canopy_types::codec::Reader;
use canopy_types::error::{SnapshotError, StateError, StorageError};
use canopy_types::hash::{NodeHash, RootHash};
use canopy_types::Version;
use serde::{Deserialize, Serialize};

use crate::tree::encode::{self, CompactNode};

/// Format tag written into every descriptor; anything else is rejected on
/// apply.
pub const SNAPSHOT_FORMAT: &str = "canopy-nodes-v1";
pub const DESCRIPTOR_FILE: &str = "snapshot.json";
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// `snapshot.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDescriptor {
    pub version: Version,
    /// Base64 of the root hash; empty for an empty-tree version.
    pub root_hash: String,
    pub format: String,
    /// Unix seconds at creation.
    pub timestamp: i64,
    /// Chunk file names in write order.
    pub chunks: Vec<String>,
}

/// Serializes `version` (default: the store's current version) into `dir`,
/// which is reset first.
pub fn create_snapshot(
    store: &Store,
    dir: &Path,
    version: Option<Version>,
    chunk_size: usize,
) -> Result<SnapshotDescriptor, SnapshotError> {
    if store.in_transaction() {
        return Err(SnapshotError::Storage(StorageError::TransactionActive));
    }
    let version = version.unwrap_or_else(|| store.version());
    if !store.has_version(version)? {
        return Err(SnapshotError::UnknownVersion(version));
    }
    let root = store.get_version(Some(version))?;

    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(SnapshotError::Io(e)),
    }
    fs::create_dir_all(dir)?;

    let mut chunker = Chunker {
        dir,
        chunk_size,
        buf: Vec::new(),
        chunks: Vec::new(),
    };
    if let Some(root) = &root {
        write_subtree(store, root, &mut chunker)?;
    }
    chunker.flush()?;

    let descriptor = SnapshotDescriptor {
        version,
        root_hash: BASE64.encode(root.as_ref().map(RootHash::as_bytes).unwrap_or(&[])),
        format: SNAPSHOT_FORMAT.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        chunks: chunker.chunks,
    };
    let json = serde_json::to_vec_pretty(&descriptor)
        .map_err(|e| SnapshotError::Descriptor(e.to_string()))?;
    fs::write(dir.join(DESCRIPTOR_FILE), json)?;
    log::info!(
        "snapshot of version {version} written to {} ({} chunks)",
        dir.display(),
        descriptor.chunks.len()
    );
    Ok(descriptor)
}

/// Pre-order: the node's own form first, then the left and right subtrees.
fn write_subtree(
    store: &Store,
    hash: &NodeHash,
    chunker: &mut Chunker<'_>,
) -> Result<(), SnapshotError> {
    let bytes = store.get_node(hash).map_err(|e| match e {
        StorageError::NotFound => SnapshotError::State(StateError::Corruption(format!(
            "missing referenced node {hash:?}"
        ))),
        other => SnapshotError::Storage(other),
    })?;
    chunker.append(&bytes)?;
    let mut rd = Reader::new(&bytes);
    if let CompactNode::Branch {
        left_hash,
        right_hash,
        ..
    } = encode::decode_compact(&mut rd)?
    {
        write_subtree(store, &left_hash, chunker)?;
        write_subtree(store, &right_hash, chunker)?;
    }
    Ok(())
}

struct Chunker<'a> {
    dir: &'a Path,
    chunk_size: usize,
    buf: Vec<u8>,
    chunks: Vec<String>,
}

impl Chunker<'_> {
    /// Appends one node form, rolling over to a new chunk when it would not
    /// fit. A form that cannot fit even an empty chunk is fatal.
    fn append(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        if bytes.len() > self.chunk_size {
            return Err(SnapshotError::OversizedNode(bytes.len(), self.chunk_size));
        }
        if self.buf.len() + bytes.len() > self.chunk_size {
            self.flush()?;
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SnapshotError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let name = format!("{:x}", md5::compute(&self.buf));
        fs::write(self.dir.join(&name), &self.buf)?;
        self.chunks.push(name);
        self.buf.clear();
        Ok(())
    }
}

/// Restores the snapshot in `dir` into `store` within one store
/// transaction. Every node is stored back at its recorded version, so its
/// content hash — and therefore the restored root — is byte-identical.
pub fn apply_snapshot(store: &mut Store, dir: &Path) -> Result<SnapshotDescriptor, SnapshotError> {
    if store.in_transaction() {
        return Err(SnapshotError::Storage(StorageError::TransactionActive));
    }
    let raw = fs::read(dir.join(DESCRIPTOR_FILE))?;
    let descriptor: SnapshotDescriptor =
        serde_json::from_slice(&raw).map_err(|e| SnapshotError::Descriptor(e.to_string()))?;
    if descriptor.format != SNAPSHOT_FORMAT {
        return Err(SnapshotError::UnknownFormat(descriptor.format));
    }
    if store.has_version(descriptor.version)? {
        return Err(SnapshotError::VersionExists(descriptor.version));
    }
    let root_bytes = BASE64
        .decode(&descriptor.root_hash)
        .map_err(|e| SnapshotError::Descriptor(format!("root hash: {e}")))?;
    let root = if root_bytes.is_empty() {
        None
    } else {
        Some(NodeHash::from_slice(&root_bytes)?)
    };

    store.begin_transaction()?;
    match restore_chunks(store, dir, &descriptor, root.as_ref()) {
        Ok(()) => {
            store.commit_transaction()?;
            // The transaction wrapper advanced the counter; the restored
            // history is whatever the versions table now says.
            store.refresh_version()?;
            log::info!(
                "snapshot version {} restored from {}",
                descriptor.version,
                dir.display()
            );
            Ok(descriptor)
        }
        Err(e) => {
            let _ = store.revert_transaction();
            Err(e)
        }
    }
}

fn restore_chunks(
    store: &mut Store,
    dir: &Path,
    descriptor: &SnapshotDescriptor,
    root: Option<&RootHash>,
) -> Result<(), SnapshotError> {
    store.put_version(descriptor.version, root)?;
    for chunk in &descriptor.chunks {
        let bytes = fs::read(dir.join(chunk))?;
        let mut rd = Reader::new(&bytes);
        while !rd.is_empty() {
            let start = rd.position();
            let compact = encode::decode_compact(&mut rd)?;
            let end = rd.position();
            store.put_node(&compact.hash(), &bytes[start..end])?;
        }
    }
    Ok(())
}
