// Path: crates/storage/src/store.rs

use canopy_types::error::StorageError;
use canopy_types::hash::{u32be, NodeHash, RootHash, HASH_LEN};
use canopy_types::Version;
use redb::{
    Database, ReadableTable, ReadableTableMetadata, Savepoint, TableDefinition, WriteTransaction,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// ---- Table definitions ----
/// Versions: `u32be(version)` -> root hash bytes (zero-length = empty tree).
const VERSIONS: TableDefinition<&[u8; 4], &[u8]> = TableDefinition::new("versions");
/// Nodes: content hash -> compact node form. A pure content-addressed map.
const NODES: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("nodes");
/// Orphans: `u32be(toVersion) ‖ u32be(fromVersion) ‖ hash` -> presence mark.
/// The leading `toVersion` keeps the obsolescence window scannable as one
/// contiguous byte range.
const ORPHANS: TableDefinition<&[u8; 40], ()> = TableDefinition::new("orphans");

const DB_FILE: &str = "canopy.redb";

const ORPHAN_KEY_LEN: usize = 4 + 4 + HASH_LEN;

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn orphan_key(to: Version, from: Version, hash: &NodeHash) -> [u8; ORPHAN_KEY_LEN] {
    let mut key = [0u8; ORPHAN_KEY_LEN];
    key[..4].copy_from_slice(&u32be(to));
    key[4..8].copy_from_slice(&u32be(from));
    key[8..].copy_from_slice(&hash.0);
    key
}

fn split_orphan_key(key: &[u8; ORPHAN_KEY_LEN]) -> (Version, Version, [u8; HASH_LEN]) {
    let mut to = [0u8; 4];
    let mut from = [0u8; 4];
    let mut hash = [0u8; HASH_LEN];
    to.copy_from_slice(&key[..4]);
    from.copy_from_slice(&key[4..8]);
    hash.copy_from_slice(&key[8..]);
    (u32::from_be_bytes(to), u32::from_be_bytes(from), hash)
}

fn root_from_bytes(bytes: &[u8]) -> Result<Option<RootHash>, StorageError> {
    match bytes.len() {
        0 => Ok(None),
        HASH_LEN => {
            let mut hash = [0u8; HASH_LEN];
            hash.copy_from_slice(bytes);
            Ok(Some(NodeHash(hash)))
        }
        n => Err(StorageError::Decode(format!("root hash of {n} bytes"))),
    }
}

fn get_root<T>(table: &T, version: Version) -> Result<Option<Option<RootHash>>, StorageError>
where
    T: ReadableTable<&'static [u8; 4], &'static [u8]>,
{
    match table.get(&u32be(version)).map_err(backend)? {
        Some(guard) => Ok(Some(root_from_bytes(guard.value())?)),
        None => Ok(None),
    }
}

/// One frame of the nested transaction stack. The outermost frame is the
/// redb write transaction itself; inner frames roll back through ephemeral
/// savepoints.
enum Frame {
    Outer,
    Inner(Savepoint),
}

/// Handle onto one store directory. A handle owns its transaction stack and
/// version counter; handles cloned from it share the database but observe
/// only committed state while this handle has a transaction open.
pub struct Store {
    db: Arc<Database>,
    dir: PathBuf,
    wtx: Option<WriteTransaction>,
    frames: Vec<Frame>,
    version: Version,
}

impl Store {
    /// Opens (creating if necessary) the store under `dir`. The version
    /// counter resumes from the largest committed version.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(backend)?;
        let db = Database::create(dir.join(DB_FILE)).map_err(backend)?;
        {
            let wtx = db.begin_write().map_err(backend)?;
            wtx.open_table(VERSIONS).map_err(backend)?;
            wtx.open_table(NODES).map_err(backend)?;
            wtx.open_table(ORPHANS).map_err(backend)?;
            wtx.commit().map_err(backend)?;
        }
        let version = Self::last_version(&db)?;
        Ok(Store {
            db: Arc::new(db),
            dir,
            wtx: None,
            frames: Vec::new(),
            version,
        })
    }

    /// A fresh handle over the same database: independent transaction stack,
    /// version counter re-read from committed state. redb's MVCC gives the
    /// new handle snapshot isolation from this handle's open transaction.
    pub fn clone_handle(&self) -> Result<Self, StorageError> {
        let version = Self::last_version(&self.db)?;
        Ok(Store {
            db: Arc::clone(&self.db),
            dir: self.dir.clone(),
            wtx: None,
            frames: Vec::new(),
            version,
        })
    }

    fn last_version(db: &Database) -> Result<Version, StorageError> {
        let rtx = db.begin_read().map_err(backend)?;
        let table = rtx.open_table(VERSIONS).map_err(backend)?;
        let last = table
            .iter()
            .map_err(backend)?
            .next_back()
            .transpose()
            .map_err(backend)?;
        Ok(last.map(|(key, _)| u32::from_be_bytes(*key.value())).unwrap_or(0))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The current version: the one an open transaction is committing, or
    /// the last committed one otherwise.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Re-derives the version counter from the versions table. Only valid
    /// outside a transaction; used after a snapshot restore.
    pub fn refresh_version(&mut self) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::TransactionActive);
        }
        self.version = Self::last_version(&self.db)?;
        Ok(())
    }

    fn write_tx(&self) -> Result<&WriteTransaction, StorageError> {
        self.wtx.as_ref().ok_or(StorageError::NoActiveTransaction)
    }

    /// Pushes a transaction frame. The outermost frame advances the version
    /// counter and opens the underlying write transaction; inner frames take
    /// a savepoint to roll back to.
    pub fn begin_transaction(&mut self) -> Result<(), StorageError> {
        if self.frames.is_empty() {
            self.wtx = Some(self.db.begin_write().map_err(backend)?);
            self.version += 1;
            self.frames.push(Frame::Outer);
        } else {
            let savepoint = self
                .wtx
                .as_mut()
                .ok_or(StorageError::NoActiveTransaction)?
                .ephemeral_savepoint()
                .map_err(backend)?;
            self.frames.push(Frame::Inner(savepoint));
        }
        Ok(())
    }

    /// Pops one frame. Only the outermost commit flushes the underlying
    /// write transaction; inner commits simply fold into their parent.
    pub fn commit_transaction(&mut self) -> Result<(), StorageError> {
        match self.frames.pop() {
            None => Err(StorageError::NoActiveTransaction),
            Some(Frame::Inner(_)) => Ok(()),
            Some(Frame::Outer) => {
                let wtx = self.wtx.take().ok_or(StorageError::NoActiveTransaction)?;
                wtx.commit().map_err(backend)
            }
        }
    }

    /// Pops one frame and undoes its writes. Reverting the outermost frame
    /// aborts the write transaction and walks the version counter back.
    pub fn revert_transaction(&mut self) -> Result<(), StorageError> {
        match self.frames.pop() {
            None => Err(StorageError::NoActiveTransaction),
            Some(Frame::Inner(savepoint)) => self
                .wtx
                .as_mut()
                .ok_or(StorageError::NoActiveTransaction)?
                .restore_savepoint(&savepoint)
                .map_err(backend),
            Some(Frame::Outer) => {
                let wtx = self.wtx.take().ok_or(StorageError::NoActiveTransaction)?;
                wtx.abort().map_err(backend)?;
                self.version -= 1;
                Ok(())
            }
        }
    }

    /// Writes a version row. An absent root is stored as zero-length bytes.
    pub fn put_version(&mut self, version: Version, root: Option<&RootHash>) -> Result<(), StorageError> {
        let wtx = self.write_tx()?;
        let mut table = wtx.open_table(VERSIONS).map_err(backend)?;
        let bytes: &[u8] = root.map(|h| h.as_bytes()).unwrap_or(&[]);
        table.insert(&u32be(version), bytes).map_err(backend)?;
        Ok(())
    }

    /// Root hash of `version` (default: current). Zero-length roots read
    /// back as absent, exactly like a missing row.
    pub fn get_version(&self, version: Option<Version>) -> Result<Option<RootHash>, StorageError> {
        Ok(self.get_version_row(version)?.flatten())
    }

    /// Whether a row exists for `version`, regardless of its root.
    pub fn has_version(&self, version: Version) -> Result<bool, StorageError> {
        Ok(self.get_version_row(Some(version))?.is_some())
    }

    fn get_version_row(&self, version: Option<Version>) -> Result<Option<Option<RootHash>>, StorageError> {
        let version = version.unwrap_or(self.version);
        match &self.wtx {
            Some(wtx) => {
                let table = wtx.open_table(VERSIONS).map_err(backend)?;
                get_root(&table, version)
            }
            None => {
                let rtx = self.db.begin_read().map_err(backend)?;
                let table = rtx.open_table(VERSIONS).map_err(backend)?;
                get_root(&table, version)
            }
        }
    }

    /// Writes a node under its content hash. Re-writing the same hash is a
    /// no-op by construction.
    pub fn put_node(&mut self, hash: &NodeHash, form: &[u8]) -> Result<(), StorageError> {
        let wtx = self.write_tx()?;
        let mut table = wtx.open_table(NODES).map_err(backend)?;
        table.insert(&hash.0, form).map_err(backend)?;
        Ok(())
    }

    /// Compact form of the node stored under `hash`.
    pub fn get_node(&self, hash: &NodeHash) -> Result<Vec<u8>, StorageError> {
        let found = match &self.wtx {
            Some(wtx) => {
                let table = wtx.open_table(NODES).map_err(backend)?;
                let value = table.get(&hash.0).map_err(backend)?.map(|g| g.value().to_vec());
                value
            }
            None => {
                let rtx = self.db.begin_read().map_err(backend)?;
                let table = rtx.open_table(NODES).map_err(backend)?;
                table.get(&hash.0).map_err(backend)?.map(|g| g.value().to_vec())
            }
        };
        found.ok_or(StorageError::NotFound)
    }

    /// Records that the node `hash`, born at `from`, is unreachable from
    /// `to + 1` on (`to` defaults to the version before the committing one).
    /// A node replaced within its own birth version never survived a commit,
    /// so it is deleted outright instead of recorded.
    pub fn put_orphan(&mut self, hash: &NodeHash, from: Version, to: Option<Version>) -> Result<(), StorageError> {
        let to = to.unwrap_or_else(|| self.version.saturating_sub(1));
        let wtx = self.write_tx()?;
        if from > to {
            let mut nodes = wtx.open_table(NODES).map_err(backend)?;
            nodes.remove(&hash.0).map_err(backend)?;
        } else {
            let mut orphans = wtx.open_table(ORPHANS).map_err(backend)?;
            orphans.insert(&orphan_key(to, from, hash), ()).map_err(backend)?;
        }
        Ok(())
    }

    /// Reclaims every version in the closed interval `[from, to]` in one
    /// underlying write transaction, driven purely by the orphans table —
    /// no tree traversal. Orphans still reachable from the nearest surviving
    /// earlier version are rewritten into its window instead of deleted.
    pub fn prune(&mut self, from: Version, to: Version) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::TransactionActive);
        }
        if from < 1 || from > to || to >= self.version {
            return Err(StorageError::InvalidPruneRange {
                from,
                to,
                current: self.version,
            });
        }

        let wtx = self.db.begin_write().map_err(backend)?;
        let mut reclaimed = 0usize;
        {
            let mut versions = wtx.open_table(VERSIONS).map_err(backend)?;
            let mut nodes = wtx.open_table(NODES).map_err(backend)?;
            let mut orphans = wtx.open_table(ORPHANS).map_err(backend)?;

            // Nearest surviving version before the window, or 0 if none.
            let from_key = u32be(from);
            let prev = {
                let mut range = versions.range::<&[u8; 4]>(..&from_key).map_err(backend)?;
                range
                    .next_back()
                    .transpose()
                    .map_err(backend)?
                    .map(|(key, _)| u32::from_be_bytes(*key.value()))
                    .unwrap_or(0)
            };

            let lo = orphan_key(from, 0, &NodeHash([0u8; HASH_LEN]));
            let hi = orphan_key(to, u32::MAX, &NodeHash([0xff; HASH_LEN]));
            let window: Vec<[u8; ORPHAN_KEY_LEN]> = orphans
                .range::<&[u8; ORPHAN_KEY_LEN]>(&lo..=&hi)
                .map_err(backend)?
                .map(|entry| entry.map(|(key, _)| *key.value()))
                .collect::<Result<_, _>>()
                .map_err(backend)?;

            for key in window {
                orphans.remove(&key).map_err(backend)?;
                let (_, born, hash) = split_orphan_key(&key);
                if prev < born {
                    // Born after the last surviving earlier version: no
                    // retained version can reach it.
                    nodes.remove(&hash).map_err(backend)?;
                    reclaimed += 1;
                } else {
                    // Still live in some version <= prev; revisit it when
                    // that window is pruned.
                    let hash = NodeHash(hash);
                    orphans.insert(&orphan_key(prev, born, &hash), ()).map_err(backend)?;
                }
            }

            for version in from..=to {
                versions.remove(&u32be(version)).map_err(backend)?;
            }
        }
        wtx.commit().map_err(backend)?;
        log::info!("pruned versions [{from}, {to}], reclaimed {reclaimed} nodes");
        Ok(())
    }

    pub fn version_count(&self) -> Result<u64, StorageError> {
        self.table_len(|wtx| wtx.open_table(VERSIONS).map_err(backend)?.len().map_err(backend), |rtx| {
            rtx.open_table(VERSIONS).map_err(backend)?.len().map_err(backend)
        })
    }

    pub fn node_count(&self) -> Result<u64, StorageError> {
        self.table_len(|wtx| wtx.open_table(NODES).map_err(backend)?.len().map_err(backend), |rtx| {
            rtx.open_table(NODES).map_err(backend)?.len().map_err(backend)
        })
    }

    pub fn orphan_count(&self) -> Result<u64, StorageError> {
        self.table_len(|wtx| wtx.open_table(ORPHANS).map_err(backend)?.len().map_err(backend), |rtx| {
            rtx.open_table(ORPHANS).map_err(backend)?.len().map_err(backend)
        })
    }

    fn table_len(
        &self,
        from_wtx: impl FnOnce(&WriteTransaction) -> Result<u64, StorageError>,
        from_rtx: impl FnOnce(&redb::ReadTransaction) -> Result<u64, StorageError>,
    ) -> Result<u64, StorageError> {
        match &self.wtx {
            Some(wtx) => from_wtx(wtx),
            None => {
                let rtx = self.db.begin_read().map_err(backend)?;
                from_rtx(&rtx)
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("version", &self.version)
            .field("frames", &self.frames.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::hash::sha256_concat;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn h(tag: u8) -> NodeHash {
        sha256_concat(&[&[tag]])
    }

    #[test]
    fn version_counter_tracks_transaction_boundaries() {
        let (_dir, mut store) = open_temp();
        assert_eq!(store.version(), 0);

        store.begin_transaction().unwrap();
        assert_eq!(store.version(), 1);
        store.put_version(1, Some(&h(1))).unwrap();
        store.commit_transaction().unwrap();
        assert_eq!(store.version(), 1);

        store.begin_transaction().unwrap();
        assert_eq!(store.version(), 2);
        store.revert_transaction().unwrap();
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn mispaired_commit_and_revert_fail() {
        let (_dir, mut store) = open_temp();
        assert!(matches!(
            store.commit_transaction(),
            Err(StorageError::NoActiveTransaction)
        ));
        assert!(matches!(
            store.revert_transaction(),
            Err(StorageError::NoActiveTransaction)
        ));
    }

    #[test]
    fn inner_revert_restores_the_savepoint() {
        let (_dir, mut store) = open_temp();
        store.begin_transaction().unwrap();
        store.put_node(&h(1), b"outer").unwrap();

        store.begin_transaction().unwrap();
        store.put_node(&h(2), b"inner").unwrap();
        assert_eq!(store.get_node(&h(2)).unwrap(), b"inner");
        store.revert_transaction().unwrap();

        assert_eq!(store.get_node(&h(1)).unwrap(), b"outer");
        assert!(matches!(store.get_node(&h(2)), Err(StorageError::NotFound)));
        store.commit_transaction().unwrap();
        assert_eq!(store.get_node(&h(1)).unwrap(), b"outer");
    }

    #[test]
    fn empty_root_reads_back_as_absent() {
        let (_dir, mut store) = open_temp();
        store.begin_transaction().unwrap();
        store.put_version(1, None).unwrap();
        store.commit_transaction().unwrap();

        assert_eq!(store.get_version(Some(1)).unwrap(), None);
        assert!(store.has_version(1).unwrap());
        assert!(!store.has_version(2).unwrap());
    }

    #[test]
    fn same_version_orphan_deletes_the_node_immediately() {
        let (_dir, mut store) = open_temp();
        store.begin_transaction().unwrap();
        store.put_node(&h(1), b"short-lived").unwrap();
        // Born at version 1, replaced while committing version 1.
        store.put_orphan(&h(1), 1, None).unwrap();
        store.put_version(1, None).unwrap();
        store.commit_transaction().unwrap();

        assert!(matches!(store.get_node(&h(1)), Err(StorageError::NotFound)));
        assert_eq!(store.orphan_count().unwrap(), 0);
    }

    #[test]
    fn prune_deletes_unreachable_and_rewrites_survivors() {
        let (_dir, mut store) = open_temp();
        // Versions 1 and 2 both reference node A; version 3 replaces it with
        // C and also drops B, a node born at version 2.
        store.begin_transaction().unwrap();
        store.put_node(&h(1), b"a").unwrap();
        store.put_version(1, Some(&h(1))).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.put_node(&h(2), b"b").unwrap();
        store.put_version(2, Some(&h(1))).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.put_node(&h(3), b"c").unwrap();
        store.put_orphan(&h(1), 1, None).unwrap(); // (toVersion 2, born 1)
        store.put_orphan(&h(2), 2, None).unwrap(); // (toVersion 2, born 2)
        store.put_version(3, Some(&h(3))).unwrap();
        store.commit_transaction().unwrap();

        // Pruning only v2: v1 survives and still reaches A (born 1 <= prev
        // 1), so A's orphan is rewritten into v1's window; B (born 2 > prev
        // 1) has no surviving referrer and dies.
        store.prune(2, 2).unwrap();
        assert_eq!(store.get_node(&h(1)).unwrap(), b"a");
        assert!(matches!(store.get_node(&h(2)), Err(StorageError::NotFound)));
        assert_eq!(store.orphan_count().unwrap(), 1);
        assert_eq!(store.version_count().unwrap(), 2);

        // Pruning v1 reclaims A through the rewritten record.
        store.prune(1, 1).unwrap();
        assert!(matches!(store.get_node(&h(1)), Err(StorageError::NotFound)));
        assert_eq!(store.orphan_count().unwrap(), 0);
        assert_eq!(store.version_count().unwrap(), 1);
        assert_eq!(store.get_version(Some(3)).unwrap(), Some(h(3)));
    }

    #[test]
    fn prune_rejects_bad_ranges() {
        let (_dir, mut store) = open_temp();
        store.begin_transaction().unwrap();
        store.put_version(1, None).unwrap();
        store.commit_transaction().unwrap();

        // The current version is never pruned.
        assert!(matches!(
            store.prune(1, 1),
            Err(StorageError::InvalidPruneRange { .. })
        ));
        assert!(matches!(
            store.prune(0, 0),
            Err(StorageError::InvalidPruneRange { .. })
        ));
    }

    #[test]
    fn clone_handle_sees_only_committed_state() {
        let (_dir, mut store) = open_temp();
        store.begin_transaction().unwrap();
        store.put_node(&h(1), b"uncommitted").unwrap();

        let clone = store.clone_handle().unwrap();
        assert_eq!(clone.version(), 0);
        assert!(matches!(clone.get_node(&h(1)), Err(StorageError::NotFound)));

        store.commit_transaction().unwrap();
        let clone = store.clone_handle().unwrap();
        assert_eq!(clone.get_node(&h(1)).unwrap(), b"uncommitted");
    }

    #[test]
    fn version_counter_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = Store::open(dir.path()).unwrap();
            store.begin_transaction().unwrap();
            store.put_version(1, Some(&h(1))).unwrap();
            store.commit_transaction().unwrap();
            store.begin_transaction().unwrap();
            store.put_version(2, Some(&h(2))).unwrap();
            store.commit_transaction().unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.version(), 2);
    }
}
