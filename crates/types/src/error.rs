// Path: crates/types/src/error.rs

//! Error types for the canopy store, one enum per concern.

use thiserror::Error;

/// Errors raised by the value/wire codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before the announced payload did.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// A marker byte that the codec does not understand.
    #[error("invalid marker byte 0x{0:02x}")]
    InvalidMarker(u8),
    /// A well-formed value followed by garbage.
    #[error("trailing bytes after value")]
    TrailingBytes,
    /// A length field that does not fit the platform or the format.
    #[error("length out of range")]
    LengthOverflow,
}

/// Errors raised by the durable store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An error from the underlying key-value engine.
    #[error("backend error: {0}")]
    Backend(String),
    /// A stored value that cannot be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The requested key or row was not found.
    #[error("not found")]
    NotFound,
    /// A commit or revert without a matching transaction.
    #[error("no active transaction")]
    NoActiveTransaction,
    /// An operation that requires the transaction stack to be empty.
    #[error("a transaction is already active")]
    TransactionActive,
    /// A prune interval outside `[1, current - 1]`.
    #[error("invalid prune range [{from}, {to}] at version {current}")]
    InvalidPruneRange {
        from: u32,
        to: u32,
        current: u32,
    },
}

/// Errors raised by the state tree.
#[derive(Debug, Error)]
pub enum StateError {
    /// The provided value was rejected before it reached the tree.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The store contents contradict the tree's invariants.
    #[error("corrupt store: {0}")]
    Corruption(String),
    /// An error from the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// An error from the value codec.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors raised while building or verifying Merkle proofs. Each violated
/// verification invariant surfaces as its own variant.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The proof was produced for a different key.
    #[error("proof is for a different key")]
    KeyMismatch,
    /// The proof was produced for a different value.
    #[error("proof is for a different value")]
    ValueMismatch,
    /// A branch step carries no sibling hash on either side.
    #[error("branch step carries no sibling hash")]
    EmptySiblings,
    /// The recomputed root does not match the trusted root.
    #[error("recomputed root does not match the trusted root")]
    RootMismatch,
    /// A neighbor lies on the wrong side of the queried key.
    #[error("neighbor on the wrong side of the key")]
    MisorderedNeighbor,
    /// An existence proof was requested for an absent key.
    #[error("key not found")]
    KeyAbsent,
    /// A non-existence proof was requested for a present key.
    #[error("key is present in the tree")]
    KeyPresent,
    /// An error from the state tree while walking the proof path.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Errors raised by snapshot creation and restoration.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A descriptor announcing a format this build does not understand.
    #[error("unknown snapshot format: {0}")]
    UnknownFormat(String),
    /// The destination store already has a row for the snapshot version.
    #[error("version {0} already present in the destination store")]
    VersionExists(u32),
    /// The requested version has never been committed.
    #[error("version {0} not found")]
    UnknownVersion(u32),
    /// A single node form that cannot fit in any chunk.
    #[error("node of {0} bytes exceeds the chunk size {1}")]
    OversizedNode(usize, usize),
    /// A descriptor that cannot be parsed.
    #[error("malformed descriptor: {0}")]
    Descriptor(String),
    /// A filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An error from the state tree.
    #[error(transparent)]
    State(#[from] StateError),
    /// An error from the storage layer.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
