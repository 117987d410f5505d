// Path: crates/storage/src/lib.rs

//! Durable storage for the canopy state tree: a redb database holding the
//! versions, nodes and orphans tables, a nested transaction stack and the
//! orphan-driven pruner.

mod store;

pub use store::Store;
