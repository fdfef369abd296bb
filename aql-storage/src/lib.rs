//! Storage-layer interfaces consumed by the AQL executor.
//!
//! The executor never talks to a storage engine directly; everything goes
//! through the traits in this crate: [`Transaction`] and
//! [`TransactionCollection`] for document access and mutation,
//! [`CollectionScanner`] for full scans, the per-kind index traits in
//! [`index`], and [`ShardLocator`]/[`KeyGenerator`] for cluster routing.
//!
//! The [`mem`] module provides single-process in-memory implementations of
//! all of these, used by the executor's test suites. They are deliberately
//! simple (no MVCC, no WAL, no persistent index structures) but implement
//! the interfaces faithfully, including barrier accounting.

pub mod cluster;
pub mod index;
pub mod mem;
pub mod transaction;

pub use cluster::{KeyGenerator, ShardId, ShardLocator};
pub use index::{
    EdgeCursor, EdgeDirection, EdgeIndex, HashCursor, HashIndex, IndexBound, IndexHandle,
    PrimaryIndex, SkiplistCursor, SkiplistIndex, SkiplistOperator,
};
pub use transaction::{
    Barrier, CollectionKind, CollectionResolver, CollectionScanner, EdgeInfo, PatchOptions,
    Transaction, TransactionCollection,
};
