//! Per-kind index iteration interfaces.
//!
//! The four index kinds have genuinely different iteration models, so each
//! gets its own trait instead of one lowest-common-denominator cursor:
//! primary lookups yield at most one document, edge lookups batch per
//! direction+vertex, hash lookups batch per search tuple, and skiplist
//! iteration is one-at-a-time over an ordered range.

use std::sync::Arc;

use aql_data::Document;
use serde_json::Value as JsonValue;

/// Which end of an edge a lookup anchors on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeDirection {
    /// Outbound: match edges whose `_from` equals the vertex.
    Out,
    /// Inbound: match edges whose `_to` equals the vertex.
    In,
}

/// One bound of a skiplist range condition.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexBound {
    /// The bound value.
    pub value: JsonValue,
    /// Whether the bound itself is part of the range.
    pub inclusive: bool,
}

/// The composite operator driving one skiplist iteration: a leading
/// equality tuple over the index's first attributes, then optional lower
/// and upper bounds on the next attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkiplistOperator {
    /// Values the leading index attributes must equal, in index order.
    pub equality: Vec<JsonValue>,
    /// Lower bound on the attribute following the equality prefix.
    pub lower: Option<IndexBound>,
    /// Upper bound on the attribute following the equality prefix.
    pub upper: Option<IndexBound>,
}

/// Key lookup on the primary index.
pub trait PrimaryIndex: Send + Sync {
    /// Look up a document by key.
    fn lookup_key(&self, key: &str) -> Option<Arc<Document>>;
}

/// Batched edge enumeration for one direction+vertex pair.
pub trait EdgeCursor: Send {
    /// Return up to `at_most` more edges; empty means exhausted.
    fn next_batch(&mut self, at_most: usize) -> Vec<Arc<Document>>;
}

/// The edge index.
pub trait EdgeIndex: Send + Sync {
    /// Start iterating edges incident to `vertex` (a `collection/key`
    /// handle) in the given direction.
    fn edges(&self, direction: EdgeDirection, vertex: &str) -> Box<dyn EdgeCursor>;
}

/// Batched enumeration of hash-index matches for one search tuple.
pub trait HashCursor: Send {
    /// Return up to `at_most` more matches; empty means exhausted.
    fn next_batch(&mut self, at_most: usize) -> Vec<Arc<Document>>;
}

/// A hash index over a fixed attribute tuple.
pub trait HashIndex: Send + Sync {
    /// The indexed attribute paths, in index order.
    fn fields(&self) -> &[String];

    /// Start iterating documents whose indexed attributes equal `search`
    /// (one value per field, in index order).
    fn lookup(&self, search: &[JsonValue]) -> Box<dyn HashCursor>;
}

/// Ordered iteration over a skiplist range.
pub trait SkiplistCursor: Send {
    /// The next document in range order, or `None` when exhausted.
    fn next(&mut self) -> Option<Arc<Document>>;
}

/// A skiplist index over a fixed attribute tuple.
pub trait SkiplistIndex: Send + Sync {
    /// The indexed attribute paths, in index order.
    fn fields(&self) -> &[String];

    /// Start iterating the documents matching `op`, in index order
    /// (reversed when `reverse` is set).
    fn range(&self, op: &SkiplistOperator, reverse: bool) -> Box<dyn SkiplistCursor>;
}

/// A handle to an index of any kind, as referenced by plan nodes.
#[derive(Clone)]
pub enum IndexHandle {
    /// The collection's primary index.
    Primary(Arc<dyn PrimaryIndex>),
    /// The edge index of an edge collection.
    Edge(Arc<dyn EdgeIndex>),
    /// A hash index.
    Hash(Arc<dyn HashIndex>),
    /// A skiplist index.
    Skiplist(Arc<dyn SkiplistIndex>),
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexHandle::Primary(_) => write!(f, "IndexHandle::Primary"),
            IndexHandle::Edge(_) => write!(f, "IndexHandle::Edge"),
            IndexHandle::Hash(i) => write!(f, "IndexHandle::Hash({:?})", i.fields()),
            IndexHandle::Skiplist(i) => write!(f, "IndexHandle::Skiplist({:?})", i.fields()),
        }
    }
}
