//! Transactional document access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aql_data::{CollectionId, CollectionTag, Document};
use aql_errors::AqlResult;
use serde_json::Value as JsonValue;

use crate::index::IndexHandle;

/// Whether a collection stores plain documents or edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    /// A plain document collection.
    Document,
    /// An edge collection; documents carry `_from` and `_to`.
    Edge,
}

/// Options controlling how an update patch is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchOptions {
    /// Remove attributes whose patch value is `null` instead of storing the
    /// `null`.
    pub null_means_remove: bool,
    /// Merge nested objects attribute-wise instead of replacing them.
    pub merge_objects: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            null_means_remove: false,
            merge_objects: true,
        }
    }
}

/// Resolved `_from`/`_to` information for inserting into an edge collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeInfo {
    /// Collection id of the `_from` vertex.
    pub from_cid: CollectionId,
    /// Key of the `_from` vertex.
    pub from_key: String,
    /// Collection id of the `_to` vertex.
    pub to_cid: CollectionId,
    /// Key of the `_to` vertex.
    pub to_key: String,
}

/// A token that prevents reclamation of document storage while the holder
/// may still reference documents of the collection.
///
/// The barrier is released when the value is dropped, on every exit path.
#[derive(Debug)]
pub struct Barrier {
    count: Arc<AtomicUsize>,
}

impl Barrier {
    /// Acquire a barrier against the given counter.
    pub fn acquire(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Batched enumeration of a collection's documents.
///
/// A scanner yields every document exactly once between resets; the order
/// depends on the scanner kind (linear: stable document order, random:
/// implementation-defined with uniform-ish coverage).
pub trait CollectionScanner: Send {
    /// Return up to `hint` more documents; an empty vector means the scan is
    /// exhausted.
    fn scan(&mut self, hint: usize) -> AqlResult<Vec<Arc<Document>>>;

    /// Restart the scan from the beginning.
    fn reset(&mut self);
}

/// Maps collection names to ids and back, including cluster-wide ids used
/// when parsing `_id` values.
pub trait CollectionResolver {
    /// The id of the named collection.
    fn collection_id(&self, name: &str) -> Option<CollectionId>;

    /// The name of the collection with the given id.
    fn collection_name(&self, id: CollectionId) -> Option<String>;
}

/// A collection opened inside a transaction.
pub trait TransactionCollection: Send + Sync {
    /// Collection id.
    fn id(&self) -> CollectionId;

    /// Collection name.
    fn name(&self) -> &str;

    /// The tag identifying this collection on block columns.
    fn tag(&self) -> CollectionTag;

    /// Whether this is an edge collection.
    fn kind(&self) -> CollectionKind;

    /// Install a barrier preventing reclamation of documents the caller may
    /// still reference.
    fn order_barrier(&self) -> Barrier;

    /// A scanner enumerating documents in stable order.
    fn linear_scanner(&self) -> Box<dyn CollectionScanner>;

    /// A scanner enumerating documents in an implementation-defined order.
    fn random_scanner(&self) -> Box<dyn CollectionScanner>;

    /// Read one document by key. Fails with `DocumentNotFound` if absent.
    fn read_single(&self, key: &str) -> AqlResult<Arc<Document>>;

    /// Create a document from the given body; for edge collections the
    /// resolved `_from`/`_to` must be supplied.
    fn create(
        &self,
        body: &JsonValue,
        edge: Option<&EdgeInfo>,
        wait_for_sync: bool,
    ) -> AqlResult<Arc<Document>>;

    /// Remove a document by key.
    fn remove(&self, key: &str, wait_for_sync: bool) -> AqlResult<()>;

    /// Apply a patch to a document and return the new revision.
    fn update(
        &self,
        key: &str,
        patch: &JsonValue,
        options: &PatchOptions,
        wait_for_sync: bool,
    ) -> AqlResult<Arc<Document>>;

    /// Replace a document's body and return the new revision.
    fn replace(&self, key: &str, body: &JsonValue, wait_for_sync: bool)
        -> AqlResult<Arc<Document>>;
}

/// The transaction the engine executes under.
pub trait Transaction: Send + Sync {
    /// Open a collection participating in this transaction.
    fn collection(&self, id: CollectionId) -> AqlResult<Arc<dyn TransactionCollection>>;

    /// Resolve an index on a collection by its id.
    fn index(&self, collection: CollectionId, index_id: &str) -> AqlResult<IndexHandle>;

    /// The resolver for collection names and ids.
    fn resolver(&self) -> &dyn CollectionResolver;
}
