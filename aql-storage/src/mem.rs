//! In-memory implementations of the storage interfaces.
//!
//! These exist to exercise the executor: a [`MemoryEngine`] owns named
//! collections, hands them out as [`TransactionCollection`]s, and fabricates
//! index handles on demand. Hash and skiplist "indexes" evaluate their
//! condition against a snapshot of the collection instead of maintaining
//! index structures; what matters to the executor is the iteration contract,
//! not the lookup complexity.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use aql_data::{compare_json, CollectionId, CollectionTag, Document};
use aql_errors::{internal_err, AqlError, AqlResult};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value as JsonValue;

use crate::index::{
    EdgeCursor, EdgeDirection, EdgeIndex, HashCursor, HashIndex, IndexHandle, PrimaryIndex,
    SkiplistCursor, SkiplistIndex, SkiplistOperator,
};
use crate::transaction::{
    Barrier, CollectionKind, CollectionResolver, CollectionScanner, EdgeInfo, PatchOptions,
    Transaction, TransactionCollection,
};

/// Apply an update patch to a document body.
///
/// `_key` and `_id` entries in the patch are ignored; system identity is
/// immutable.
pub fn apply_patch(old: &JsonValue, patch: &JsonValue, options: &PatchOptions) -> JsonValue {
    let (JsonValue::Object(old_map), JsonValue::Object(patch_map)) = (old, patch) else {
        return patch.clone();
    };
    let mut out = old_map.clone();
    for (k, v) in patch_map {
        if k == "_key" || k == "_id" {
            continue;
        }
        if v.is_null() && options.null_means_remove {
            out.remove(k);
            continue;
        }
        match (out.get(k), v) {
            (Some(JsonValue::Object(_)), JsonValue::Object(_)) if options.merge_objects => {
                let merged = apply_patch(&out[k], v, options);
                out.insert(k.clone(), merged);
            }
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    JsonValue::Object(out)
}

fn attribute_or_null(doc: &Document, path: &str) -> JsonValue {
    doc.attribute(path).unwrap_or(JsonValue::Null)
}

struct CollectionState {
    docs: IndexMap<String, Arc<Document>, ahash::RandomState>,
    next_key: u64,
}

/// An in-memory collection.
pub struct MemoryCollection {
    id: CollectionId,
    name: Arc<str>,
    kind: CollectionKind,
    state: RwLock<CollectionState>,
    barriers: Arc<AtomicUsize>,
}

impl MemoryCollection {
    fn new(id: CollectionId, name: impl Into<Arc<str>>, kind: CollectionKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            kind,
            state: RwLock::new(CollectionState {
                docs: IndexMap::default(),
                next_key: 1,
            }),
            barriers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of currently held barriers, for leak assertions in tests.
    pub fn active_barriers(&self) -> usize {
        self.barriers.load(Ordering::SeqCst)
    }

    /// Number of stored documents.
    pub fn document_count(&self) -> usize {
        self.state.read().docs.len()
    }

    fn snapshot(&self) -> Vec<Arc<Document>> {
        self.state.read().docs.values().cloned().collect()
    }

    fn stored_body(body: &JsonValue) -> JsonValue {
        match body {
            JsonValue::Object(map) => {
                let mut map = map.clone();
                map.remove("_key");
                map.remove("_id");
                JsonValue::Object(map)
            }
            other => other.clone(),
        }
    }
}

impl TransactionCollection for MemoryCollection {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> CollectionTag {
        CollectionTag::new(self.id, Arc::clone(&self.name))
    }

    fn kind(&self) -> CollectionKind {
        self.kind
    }

    fn order_barrier(&self) -> Barrier {
        Barrier::acquire(Arc::clone(&self.barriers))
    }

    fn linear_scanner(&self) -> Box<dyn CollectionScanner> {
        Box::new(LinearScanner {
            snapshot: self.snapshot(),
            pos: 0,
        })
    }

    fn random_scanner(&self) -> Box<dyn CollectionScanner> {
        let snapshot = self.snapshot();
        let mut rng = SmallRng::from_os_rng();
        let pivot = if snapshot.is_empty() {
            0
        } else {
            rng.random_range(0..snapshot.len())
        };
        Box::new(RandomScanner {
            snapshot,
            pivot,
            served: 0,
            rng,
        })
    }

    fn read_single(&self, key: &str) -> AqlResult<Arc<Document>> {
        self.state
            .read()
            .docs
            .get(key)
            .cloned()
            .ok_or(AqlError::DocumentNotFound)
    }

    fn create(
        &self,
        body: &JsonValue,
        edge: Option<&EdgeInfo>,
        _wait_for_sync: bool,
    ) -> AqlResult<Arc<Document>> {
        if !body.is_object() {
            return Err(AqlError::DocumentTypeInvalid {
                got: type_of(body).into(),
            });
        }
        if self.kind == CollectionKind::Edge && edge.is_none() {
            return Err(AqlError::DocumentHandleBad);
        }
        let mut state = self.state.write();
        let key = match body.get("_key") {
            Some(JsonValue::String(k)) => k.clone(),
            Some(_) => return Err(AqlError::DocumentKeyMissing),
            None => {
                let k = state.next_key.to_string();
                state.next_key += 1;
                k
            }
        };
        if state.docs.contains_key(&key) {
            return Err(internal_err!("unique constraint violated on key {key}"));
        }
        let doc = Arc::new(Document::new(key.clone(), Self::stored_body(body)));
        state.docs.insert(key, Arc::clone(&doc));
        Ok(doc)
    }

    fn remove(&self, key: &str, _wait_for_sync: bool) -> AqlResult<()> {
        // shift_remove keeps the stable document order linear scans rely on
        self.state
            .write()
            .docs
            .shift_remove(key)
            .map(|_| ())
            .ok_or(AqlError::DocumentNotFound)
    }

    fn update(
        &self,
        key: &str,
        patch: &JsonValue,
        options: &PatchOptions,
        _wait_for_sync: bool,
    ) -> AqlResult<Arc<Document>> {
        let mut state = self.state.write();
        let old = state.docs.get(key).ok_or(AqlError::DocumentNotFound)?;
        let body = apply_patch(&old.body, patch, options);
        let doc = Arc::new(Document::new(key, body));
        state.docs.insert(key.to_string(), Arc::clone(&doc));
        Ok(doc)
    }

    fn replace(
        &self,
        key: &str,
        body: &JsonValue,
        _wait_for_sync: bool,
    ) -> AqlResult<Arc<Document>> {
        let mut state = self.state.write();
        if !state.docs.contains_key(key) {
            return Err(AqlError::DocumentNotFound);
        }
        let doc = Arc::new(Document::new(key, Self::stored_body(body)));
        state.docs.insert(key.to_string(), Arc::clone(&doc));
        Ok(doc)
    }
}

fn type_of(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

struct LinearScanner {
    snapshot: Vec<Arc<Document>>,
    pos: usize,
}

impl CollectionScanner for LinearScanner {
    fn scan(&mut self, hint: usize) -> AqlResult<Vec<Arc<Document>>> {
        let end = (self.pos + hint.max(1)).min(self.snapshot.len());
        let out = self.snapshot[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

// A linear walk starting at a random pivot with wraparound: every document
// exactly once, order unpredictable across cursors.
struct RandomScanner {
    snapshot: Vec<Arc<Document>>,
    pivot: usize,
    served: usize,
    rng: SmallRng,
}

impl CollectionScanner for RandomScanner {
    fn scan(&mut self, hint: usize) -> AqlResult<Vec<Arc<Document>>> {
        let n = self.snapshot.len();
        let mut out = Vec::new();
        while self.served < n && out.len() < hint.max(1) {
            out.push(Arc::clone(&self.snapshot[(self.pivot + self.served) % n]));
            self.served += 1;
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.served = 0;
        if !self.snapshot.is_empty() {
            self.pivot = self.rng.random_range(0..self.snapshot.len());
        }
    }
}

struct VecCursor {
    docs: Vec<Arc<Document>>,
    pos: usize,
}

impl VecCursor {
    fn take(&mut self, at_most: usize) -> Vec<Arc<Document>> {
        let end = (self.pos + at_most.max(1)).min(self.docs.len());
        let out = self.docs[self.pos..end].to_vec();
        self.pos = end;
        out
    }
}

impl EdgeCursor for VecCursor {
    fn next_batch(&mut self, at_most: usize) -> Vec<Arc<Document>> {
        self.take(at_most)
    }
}

impl HashCursor for VecCursor {
    fn next_batch(&mut self, at_most: usize) -> Vec<Arc<Document>> {
        self.take(at_most)
    }
}

impl SkiplistCursor for VecCursor {
    fn next(&mut self) -> Option<Arc<Document>> {
        self.take(1).pop()
    }
}

struct MemoryPrimaryIndex {
    collection: Arc<MemoryCollection>,
}

impl PrimaryIndex for MemoryPrimaryIndex {
    fn lookup_key(&self, key: &str) -> Option<Arc<Document>> {
        self.collection.state.read().docs.get(key).cloned()
    }
}

struct MemoryEdgeIndex {
    collection: Arc<MemoryCollection>,
}

impl EdgeIndex for MemoryEdgeIndex {
    fn edges(&self, direction: EdgeDirection, vertex: &str) -> Box<dyn EdgeCursor> {
        let attr = match direction {
            EdgeDirection::Out => "_from",
            EdgeDirection::In => "_to",
        };
        let docs = self
            .collection
            .snapshot()
            .into_iter()
            .filter(|d| d.body.get(attr).and_then(JsonValue::as_str) == Some(vertex))
            .collect();
        Box::new(VecCursor { docs, pos: 0 })
    }
}

struct MemoryHashIndex {
    collection: Arc<MemoryCollection>,
    fields: Vec<String>,
}

impl HashIndex for MemoryHashIndex {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn lookup(&self, search: &[JsonValue]) -> Box<dyn HashCursor> {
        let docs = self
            .collection
            .snapshot()
            .into_iter()
            .filter(|d| {
                self.fields.iter().zip(search.iter()).all(|(f, s)| {
                    compare_json(&attribute_or_null(d, f), s) == CmpOrdering::Equal
                })
            })
            .collect();
        Box::new(VecCursor { docs, pos: 0 })
    }
}

struct MemorySkiplistIndex {
    collection: Arc<MemoryCollection>,
    fields: Vec<String>,
}

impl SkiplistIndex for MemorySkiplistIndex {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn range(&self, op: &SkiplistOperator, reverse: bool) -> Box<dyn SkiplistCursor> {
        let bound_field = self.fields.get(op.equality.len());
        let mut docs: Vec<Arc<Document>> = self
            .collection
            .snapshot()
            .into_iter()
            .filter(|d| {
                for (f, eq) in self.fields.iter().zip(op.equality.iter()) {
                    if compare_json(&attribute_or_null(d, f), eq) != CmpOrdering::Equal {
                        return false;
                    }
                }
                let Some(field) = bound_field else {
                    return true;
                };
                let v = attribute_or_null(d, field);
                if let Some(lower) = &op.lower {
                    match compare_json(&v, &lower.value) {
                        CmpOrdering::Less => return false,
                        CmpOrdering::Equal if !lower.inclusive => return false,
                        _ => {}
                    }
                }
                if let Some(upper) = &op.upper {
                    match compare_json(&v, &upper.value) {
                        CmpOrdering::Greater => return false,
                        CmpOrdering::Equal if !upper.inclusive => return false,
                        _ => {}
                    }
                }
                true
            })
            .collect();
        docs.sort_by(|a, b| {
            for f in &self.fields {
                let c = compare_json(&attribute_or_null(a, f), &attribute_or_null(b, f));
                if c != CmpOrdering::Equal {
                    return c;
                }
            }
            CmpOrdering::Equal
        });
        if reverse {
            docs.reverse();
        }
        Box::new(VecCursor { docs, pos: 0 })
    }
}

/// A process-local document store implementing [`Transaction`].
pub struct MemoryEngine {
    collections: RwLock<Vec<Arc<MemoryCollection>>>,
    next_id: AtomicU64,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            collections: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create a collection and return it.
    pub fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
    ) -> Arc<MemoryCollection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let collection = MemoryCollection::new(id, name, kind);
        self.collections.write().push(Arc::clone(&collection));
        collection
    }

    /// Look up a collection by name.
    pub fn collection_by_name(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        self.collections
            .read()
            .iter()
            .find(|c| c.name.as_ref() == name)
            .cloned()
    }

    fn collection_arc(&self, id: CollectionId) -> AqlResult<Arc<MemoryCollection>> {
        self.collections
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(AqlError::CollectionNotFound {
                name: id.to_string(),
            })
    }
}

impl Transaction for MemoryEngine {
    fn collection(&self, id: CollectionId) -> AqlResult<Arc<dyn TransactionCollection>> {
        Ok(self.collection_arc(id)? as Arc<dyn TransactionCollection>)
    }

    fn index(&self, collection: CollectionId, index_id: &str) -> AqlResult<IndexHandle> {
        let collection = self.collection_arc(collection)?;
        match index_id.split_once(':') {
            None if index_id == "primary" => Ok(IndexHandle::Primary(Arc::new(
                MemoryPrimaryIndex { collection },
            ))),
            None if index_id == "edge" => {
                if collection.kind != CollectionKind::Edge {
                    return Err(AqlError::IndexNotFound);
                }
                Ok(IndexHandle::Edge(Arc::new(MemoryEdgeIndex { collection })))
            }
            Some(("hash", fields)) => Ok(IndexHandle::Hash(Arc::new(MemoryHashIndex {
                collection,
                fields: fields.split(',').map(str::to_string).collect(),
            }))),
            Some(("skiplist", fields)) => Ok(IndexHandle::Skiplist(Arc::new(
                MemorySkiplistIndex {
                    collection,
                    fields: fields.split(',').map(str::to_string).collect(),
                },
            ))),
            _ => Err(AqlError::IndexNotFound),
        }
    }

    fn resolver(&self) -> &dyn CollectionResolver {
        self
    }
}

impl CollectionResolver for MemoryEngine {
    fn collection_id(&self, name: &str) -> Option<CollectionId> {
        self.collection_by_name(name).map(|c| c.id)
    }

    fn collection_name(&self, id: CollectionId) -> Option<String> {
        self.collection_arc(id).ok().map(|c| c.name.to_string())
    }
}
