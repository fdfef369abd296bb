//! The tagged per-slot value and its supporting types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::block::ItemBlock;
use crate::CollectionId;

/// The collection a document column belongs to.
///
/// Stored out-of-line in the block, one per column, so that shaped values in
/// that column can be rendered and compared without carrying the collection
/// pointer per row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionTag {
    /// Storage-level collection id.
    pub id: CollectionId,
    /// Collection name, used when rendering `_id` values.
    pub name: Arc<str>,
}

impl CollectionTag {
    /// Create a tag from an id and a name.
    pub fn new(id: CollectionId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for CollectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A document as handed out by the storage layer.
///
/// The body is the stored JSON object without the `_key`/`_id` system
/// attributes; those are rendered on materialization using the column's
/// [`CollectionTag`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The document key, unique within its collection.
    pub key: String,
    /// The stored attributes.
    pub body: JsonValue,
}

impl Document {
    /// Create a document from a key and a body.
    pub fn new(key: impl Into<String>, body: JsonValue) -> Self {
        Self {
            key: key.into(),
            body,
        }
    }

    /// The document handle `collection/key`.
    pub fn id(&self, collection: &str) -> String {
        format!("{}/{}", collection, self.key)
    }

    /// Render the document as a self-contained JSON object, with `_key` (and
    /// `_id`, when the collection is known) injected.
    pub fn to_json(&self, collection: Option<&CollectionTag>) -> JsonValue {
        let mut obj = match &self.body {
            JsonValue::Object(map) => map.clone(),
            other => return other.clone(),
        };
        obj.insert("_key".into(), JsonValue::String(self.key.clone()));
        if let Some(tag) = collection {
            obj.insert("_id".into(), JsonValue::String(self.id(&tag.name)));
        }
        JsonValue::Object(obj)
    }

    /// Look up an attribute, resolving the `_key` system attribute from the
    /// document itself.
    pub fn attribute(&self, path: &str) -> Option<JsonValue> {
        if path == "_key" {
            return Some(JsonValue::String(self.key.clone()));
        }
        crate::lookup_path(&self.body, path).cloned()
    }
}

/// A lazily materialized closed integer interval `[low, high]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericRange {
    /// Inclusive lower end.
    pub low: i64,
    /// Inclusive upper end.
    pub high: i64,
}

impl NumericRange {
    /// Create a range. `high < low` yields an empty range.
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Number of integers in the range.
    pub fn len(&self) -> usize {
        if self.high < self.low {
            0
        } else {
            (self.high - self.low + 1) as usize
        }
    }

    /// Whether the range contains no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th value of the range.
    pub fn at(&self, index: usize) -> i64 {
        self.low + index as i64
    }

    /// Whether the given number falls inside the range.
    pub fn contains(&self, v: i64) -> bool {
        v >= self.low && v <= self.high
    }

    /// Materialize the range as a JSON array.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array((self.low..=self.high).map(JsonValue::from).collect())
    }
}

/// A single register slot's value.
///
/// `Clone` is cheap for all variants: heap payloads are behind [`Arc`], so
/// cloning shares rather than copies. An independent deep copy is produced
/// by [`Value::materialize`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// An uninitialized slot.
    #[default]
    Empty,
    /// A self-owned structured value.
    Json(Arc<JsonValue>),
    /// A reference into a collection document; the collection itself is the
    /// column's [`CollectionTag`].
    Shaped(Arc<Document>),
    /// A lazily materialized integer interval.
    Range(NumericRange),
    /// A sequence of item blocks, used for subquery results held in a single
    /// register.
    DocVec(Arc<Vec<ItemBlock>>),
}

impl Value {
    /// Build a `Json` value from an owned JSON value.
    pub fn json(v: JsonValue) -> Self {
        Value::Json(Arc::new(v))
    }

    /// Shorthand for a JSON `null`.
    pub fn null() -> Self {
        Value::Json(Arc::new(JsonValue::Null))
    }

    /// Whether this slot is uninitialized.
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Truthiness as used by filter conditions: JSON `null`, `false`, `0`
    /// and `""` are false, everything else (including empty arrays and
    /// objects) is true. An empty slot is false.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Json(v) => match v.as_ref() {
                JsonValue::Null => false,
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
                JsonValue::String(s) => !s.is_empty(),
                JsonValue::Array(_) | JsonValue::Object(_) => true,
            },
            Value::Shaped(_) => true,
            Value::Range(_) => true,
            Value::DocVec(_) => true,
        }
    }

    /// Number of elements when this value is iterated by a FOR loop, or
    /// `None` if the value is not iterable.
    pub fn iterable_len(&self) -> Option<usize> {
        match self {
            Value::Json(v) => v.as_array().map(Vec::len),
            Value::Range(r) => Some(r.len()),
            Value::DocVec(blocks) => Some(blocks.iter().map(ItemBlock::len).sum()),
            _ => None,
        }
    }

    /// Produce an independent, self-owned JSON rendition of this value.
    ///
    /// Shaped values render with their `_key`/`_id` attributes; ranges
    /// expand to arrays; block vectors concatenate their first column (the
    /// result column of the subquery that produced them). Empty slots render
    /// as `null`.
    pub fn materialize(&self, collection: Option<&CollectionTag>) -> JsonValue {
        match self {
            Value::Empty => JsonValue::Null,
            Value::Json(v) => v.as_ref().clone(),
            Value::Shaped(doc) => doc.to_json(collection),
            Value::Range(r) => r.to_json(),
            Value::DocVec(blocks) => {
                let mut out = Vec::new();
                for block in blocks.iter() {
                    let tag = block.collection(0);
                    for row in 0..block.len() {
                        out.push(block.value(row, 0).materialize(tag));
                    }
                }
                JsonValue::Array(out)
            }
        }
    }

    /// Borrow the JSON payload if this is a `Json` value.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Borrow the document if this is a `Shaped` value.
    pub fn as_document(&self) -> Option<&Arc<Document>> {
        match self {
            Value::Shaped(doc) => Some(doc),
            _ => None,
        }
    }

    /// A short name for the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "none",
            Value::Json(v) => match v.as_ref() {
                JsonValue::Null => "null",
                JsonValue::Bool(_) => "bool",
                JsonValue::Number(_) => "number",
                JsonValue::String(_) => "string",
                JsonValue::Array(_) => "array",
                JsonValue::Object(_) => "object",
            },
            Value::Shaped(_) => "document",
            Value::Range(_) => "range",
            Value::DocVec(_) => "docvec",
        }
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::json(v)
    }
}

impl From<Arc<Document>> for Value {
    fn from(doc: Arc<Document>) -> Self {
        Value::Shaped(doc)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Empty.is_true());
        assert!(!Value::json(json!(null)).is_true());
        assert!(!Value::json(json!(0)).is_true());
        assert!(!Value::json(json!("")).is_true());
        assert!(Value::json(json!([])).is_true());
        assert!(Value::json(json!(0.5)).is_true());
        assert!(Value::Range(NumericRange::new(1, 0)).is_true());
    }

    #[test]
    fn range_len_and_at() {
        let r = NumericRange::new(3, 7);
        assert_eq!(r.len(), 5);
        assert_eq!(r.at(0), 3);
        assert_eq!(r.at(4), 7);
        assert!(NumericRange::new(5, 4).is_empty());
    }

    #[test]
    fn document_materializes_with_system_attributes() {
        let doc = Document::new("k1", json!({"v": 10}));
        let tag = CollectionTag::new(7, "users");
        let rendered = Value::Shaped(Arc::new(doc)).materialize(Some(&tag));
        assert_eq!(rendered, json!({"v": 10, "_key": "k1", "_id": "users/k1"}));
    }
}
