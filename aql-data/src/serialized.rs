//! The self-describing wire format for item blocks.
//!
//! Cluster peers exchange blocks as JSON: register count, row count, the
//! per-column collection tags, then the values column by column, each entry
//! carrying its variant. Shaped values travel as `key` + `body` and are
//! re-attached to their collection through the column tag on arrival.

use std::sync::Arc;

use aql_errors::{AqlError, AqlResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::block::ItemBlock;
use crate::value::{CollectionTag, Document, NumericRange, Value};

/// One serialized register slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SerializedValue {
    /// An uninitialized slot.
    Empty,
    /// A self-owned JSON value.
    Json {
        /// The payload.
        value: JsonValue,
    },
    /// A document reference; the collection is carried by the column tag.
    Shaped {
        /// Document key.
        key: String,
        /// Document attributes.
        body: JsonValue,
    },
    /// An integer interval.
    Range {
        /// Inclusive lower end.
        low: i64,
        /// Inclusive upper end.
        high: i64,
    },
    /// A nested sequence of blocks (subquery results).
    DocVec {
        /// The serialized blocks.
        blocks: Vec<SerializedBlock>,
    },
}

impl SerializedValue {
    fn from_value(v: &Value) -> SerializedValue {
        match v {
            Value::Empty => SerializedValue::Empty,
            Value::Json(j) => SerializedValue::Json {
                value: j.as_ref().clone(),
            },
            Value::Shaped(doc) => SerializedValue::Shaped {
                key: doc.key.clone(),
                body: doc.body.clone(),
            },
            Value::Range(r) => SerializedValue::Range {
                low: r.low,
                high: r.high,
            },
            Value::DocVec(blocks) => SerializedValue::DocVec {
                blocks: blocks.iter().map(SerializedBlock::from_block).collect(),
            },
        }
    }

    fn into_value(self) -> AqlResult<Value> {
        Ok(match self {
            SerializedValue::Empty => Value::Empty,
            SerializedValue::Json { value } => Value::json(value),
            SerializedValue::Shaped { key, body } => {
                Value::Shaped(Arc::new(Document::new(key, body)))
            }
            SerializedValue::Range { low, high } => Value::Range(NumericRange::new(low, high)),
            SerializedValue::DocVec { blocks } => Value::DocVec(Arc::new(
                blocks
                    .into_iter()
                    .map(SerializedBlock::into_block)
                    .collect::<AqlResult<Vec<_>>>()?,
            )),
        })
    }
}

/// A serialized item block, as carried in `getSome` responses and
/// `initializeCursor` requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBlock {
    /// Number of register columns.
    pub nr_regs: usize,
    /// Number of rows.
    pub nr_items: usize,
    /// Per-column collection tags.
    pub collections: Vec<Option<CollectionTag>>,
    /// Values, column by column; each inner vector has `nr_items` entries.
    pub columns: Vec<Vec<SerializedValue>>,
}

impl SerializedBlock {
    /// Serialize a block.
    pub fn from_block(block: &ItemBlock) -> SerializedBlock {
        let mut columns = Vec::with_capacity(block.nr_regs());
        for reg in 0..block.nr_regs() {
            columns.push(
                (0..block.len())
                    .map(|row| SerializedValue::from_value(block.value(row, reg)))
                    .collect(),
            );
        }
        SerializedBlock {
            nr_regs: block.nr_regs(),
            nr_items: block.len(),
            collections: block.collections().to_vec(),
            columns,
        }
    }

    /// Reconstruct a block, validating the advertised dimensions.
    pub fn into_block(self) -> AqlResult<ItemBlock> {
        if self.columns.len() != self.nr_regs
            || self.collections.len() != self.nr_regs
            || self.columns.iter().any(|c| c.len() != self.nr_items)
        {
            return Err(AqlError::ClusterCommunication {
                message: "serialized block dimensions are inconsistent".into(),
            });
        }
        let mut block = ItemBlock::new(self.nr_items, self.nr_regs);
        for (reg, tag) in self.collections.into_iter().enumerate() {
            block.set_collection(reg, tag);
        }
        for (reg, column) in self.columns.into_iter().enumerate() {
            for (row, value) in column.into_iter().enumerate() {
                block.set_value(row, reg, value.into_value()?);
            }
        }
        Ok(block)
    }
}

impl ItemBlock {
    /// Serialize this block into the wire format.
    pub fn to_serialized(&self) -> SerializedBlock {
        SerializedBlock::from_block(self)
    }
}
