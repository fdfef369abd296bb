//! Proptest strategies for the data-model types.

use std::sync::Arc;

use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::Value as JsonValue;

use crate::block::ItemBlock;
use crate::value::{CollectionTag, Document, NumericRange, Value};

/// Strategy producing arbitrary JSON values of bounded depth.
pub fn json_value() -> impl Strategy<Value = JsonValue> {
    let leaf = prop_oneof![
        Just(JsonValue::Null),
        any::<bool>().prop_map(JsonValue::from),
        any::<i32>().prop_map(JsonValue::from),
        "[a-z]{0,8}".prop_map(JsonValue::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
            vec(("[a-z]{1,4}", inner), 0..4).prop_map(|entries| {
                JsonValue::Object(entries.into_iter().collect())
            }),
        ]
    })
}

/// Strategy producing arbitrary register values, including shallow nested
/// block vectors.
pub fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        2 => Just(Value::Empty),
        5 => json_value().prop_map(Value::json),
        3 => ("[a-z0-9]{1,6}", json_value())
            .prop_map(|(key, body)| Value::Shaped(Arc::new(Document::new(key, body)))),
        2 => (-10i64..10, -10i64..10)
            .prop_map(|(low, high)| Value::Range(NumericRange::new(low, high))),
        1 => vec(flat_block(), 0..2).prop_map(|blocks| Value::DocVec(Arc::new(blocks))),
    ]
}

fn collection_tag() -> impl Strategy<Value = Option<CollectionTag>> {
    proptest::option::of(
        (0u64..100, "[a-z]{1,6}").prop_map(|(id, name)| CollectionTag::new(id, name)),
    )
}

// single-column blocks of plain JSON values, used inside DocVec values
fn flat_block() -> impl Strategy<Value = ItemBlock> {
    vec(json_value(), 0..3).prop_map(|values| {
        let mut block = ItemBlock::new(values.len(), 1);
        for (row, v) in values.into_iter().enumerate() {
            block.set_value(row, 0, Value::json(v));
        }
        block
    })
}

/// Strategy producing arbitrary item blocks with tagged columns.
pub fn item_block() -> impl Strategy<Value = ItemBlock> {
    (1usize..4, 0usize..5)
        .prop_flat_map(|(nr_regs, rows)| {
            (
                vec(value(), rows * nr_regs),
                vec(collection_tag(), nr_regs),
                Just((rows, nr_regs)),
            )
        })
        .prop_map(|(values, tags, (rows, nr_regs))| {
            let mut block = ItemBlock::new(rows, nr_regs);
            for (reg, tag) in tags.into_iter().enumerate() {
                block.set_collection(reg, tag);
            }
            let mut it = values.into_iter();
            for row in 0..rows {
                for reg in 0..nr_regs {
                    block.set_value(row, reg, it.next().expect("sized above"));
                }
            }
            block
        })
}
