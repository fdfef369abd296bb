//! Value comparison.
//!
//! JSON values are ordered first by type (`null < bool < number < string <
//! array < object`), then by content. Objects compare by their sorted key
//! sequence, key by key. This is the ordering used by Sort, sorted Gather,
//! Collect group detection, and the skiplist condition sort.

use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use crate::value::{CollectionTag, Value};

fn type_rank(v: &JsonValue) -> u8 {
    match v {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Total order over JSON values.
pub fn compare_json(a: &JsonValue, b: &JsonValue) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let c = compare_json(ex, ey);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            let mut keys_x: Vec<&String> = x.keys().collect();
            let mut keys_y: Vec<&String> = y.keys().collect();
            keys_x.sort();
            keys_y.sort();
            for (kx, ky) in keys_x.iter().zip(keys_y.iter()) {
                let c = kx.cmp(ky);
                if c != Ordering::Equal {
                    return c;
                }
                let c = compare_json(&x[kx.as_str()], &y[ky.as_str()]);
                if c != Ordering::Equal {
                    return c;
                }
            }
            keys_x.len().cmp(&keys_y.len())
        }
        _ => unreachable!("type ranks matched"),
    }
}

impl Value {
    /// Compare two register values, materializing shaped/range/docvec
    /// payloads through their column tags first. Empty slots sort before
    /// everything else.
    pub fn compare(
        a: &Value,
        tag_a: Option<&CollectionTag>,
        b: &Value,
        tag_b: Option<&CollectionTag>,
    ) -> Ordering {
        match (a, b) {
            (Value::Empty, Value::Empty) => Ordering::Equal,
            (Value::Empty, _) => Ordering::Less,
            (_, Value::Empty) => Ordering::Greater,
            (Value::Json(x), Value::Json(y)) => compare_json(x, y),
            _ => compare_json(&a.materialize(tag_a), &b.materialize(tag_b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn type_order() {
        let values = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(0),
            json!(10.5),
            json!(""),
            json!("a"),
            json!([]),
            json!([1]),
            json!([1, 2]),
            json!({}),
            json!({"a": 1}),
        ];
        for w in values.windows(2) {
            assert_eq!(
                compare_json(&w[0], &w[1]),
                Ordering::Less,
                "{} < {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn objects_compare_by_sorted_keys() {
        assert_eq!(
            compare_json(&json!({"b": 1, "a": 1}), &json!({"a": 1, "b": 1})),
            Ordering::Equal
        );
        assert_eq!(
            compare_json(&json!({"a": 1}), &json!({"a": 2})),
            Ordering::Less
        );
        assert_eq!(
            compare_json(&json!({"a": 1}), &json!({"a": 1, "b": 0})),
            Ordering::Less
        );
    }

    #[test]
    fn empty_sorts_first() {
        assert_eq!(
            Value::compare(&Value::Empty, None, &Value::json(json!(null)), None),
            Ordering::Less
        );
    }
}
