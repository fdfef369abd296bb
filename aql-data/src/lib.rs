//! Runtime data model for the AQL execution engine.
//!
//! The two central types are [`Value`], the tagged per-slot value that
//! operators read and write, and [`ItemBlock`], the rectangular batch of
//! rows × registers that moves between operators. Heap payloads (JSON
//! values, documents, nested block vectors) are reference-counted, so
//! slicing a block shares payloads while stealing moves them and leaves
//! [`Value::Empty`] behind.

pub mod block;
pub mod ord;
pub mod serialized;
pub mod strategies;
pub mod value;

pub use block::ItemBlock;
pub use ord::compare_json;
pub use serialized::{SerializedBlock, SerializedValue};
pub use value::{CollectionTag, Document, NumericRange, Value};

/// Identifier of a register (column slot) within an item block.
///
/// The mapping from variable names to register ids is fixed per plan.
pub type RegisterId = usize;

/// Upper bound on register ids a plan may assign.
pub const MAX_REGISTER_ID: RegisterId = 1000;

/// Identifier of a collection, assigned by the storage layer.
pub type CollectionId = u64;

/// Look up a (possibly dotted) attribute path inside a JSON value.
///
/// Returns `None` as soon as a path segment is missing or the current value
/// is not an object.
pub fn lookup_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
