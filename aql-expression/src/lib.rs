//! The expression seam between the planner and the executor.
//!
//! The executor evaluates expressions only through the [`Expression`] trait;
//! what the planner compiled them from is not its business. This crate also
//! ships [`Expr`], a small evaluator over register values that covers the
//! expression shapes the executor's own machinery needs (references,
//! attribute access, comparisons, IN, ranges, array/object construction),
//! and the scripting-runtime capability used by expressions that need one.

pub mod eval;
pub mod runtime;

use std::fmt;

use aql_data::{CollectionTag, ItemBlock, RegisterId, Value};
use aql_errors::AqlResult;
use aql_storage::Transaction;

pub use eval::{CmpOp, Expr};
pub use runtime::{NoopScriptRuntime, ScriptRuntime, ScriptScope};

/// Everything an expression may look at while being evaluated against one
/// row.
pub struct EvalContext<'a> {
    /// The transaction, for expressions that resolve documents.
    pub trx: &'a dyn Transaction,
    /// The block holding the current row.
    pub block: &'a ItemBlock,
    /// The row within `block`.
    pub row: usize,
}

/// A compiled expression, evaluated once per input row.
pub trait Expression: fmt::Debug + Send + Sync {
    /// Evaluate against the given row, yielding the result value and, when
    /// the result is a document column pass-through, its collection tag.
    fn execute(&self, ctx: &EvalContext<'_>) -> AqlResult<(Value, Option<CollectionTag>)>;

    /// When the whole expression is a single register reference, the
    /// register — the calculation operator then copies the column instead of
    /// evaluating.
    fn reference_register(&self) -> Option<RegisterId> {
        None
    }

    /// Whether evaluation must happen inside a scripting-runtime context.
    fn needs_script_runtime(&self) -> bool {
        false
    }

    /// Drop any state bound to the current runtime context, so the
    /// expression can be re-entered from another worker thread.
    fn invalidate(&self) {}
}
