//! Shared fixtures for the executor integration tests.

use std::sync::Arc;

use aql_data::CollectionId;
use aql_executor::context::QueryContext;
use aql_executor::engine::ExecutionEngine;
use aql_executor::plan::{ExecutionPlan, PlanNode, RegisterPlan};
use aql_storage::mem::{MemoryCollection, MemoryEngine};
use aql_storage::CollectionKind;
use aql_storage::TransactionCollection;
use serde_json::Value as JsonValue;

/// Create a document collection seeded with the given bodies.
pub fn seed_collection(
    mem: &MemoryEngine,
    name: &str,
    docs: impl IntoIterator<Item = JsonValue>,
) -> (Arc<MemoryCollection>, CollectionId) {
    let coll = mem.create_collection(name, CollectionKind::Document);
    for doc in docs {
        coll.create(&doc, None, false).expect("seeding failed");
    }
    let id = aql_storage::TransactionCollection::id(coll.as_ref());
    (coll, id)
}

/// Instantiate and initialize an engine for a root node.
pub fn build_engine(
    mem: Arc<MemoryEngine>,
    root: PlanNode,
    registers: RegisterPlan,
) -> (ExecutionEngine, Arc<QueryContext>) {
    let plan = ExecutionPlan {
        root,
        registers: Arc::new(registers),
    };
    let ctx = QueryContext::new(mem);
    let mut engine = ExecutionEngine::from_plan(&plan, Arc::clone(&ctx)).expect("instantiation");
    engine.initialize().expect("initialize");
    engine
        .initialize_cursor(None, 0)
        .expect("initialize_cursor");
    (engine, ctx)
}

/// Drain the engine, materializing the single result column as JSON.
pub fn drain_results(engine: &mut ExecutionEngine) -> Vec<JsonValue> {
    drain_results_batched(engine, 1000)
}

/// Drain with a custom batch size, checking the batch-bound invariant on
/// every returned block.
pub fn drain_results_batched(engine: &mut ExecutionEngine, at_most: usize) -> Vec<JsonValue> {
    let mut out = Vec::new();
    while let Some(block) = engine.get_some(1, at_most).expect("get_some") {
        assert!(
            block.len() >= 1 && block.len() <= at_most,
            "batch bounds violated: got {} rows for at_most {}",
            block.len(),
            at_most
        );
        let tag = block.collection(0).cloned();
        for row in 0..block.len() {
            out.push(block.value(row, 0).materialize(tag.as_ref()));
        }
    }
    out
}
