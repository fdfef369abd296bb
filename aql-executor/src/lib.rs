//! The operator runtime of the AQL query execution engine.
//!
//! A planned query — a DAG of typed nodes with a shared register
//! assignment — is instantiated into a tree of execution operators and
//! driven top-down by pulling batches from the root. Data moves in
//! [`aql_data::ItemBlock`]s; every operator implements the dual
//! `get_some`/`skip_some` contract with two-bound batch sizes, splicing
//! partially consumed input blocks across calls.
//!
//! Sharded queries span engines: Scatter/Distribute fan one stream out to
//! per-shard clients, Gather merges streams (optionally as a sorted
//! merge), and Remote proxies the rest of the plan to a peer over the
//! request/response transport in [`transport`], speaking the bodies in
//! [`api`].

pub mod api;
pub mod context;
pub mod engine;
pub mod handler;
pub mod ops;
pub mod plan;
pub mod stats;
pub mod transport;

pub use context::QueryContext;
pub use engine::ExecutionEngine;
pub use ops::{Operator, DEFAULT_BATCH_SIZE};
pub use plan::{ExecutionPlan, NodeParams, PlanNode, RegisterPlan, SortElement};
pub use stats::{ExecutionStats, StatsSnapshot, Warning};
