//! The engine driving one operator tree.

use std::sync::Arc;

use aql_data::ItemBlock;
use aql_errors::AqlResult;

use crate::context::QueryContext;
use crate::ops::{instantiate, Operator};
use crate::plan::ExecutionPlan;
use crate::stats::{StatsSnapshot, Warning};

/// One instantiated query: the operator tree rooted at the final consumer
/// plus the shared query context.
///
/// Execution is pull-based and single-threaded: the caller drives the root
/// through [`get_some`](Self::get_some) and every operator returns before
/// the next pull happens.
pub struct ExecutionEngine {
    root: Operator,
    ctx: Arc<QueryContext>,
}

impl ExecutionEngine {
    /// Instantiate the operator tree for a plan.
    pub fn from_plan(plan: &ExecutionPlan, ctx: Arc<QueryContext>) -> AqlResult<Self> {
        Ok(Self {
            root: instantiate(plan, Arc::clone(&ctx))?,
            ctx,
        })
    }

    /// The shared query context.
    pub fn context(&self) -> &Arc<QueryContext> {
        &self.ctx
    }

    /// The root operator, for callers routing per-client requests.
    pub fn root_mut(&mut self) -> &mut Operator {
        &mut self.root
    }

    /// One-time initialization of the whole tree.
    pub fn initialize(&mut self) -> AqlResult<()> {
        self.root.initialize()
    }

    /// Reset the tree to run for a new input row (or from scratch when
    /// `items` is `None`).
    pub fn initialize_cursor(&mut self, items: Option<&ItemBlock>, pos: usize) -> AqlResult<()> {
        self.root.initialize_cursor(items, pos)
    }

    /// Pull the next batch from the root.
    pub fn get_some(&mut self, at_least: usize, at_most: usize) -> AqlResult<Option<ItemBlock>> {
        self.root.get_some(at_least, at_most)
    }

    /// Skip a batch at the root.
    pub fn skip_some(&mut self, at_least: usize, at_most: usize) -> AqlResult<usize> {
        self.root.skip_some(at_least, at_most)
    }

    /// Whether the root could produce another row.
    pub fn has_more(&mut self) -> AqlResult<bool> {
        self.root.has_more()
    }

    /// Best-effort remaining row count.
    pub fn remaining(&mut self) -> AqlResult<Option<usize>> {
        self.root.remaining()
    }

    /// Best-effort total row count.
    pub fn count(&self) -> AqlResult<Option<usize>> {
        self.root.count()
    }

    /// Tear the tree down. Called exactly once per query.
    pub fn shutdown(&mut self, code: i32) -> AqlResult<()> {
        self.root.shutdown(code)
    }

    /// Mark the query killed; operators notice at the next block boundary.
    pub fn kill(&self) {
        self.ctx.kill();
    }

    /// Current statistics counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Warnings registered so far.
    pub fn warnings(&self) -> Vec<Warning> {
        self.ctx.warnings()
    }
}
