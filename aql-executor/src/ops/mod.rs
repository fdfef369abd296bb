//! The execution operators and their pull protocol.
//!
//! One [`Operator`] per plan node, owning its input operators. All shared
//! pull machinery — the input buffer, the position cursor, the done flag,
//! the three-way block splicing of `get_or_skip` — lives in [`Core`];
//! operator-specific state lives in the [`OperatorKind`] variant. Methods on
//! `Operator` destructure into `(core, kind)` so kind logic can pull from
//! dependencies through the core without borrow gymnastics.

pub mod calculation;
pub mod collect;
pub mod condition;
pub mod distribute;
pub mod enumerate_collection;
pub mod enumerate_list;
pub mod filter;
pub mod gather;
pub mod index_range;
pub mod limit;
pub mod mutation;
pub mod remote;
pub mod return_rows;
pub mod scatter;
pub mod singleton;
pub mod sort;
pub mod subquery;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use aql_data::{CollectionId, ItemBlock, RegisterId};
use aql_errors::{internal, internal_err, invariant, AqlError, AqlResult};
use tracing::trace;

use crate::context::QueryContext;
use crate::plan::{ExecutionPlan, NodeParams, PlanNode};

use calculation::CalculationState;
use collect::CollectState;
use distribute::DistributeState;
use enumerate_collection::EnumerateCollectionState;
use enumerate_list::EnumerateListState;
use filter::FilterState;
use gather::GatherState;
use index_range::IndexRangeState;
use limit::LimitState;
use mutation::MutationState;
use remote::RemoteState;
use return_rows::ReturnState;
use scatter::ScatterState;
use singleton::SingletonState;
use sort::SortState;
use subquery::SubqueryState;

/// Default number of rows pulled per batch when the caller leaves the
/// choice to the operator.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Parse a document handle of the form `collection/key` into a collection
/// id and a key. The collection part may be a name (resolved through the
/// transaction) or a numeric id.
pub(crate) fn resolve_handle(ctx: &QueryContext, handle: &str) -> AqlResult<(CollectionId, String)> {
    let Some((collection, key)) = handle.split_once('/') else {
        return Err(AqlError::DocumentHandleBad);
    };
    if collection.is_empty() || key.is_empty() {
        return Err(AqlError::DocumentHandleBad);
    }
    let cid = if collection.bytes().all(|b| b.is_ascii_digit()) {
        collection
            .parse::<CollectionId>()
            .map_err(|_| AqlError::DocumentHandleBad)?
    } else {
        ctx.trx
            .resolver()
            .collection_id(collection)
            .ok_or_else(|| AqlError::CollectionNotFound {
                name: collection.to_string(),
            })?
    };
    Ok((cid, key.to_string()))
}

/// The shared operator state: dependencies, the input buffer and cursor,
/// and the per-node register metadata.
pub(crate) struct Core {
    pub(crate) node_id: usize,
    /// Output width at this node's depth.
    pub(crate) nr_regs: usize,
    /// Registers to erase from every emitted block.
    pub(crate) regs_to_clear: HashSet<RegisterId>,
    pub(crate) ctx: Arc<QueryContext>,
    /// Input operators, in input order.
    pub(crate) deps: Vec<Operator>,
    /// Buffered input blocks; the head may be partially consumed.
    pub(crate) buffer: VecDeque<ItemBlock>,
    /// Position of the next unconsumed row in the head block.
    pub(crate) pos: usize,
    pub(crate) done: bool,
}

impl Core {
    fn new(
        node_id: usize,
        nr_regs: usize,
        regs_to_clear: HashSet<RegisterId>,
        ctx: Arc<QueryContext>,
        deps: Vec<Operator>,
    ) -> Self {
        Self {
            node_id,
            nr_regs,
            regs_to_clear,
            ctx,
            deps,
            buffer: VecDeque::new(),
            pos: 0,
            done: false,
        }
    }

    pub(crate) fn throw_if_killed(&self) -> AqlResult<()> {
        self.ctx.throw_if_killed()
    }

    /// Pull one more block from the first dependency into the buffer.
    /// Returns false if the dependency is exhausted.
    pub(crate) fn get_block(&mut self, at_least: usize, at_most: usize) -> AqlResult<bool> {
        self.throw_if_killed()?;
        let Some(dep) = self.deps.first_mut() else {
            internal!("operator {} has no input to pull from", self.node_id);
        };
        match dep.get_some(at_least, at_most)? {
            Some(block) => {
                trace!(node = self.node_id, rows = block.len(), "buffered input block");
                self.buffer.push_back(block);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Copy the input registers of `src` row `row` into row 0 of `dst`,
    /// skipping registers that die at this node, and carry the column tags
    /// over.
    pub(crate) fn inherit_registers(&self, src: &ItemBlock, dst: &mut ItemBlock, row: usize) {
        for reg in 0..src.nr_regs() {
            if self.regs_to_clear.contains(&reg) {
                continue;
            }
            let value = src.value(row, reg);
            if !value.is_empty() {
                dst.set_value(0, reg, value.clone());
            }
            dst.set_collection(reg, src.collection(reg).cloned());
        }
    }

    /// Copy row 0's registers of `dst` into row `row`; used after
    /// [`inherit_registers`](Self::inherit_registers) to replicate the
    /// inherited frame across all output rows.
    pub(crate) fn copy_row_zero(dst: &mut ItemBlock, row: usize, regs: usize) {
        for reg in 0..regs {
            let value = dst.value(0, reg).clone();
            dst.set_value(row, reg, value);
        }
    }

    /// Rows buffered but not yet consumed.
    pub(crate) fn buffered_rows(&self) -> usize {
        let mut sum = 0;
        for (i, block) in self.buffer.iter().enumerate() {
            sum += if i == 0 {
                block.len() - self.pos
            } else {
                block.len()
            };
        }
        sum
    }

    /// The default `getSome`/`skipSome` worker: drain the buffer into the
    /// requested batch bounds, pulling from the input as needed.
    ///
    /// Three splice cases per head block: larger than the remaining
    /// capacity (slice and advance `pos`), partially consumed but fitting
    /// (slice the tail, pop), or fresh and fitting (hand over whole).
    pub(crate) fn default_get_or_skip(
        &mut self,
        at_least: usize,
        at_most: usize,
        skipping: bool,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        if self.done {
            return Ok((None, 0));
        }

        let mut skipped = 0usize;
        let mut collector: Vec<ItemBlock> = Vec::new();

        while skipped < at_least {
            if self.buffer.is_empty() {
                if skipping {
                    let Some(dep) = self.deps.first_mut() else {
                        internal!("operator {} has no input to skip from", self.node_id);
                    };
                    dep.skip(at_least - skipped)?;
                    skipped = at_least;
                    return Ok((None, skipped));
                }
                if !self.get_block(at_least - skipped, at_most - skipped)? {
                    self.done = true;
                    break;
                }
                self.pos = 0;
            }

            let cur_len = self.buffer.front().expect("checked above").len();
            if cur_len - self.pos > at_most - skipped {
                // head block larger than the remaining capacity
                if !skipping {
                    let slice = self
                        .buffer
                        .front()
                        .expect("checked above")
                        .slice(self.pos, self.pos + (at_most - skipped));
                    collector.push(slice);
                }
                self.pos += at_most - skipped;
                skipped = at_most;
            } else if self.pos > 0 {
                // head block fits but is partially consumed
                if !skipping {
                    let slice = self
                        .buffer
                        .front()
                        .expect("checked above")
                        .slice(self.pos, cur_len);
                    collector.push(slice);
                }
                skipped += cur_len - self.pos;
                self.buffer.pop_front();
                self.pos = 0;
            } else {
                // head block fits and is fresh
                skipped += cur_len;
                let block = self.buffer.pop_front().expect("checked above");
                if !skipping {
                    collector.push(block);
                }
                self.pos = 0;
            }
        }

        let result = if skipping || collector.is_empty() {
            None
        } else if collector.len() == 1 {
            collector.pop()
        } else {
            Some(ItemBlock::concatenate(collector)?)
        };
        Ok((result, skipped))
    }

    pub(crate) fn default_has_more(&mut self) -> AqlResult<bool> {
        if self.done {
            return Ok(false);
        }
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        if self.get_block(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
            self.pos = 0;
            Ok(true)
        } else {
            self.done = true;
            Ok(false)
        }
    }

    pub(crate) fn default_remaining(&mut self) -> AqlResult<Option<usize>> {
        let buffered = self.buffered_rows();
        match self.deps.first_mut() {
            None => Ok(Some(buffered + usize::from(!self.done))),
            Some(dep) => Ok(dep.remaining()?.map(|r| r + buffered)),
        }
    }

    /// Base `initializeCursor`: forward to all dependencies, then drop
    /// buffered input and reset the cursor.
    pub(crate) fn base_initialize_cursor(
        &mut self,
        items: Option<&ItemBlock>,
        pos: usize,
    ) -> AqlResult<()> {
        for dep in &mut self.deps {
            dep.initialize_cursor(items, pos)?;
        }
        self.buffer.clear();
        self.pos = 0;
        self.done = false;
        Ok(())
    }

    /// Base `shutdown`: drop buffered input, then shut all dependencies
    /// down. Errors are collected so siblings still shut down; the last one
    /// surfaces.
    pub(crate) fn base_shutdown(&mut self, code: i32) -> AqlResult<()> {
        self.buffer.clear();
        let mut result = Ok(());
        for dep in &mut self.deps {
            if let Err(e) = dep.shutdown(code) {
                result = Err(e);
            }
        }
        result
    }
}

/// Operator-specific state, one variant per plan node type.
pub enum OperatorKind {
    /// See [`singleton`].
    Singleton(SingletonState),
    /// See [`enumerate_collection`].
    EnumerateCollection(EnumerateCollectionState),
    /// See [`enumerate_list`].
    EnumerateList(EnumerateListState),
    /// See [`index_range`].
    IndexRange(IndexRangeState),
    /// See [`filter`].
    Filter(FilterState),
    /// See [`calculation`].
    Calculation(CalculationState),
    /// See [`subquery`].
    Subquery(SubqueryState),
    /// See [`sort`].
    Sort(SortState),
    /// See [`collect`].
    Collect(CollectState),
    /// See [`limit`].
    Limit(LimitState),
    /// See [`return_rows`].
    ReturnRows(ReturnState),
    /// Produces nothing.
    NoResults,
    /// See [`mutation`].
    Mutation(MutationState),
    /// See [`scatter`].
    Scatter(ScatterState),
    /// See [`distribute`].
    Distribute(DistributeState),
    /// See [`gather`].
    Gather(GatherState),
    /// See [`remote`].
    Remote(RemoteState),
}

impl OperatorKind {
    /// A static name for metrics and logging.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Singleton(_) => "Singleton",
            OperatorKind::EnumerateCollection(_) => "EnumerateCollection",
            OperatorKind::EnumerateList(_) => "EnumerateList",
            OperatorKind::IndexRange(_) => "IndexRange",
            OperatorKind::Filter(_) => "Filter",
            OperatorKind::Calculation(_) => "Calculation",
            OperatorKind::Subquery(_) => "Subquery",
            OperatorKind::Sort(_) => "Sort",
            OperatorKind::Collect(_) => "Collect",
            OperatorKind::Limit(_) => "Limit",
            OperatorKind::ReturnRows(_) => "ReturnRows",
            OperatorKind::NoResults => "NoResults",
            OperatorKind::Mutation(_) => "Mutation",
            OperatorKind::Scatter(_) => "Scatter",
            OperatorKind::Distribute(_) => "Distribute",
            OperatorKind::Gather(_) => "Gather",
            OperatorKind::Remote(_) => "Remote",
        }
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One execution operator: shared pull state plus kind-specific state.
pub struct Operator {
    pub(crate) core: Core,
    pub(crate) kind: OperatorKind,
}

impl Operator {
    pub(crate) fn new(
        node_id: usize,
        nr_regs: usize,
        regs_to_clear: HashSet<RegisterId>,
        ctx: Arc<QueryContext>,
        deps: Vec<Operator>,
        kind: OperatorKind,
    ) -> Self {
        Self {
            core: Core::new(node_id, nr_regs, regs_to_clear, ctx, deps),
            kind,
        }
    }

    /// The operator's kind name.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// One-time initialization, propagated to inputs before any rows flow.
    pub fn initialize(&mut self) -> AqlResult<()> {
        for dep in &mut self.core.deps {
            dep.initialize()?;
        }
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::IndexRange(s) => s.initialize(core),
            OperatorKind::Subquery(s) => s.subquery.initialize(),
            OperatorKind::Collect(s) => {
                s.initialize();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Reset state to re-run the sub-plan for a new input row.
    pub fn initialize_cursor(&mut self, items: Option<&ItemBlock>, pos: usize) -> AqlResult<()> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Scatter(s) => return s.initialize_cursor(core, items, pos),
            OperatorKind::Distribute(s) => return s.initialize_cursor(core, items, pos),
            OperatorKind::Remote(s) => return s.initialize_cursor(core, items, pos),
            OperatorKind::NoResults => {
                core.base_initialize_cursor(items, pos)?;
                core.done = true;
                return Ok(());
            }
            _ => {}
        }
        core.base_initialize_cursor(items, pos)?;
        match kind {
            OperatorKind::Singleton(s) => s.set_input(items, pos),
            OperatorKind::EnumerateCollection(s) => s.reset(),
            OperatorKind::EnumerateList(s) => s.reset(),
            OperatorKind::IndexRange(s) => s.reset(),
            OperatorKind::Collect(s) => s.reset_group(),
            OperatorKind::Limit(s) => s.reset(),
            OperatorKind::Gather(s) => s.reset(core),
            OperatorKind::Sort(s) => return s.fill_and_sort(core),
            _ => {}
        }
        Ok(())
    }

    /// Tear down, propagated to inputs exactly once. `code` is the error
    /// code execution finished with (0 for success).
    pub fn shutdown(&mut self, code: i32) -> AqlResult<()> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Scatter(s) => s.shutdown(core, code),
            OperatorKind::Distribute(s) => s.shutdown(core, code),
            OperatorKind::Gather(s) => s.shutdown(core, code),
            OperatorKind::Remote(s) => s.shutdown(core, code),
            OperatorKind::Subquery(s) => {
                let deps = core.base_shutdown(code);
                let sub = s.subquery.shutdown(code);
                deps.and(sub)
            }
            OperatorKind::Singleton(s) => {
                let result = core.base_shutdown(code);
                s.clear_input();
                result
            }
            _ => core.base_shutdown(code),
        }
    }

    /// Pull a batch of 1..=`at_most` rows, at least `at_least` unless the
    /// input is exhausted; `None` only on exhaustion. Registers dead at
    /// this node are erased from the returned block.
    pub fn get_some(&mut self, at_least: usize, at_most: usize) -> AqlResult<Option<ItemBlock>> {
        invariant!(
            0 < at_least && at_least <= at_most,
            "invalid batch bounds [{at_least}, {at_most}]"
        );
        self.core.throw_if_killed()?;
        metrics::counter!("aql_operator_get_some_total", "operator" => self.kind.name())
            .increment(1);
        let mut result = self.get_some_without_clearout(at_least, at_most)?;
        if let Some(block) = &mut result {
            block.clear_registers(&self.core.regs_to_clear);
        }
        Ok(result)
    }

    fn get_some_without_clearout(
        &mut self,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        {
            let Operator { core, kind } = self;
            match kind {
                OperatorKind::EnumerateCollection(s) => return s.get_some(core, at_most),
                OperatorKind::EnumerateList(s) => return s.get_some(core, at_most),
                OperatorKind::IndexRange(s) => return s.get_some(core, at_most),
                OperatorKind::Mutation(s) => return s.get_some(core, at_least, at_most),
                OperatorKind::Gather(s) => return s.get_some(core, at_least, at_most),
                OperatorKind::Remote(s) => return s.get_some(core, at_least, at_most),
                OperatorKind::Scatter(_) | OperatorKind::Distribute(_) => {
                    internal!("client-routed operator pulled without a client id")
                }
                _ => {}
            }
        }
        let (block, _) = self.get_or_skip_some(at_least, at_most, false)?;
        let Some(mut block) = block else {
            return Ok(None);
        };
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Calculation(s) => s.evaluate(core, &mut block)?,
            OperatorKind::Subquery(s) => s.fill(core, &mut block)?,
            OperatorKind::ReturnRows(s) => return Ok(Some(s.strip(block))),
            _ => {}
        }
        Ok(Some(block))
    }

    /// Advance the operator exactly as `get_some` would, producing no rows;
    /// returns the count skipped.
    pub fn skip_some(&mut self, at_least: usize, at_most: usize) -> AqlResult<usize> {
        invariant!(
            0 < at_least && at_least <= at_most,
            "invalid batch bounds [{at_least}, {at_most}]"
        );
        self.core.throw_if_killed()?;
        {
            let Operator { core, kind } = self;
            match kind {
                OperatorKind::EnumerateCollection(s) => return s.skip_some(core, at_least, at_most),
                OperatorKind::EnumerateList(s) => return s.skip_some(core, at_least, at_most),
                OperatorKind::IndexRange(s) => return s.skip_some(core, at_least, at_most),
                OperatorKind::Gather(s) => return s.skip_some(core, at_least, at_most),
                OperatorKind::Remote(s) => return s.skip_some(core, at_least, at_most),
                OperatorKind::Scatter(_) | OperatorKind::Distribute(_) => {
                    internal!("client-routed operator skipped without a client id")
                }
                _ => {}
            }
        }
        let (result, skipped) = self.get_or_skip_some(at_least, at_most, true)?;
        invariant!(result.is_none(), "skip produced a block");
        Ok(skipped)
    }

    fn get_or_skip_some(
        &mut self,
        at_least: usize,
        at_most: usize,
        skipping: bool,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Singleton(s) => s.get_or_skip_some(core, skipping),
            OperatorKind::Filter(s) => s.get_or_skip_some(core, at_least, at_most, skipping),
            OperatorKind::Collect(s) => s.get_or_skip_some(core, at_least, at_most, skipping),
            OperatorKind::Limit(s) => s.get_or_skip_some(core, at_least, at_most, skipping),
            OperatorKind::NoResults => Ok((None, 0)),
            _ => core.default_get_or_skip(at_least, at_most, skipping),
        }
    }

    /// Skip exactly `number` rows (driving `skip_some` as often as
    /// needed); returns true when the operator is exhausted afterwards.
    pub fn skip(&mut self, number: usize) -> AqlResult<bool> {
        if number == 0 {
            return Ok(false);
        }
        let mut skipped = self.skip_some(number, number)?;
        let mut nr = skipped;
        while nr != 0 && skipped < number {
            nr = self.skip_some(number - skipped, number - skipped)?;
            skipped += nr;
        }
        if nr == 0 {
            Ok(true)
        } else {
            Ok(!self.has_more()?)
        }
    }

    /// Whether a subsequent `get_some` could produce a row. May buffer one
    /// block.
    pub fn has_more(&mut self) -> AqlResult<bool> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Singleton(_) => Ok(!core.done),
            OperatorKind::NoResults => Ok(false),
            OperatorKind::Filter(s) => s.has_more(core),
            OperatorKind::Gather(s) => s.has_more(core),
            OperatorKind::Remote(s) => s.has_more(core),
            OperatorKind::Scatter(_) | OperatorKind::Distribute(_) => {
                internal!("client-routed operator asked hasMore without a client id")
            }
            _ => core.default_has_more(),
        }
    }

    /// Best-effort count of remaining rows, `None` when unknown.
    pub fn remaining(&mut self) -> AqlResult<Option<usize>> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Gather(s) => s.remaining(core),
            OperatorKind::Remote(s) => s.remaining(core),
            OperatorKind::Scatter(_) | OperatorKind::Distribute(_) => {
                internal!("client-routed operator asked remaining without a client id")
            }
            _ => core.default_remaining(),
        }
    }

    /// Best-effort total row count, `None` when unknown.
    pub fn count(&self) -> AqlResult<Option<usize>> {
        match &self.kind {
            OperatorKind::Gather(s) => s.count(&self.core),
            OperatorKind::Remote(s) => s.count(&self.core),
            _ => Ok(None),
        }
    }

    /// Pull a batch on behalf of one shard client of a Scatter or
    /// Distribute operator.
    pub fn get_some_for_client(
        &mut self,
        at_least: usize,
        at_most: usize,
        shard: &str,
    ) -> AqlResult<Option<ItemBlock>> {
        invariant!(
            0 < at_least && at_least <= at_most,
            "invalid batch bounds [{at_least}, {at_most}]"
        );
        self.core.throw_if_killed()?;
        let Operator { core, kind } = self;
        let mut result = match kind {
            OperatorKind::Scatter(s) => s.get_or_skip_for_client(core, at_least, at_most, false, shard)?.0,
            OperatorKind::Distribute(s) => {
                s.get_or_skip_for_client(core, at_least, at_most, false, shard)?.0
            }
            _ => internal!("operator does not serve per-client batches"),
        };
        if let Some(block) = &mut result {
            block.clear_registers(&core.regs_to_clear);
        }
        Ok(result)
    }

    /// Skip a batch on behalf of one shard client.
    pub fn skip_some_for_client(
        &mut self,
        at_least: usize,
        at_most: usize,
        shard: &str,
    ) -> AqlResult<usize> {
        invariant!(
            0 < at_least && at_least <= at_most,
            "invalid batch bounds [{at_least}, {at_most}]"
        );
        self.core.throw_if_killed()?;
        let Operator { core, kind } = self;
        let (result, skipped) = match kind {
            OperatorKind::Scatter(s) => s.get_or_skip_for_client(core, at_least, at_most, true, shard)?,
            OperatorKind::Distribute(s) => {
                s.get_or_skip_for_client(core, at_least, at_most, true, shard)?
            }
            _ => internal!("operator does not serve per-client batches"),
        };
        invariant!(result.is_none(), "skip produced a block");
        Ok(skipped)
    }

    /// `has_more` on behalf of one shard client.
    pub fn has_more_for_client(&mut self, shard: &str) -> AqlResult<bool> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Scatter(s) => s.has_more_for_client(core, shard),
            OperatorKind::Distribute(s) => s.has_more_for_client(core, shard),
            _ => internal!("operator does not serve per-client batches"),
        }
    }

    /// `remaining` on behalf of one shard client.
    pub fn remaining_for_client(&mut self, shard: &str) -> AqlResult<Option<usize>> {
        let Operator { core, kind } = self;
        match kind {
            OperatorKind::Scatter(s) => s.remaining_for_client(core, shard),
            OperatorKind::Distribute(s) => s.remaining_for_client(core, shard),
            _ => internal!("operator does not serve per-client batches"),
        }
    }

    /// Whether this operator fans out to shard clients.
    pub fn serves_clients(&self) -> bool {
        matches!(
            self.kind,
            OperatorKind::Scatter(_) | OperatorKind::Distribute(_)
        )
    }
}

/// Build the operator tree for a plan.
pub fn instantiate(plan: &ExecutionPlan, ctx: Arc<QueryContext>) -> AqlResult<Operator> {
    instantiate_node(&plan.root, plan, &ctx)
}

fn instantiate_node(
    node: &PlanNode,
    plan: &ExecutionPlan,
    ctx: &Arc<QueryContext>,
) -> AqlResult<Operator> {
    let deps = node
        .dependencies
        .iter()
        .map(|d| instantiate_node(d, plan, ctx))
        .collect::<AqlResult<Vec<_>>>()?;
    let nr_regs = plan
        .registers
        .nr_regs
        .get(node.depth)
        .copied()
        .ok_or_else(|| internal_err!("plan node {} has unplanned depth {}", node.id, node.depth))?;

    let kind = match &node.params {
        NodeParams::Singleton => OperatorKind::Singleton(SingletonState::new()),
        NodeParams::EnumerateCollection { collection, random } => OperatorKind::EnumerateCollection(
            EnumerateCollectionState::new(ctx, *collection, *random)?,
        ),
        NodeParams::EnumerateList { in_reg } => {
            OperatorKind::EnumerateList(EnumerateListState::new(*in_reg))
        }
        NodeParams::IndexRange {
            collection,
            index_id,
            ranges,
            reverse,
        } => OperatorKind::IndexRange(IndexRangeState::new(
            ctx,
            *collection,
            index_id,
            ranges.clone(),
            *reverse,
        )?),
        NodeParams::Filter { in_reg } => OperatorKind::Filter(FilterState::new(*in_reg)),
        NodeParams::Calculation {
            expression,
            out_reg,
            condition_reg,
        } => OperatorKind::Calculation(CalculationState::new(
            Arc::clone(expression),
            *out_reg,
            *condition_reg,
        )),
        NodeParams::Subquery {
            subquery,
            out_reg,
            is_const,
        } => OperatorKind::Subquery(SubqueryState::new(
            Box::new(instantiate_node(subquery, plan, ctx)?),
            *out_reg,
            *is_const,
        )),
        NodeParams::Sort { elements, stable } => {
            OperatorKind::Sort(SortState::new(elements.clone(), *stable))
        }
        NodeParams::Collect {
            group_registers,
            count_only,
            group_reg,
            expression_reg,
            keep,
        } => OperatorKind::Collect(CollectState::new(
            group_registers.clone(),
            *count_only,
            *group_reg,
            *expression_reg,
            keep.clone(),
        )),
        NodeParams::Limit {
            offset,
            limit,
            full_count,
        } => OperatorKind::Limit(LimitState::new(*offset, *limit, *full_count)),
        NodeParams::ReturnRows { in_reg } => OperatorKind::ReturnRows(ReturnState::new(*in_reg)),
        NodeParams::NoResults => OperatorKind::NoResults,
        NodeParams::Remove {
            collection,
            in_reg,
            options,
            out_reg,
        } => OperatorKind::Mutation(MutationState::remove(
            ctx, *collection, *in_reg, *options, *out_reg,
        )?),
        NodeParams::Insert {
            collection,
            in_reg,
            options,
            out_reg,
        } => OperatorKind::Mutation(MutationState::insert(
            ctx, *collection, *in_reg, *options, *out_reg,
        )?),
        NodeParams::Update {
            collection,
            doc_reg,
            key_reg,
            options,
            out_reg,
        } => OperatorKind::Mutation(MutationState::update(
            ctx, *collection, *doc_reg, *key_reg, *options, *out_reg,
        )?),
        NodeParams::Replace {
            collection,
            doc_reg,
            key_reg,
            options,
            out_reg,
        } => OperatorKind::Mutation(MutationState::replace(
            ctx, *collection, *doc_reg, *key_reg, *options, *out_reg,
        )?),
        NodeParams::Scatter { shards } => OperatorKind::Scatter(ScatterState::new(shards.clone())),
        NodeParams::Distribute {
            shards,
            in_reg,
            create_keys,
            locator,
            key_generator,
        } => OperatorKind::Distribute(DistributeState::new(
            shards.clone(),
            *in_reg,
            *create_keys,
            Arc::clone(locator),
            Arc::clone(key_generator),
        )),
        NodeParams::Gather { elements } => {
            OperatorKind::Gather(GatherState::new(elements.clone(), deps.len()))
        }
        NodeParams::Remote {
            server,
            vocbase,
            query_id,
            own_shard,
            transport,
        } => OperatorKind::Remote(RemoteState::new(
            server.clone(),
            vocbase.clone(),
            query_id.clone(),
            own_shard.clone(),
            Arc::clone(transport),
        )),
    };

    Ok(Operator::new(
        node.id,
        nr_regs,
        node.regs_to_clear.clone(),
        Arc::clone(ctx),
        deps,
        kind,
    ))
}
