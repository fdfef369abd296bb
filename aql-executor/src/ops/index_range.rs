//! Index-driven range access.
//!
//! Per incoming row (when any bound is variable) the operator
//! re-specializes its condition into constant conjunctions, then drives the
//! index behind a per-kind iterator: primary and edge lookups resolve
//! document handles, hash lookups build a search tuple from the equality
//! bounds, and skiplist iteration sorts the conjunctions by the index's
//! attribute order first so merged output stays sorted.

use std::cmp::Ordering;
use std::sync::Arc;

use aql_data::{compare_json, CollectionId, CollectionTag, Document, ItemBlock, Value};
use aql_errors::{internal, AqlResult};
use aql_expression::{EvalContext, ScriptScope};
use aql_storage::{
    Barrier, EdgeCursor, EdgeDirection, HashCursor, IndexBound, IndexHandle, SkiplistCursor,
    SkiplistOperator, TransactionCollection,
};
use serde_json::Value as JsonValue;

use super::condition::{specialize, AndClause, RangeSpec};
use super::{resolve_handle, Core, DEFAULT_BATCH_SIZE};
use crate::context::QueryContext;

enum ActiveCursor {
    None,
    Edge(Box<dyn EdgeCursor>),
    Hash(Box<dyn HashCursor>),
    Skiplist(Box<dyn SkiplistCursor>),
}

impl ActiveCursor {
    fn is_none(&self) -> bool {
        matches!(self, ActiveCursor::None)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Primary,
    Edge,
    Hash,
    Skiplist,
}

/// State of one IndexRange operator.
pub struct IndexRangeState {
    collection: Arc<dyn TransactionCollection>,
    _barrier: Barrier,
    index: IndexHandle,
    /// The planned condition; bounds may be variable.
    ranges: Vec<Vec<RangeSpec>>,
    reverse: bool,
    any_variable: bool,
    needs_runtime: bool,
    /// The specialized, fully-constant condition.
    condition: Vec<AndClause>,
    /// Clause visit order for skiplist iteration (sorted by index prefix).
    sort_coords: Vec<usize>,
    pos_in_ranges: usize,
    documents: Vec<Arc<Document>>,
    pos_in_docs: usize,
    cursor: ActiveCursor,
    /// True directly after `init_ranges`; the primary index reads only
    /// once per specialization.
    fresh: bool,
    tag: CollectionTag,
}

impl IndexRangeState {
    pub(crate) fn new(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        index_id: &str,
        ranges: Vec<Vec<RangeSpec>>,
        reverse: bool,
    ) -> AqlResult<Self> {
        let index = ctx.trx.index(collection, index_id)?;
        let collection = ctx.trx.collection(collection)?;
        let barrier = collection.order_barrier();
        let tag = collection.tag();
        let any_variable = ranges
            .iter()
            .flatten()
            .any(|spec| !spec.is_constant());
        let needs_runtime = ranges
            .iter()
            .flatten()
            .any(RangeSpec::needs_script_runtime);
        Ok(Self {
            collection,
            _barrier: barrier,
            index,
            ranges,
            reverse,
            any_variable,
            needs_runtime,
            condition: Vec::new(),
            sort_coords: Vec::new(),
            pos_in_ranges: 0,
            documents: Vec::new(),
            pos_in_docs: 0,
            cursor: ActiveCursor::None,
            fresh: false,
            tag,
        })
    }

    /// With a fully constant condition, specialization runs once.
    pub(crate) fn initialize(&mut self, _core: &mut Core) -> AqlResult<()> {
        if !self.any_variable {
            self.condition = specialize(&self.ranges, None)?;
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.documents.clear();
        self.pos_in_docs = 0;
        self.pos_in_ranges = 0;
        self.cursor = ActiveCursor::None;
        self.fresh = false;
    }

    /// Specialize the condition for the current input row and position the
    /// first per-kind iterator. Returns false when the condition cannot
    /// produce anything for this row.
    fn init_ranges(&mut self, core: &Core) -> AqlResult<bool> {
        self.fresh = true;

        if self.any_variable {
            let specialized = {
                let cur = core.buffer.front().expect("caller ensured input");
                let ctx = EvalContext {
                    trx: core.ctx.trx.as_ref(),
                    block: cur,
                    row: core.pos,
                };
                if self.needs_runtime {
                    let mut scope =
                        ScriptScope::enter(core.ctx.script_runtime.as_ref(), core.ctx.cluster_mode);
                    for (expression, _) in self
                        .ranges
                        .iter()
                        .flatten()
                        .flat_map(|s| s.lows.iter().chain(s.highs.iter()))
                    {
                        scope.invalidate_on_exit(expression.as_ref());
                    }
                    specialize(&self.ranges, Some(&ctx))?
                } else {
                    specialize(&self.ranges, Some(&ctx))?
                }
            };
            self.condition = specialized;
        }

        self.pos_in_ranges = 0;
        match self.kind() {
            IndexKind::Primary => Ok(true),
            IndexKind::Edge => {
                if self.condition.is_empty() {
                    return Ok(false);
                }
                self.advance_edge_iterator(core)?;
                Ok(!self.cursor.is_none())
            }
            IndexKind::Hash => {
                if self.condition.is_empty() {
                    return Ok(false);
                }
                self.advance_hash_iterator();
                Ok(!self.cursor.is_none())
            }
            IndexKind::Skiplist => {
                if self.condition.is_empty() {
                    return Ok(false);
                }
                self.sort_conditions();
                self.advance_skiplist_iterator();
                Ok(!self.cursor.is_none())
            }
        }
    }

    fn kind(&self) -> IndexKind {
        match &self.index {
            IndexHandle::Primary(_) => IndexKind::Primary,
            IndexHandle::Edge(_) => IndexKind::Edge,
            IndexHandle::Hash(_) => IndexKind::Hash,
            IndexHandle::Skiplist(_) => IndexKind::Skiplist,
        }
    }

    /// Build the next edge iterator, skipping clauses that do not resolve
    /// to a direction+vertex pair.
    fn advance_edge_iterator(&mut self, core: &Core) -> AqlResult<()> {
        let IndexHandle::Edge(index) = &self.index else {
            internal!("edge iterator requested on non-edge index");
        };
        self.cursor = ActiveCursor::None;
        while self.pos_in_ranges < self.condition.len() {
            let clause = &self.condition[self.pos_in_ranges];
            let pair = clause.iter().find_map(|range| {
                let direction = match range.attr.as_str() {
                    "_from" => EdgeDirection::Out,
                    "_to" => EdgeDirection::In,
                    _ => return None,
                };
                let vertex = range.equality_value()?.as_str()?;
                Some((direction, vertex.to_string()))
            });
            match pair {
                Some((direction, vertex))
                    if resolve_handle(&core.ctx, &vertex).is_ok() =>
                {
                    self.cursor = ActiveCursor::Edge(index.edges(direction, &vertex));
                    return Ok(());
                }
                _ => self.pos_in_ranges += 1,
            }
        }
        Ok(())
    }

    /// Build the next hash iterator, skipping clauses whose search tuple
    /// cannot be assembled (an attribute not pinned to a single value).
    fn advance_hash_iterator(&mut self) {
        let IndexHandle::Hash(index) = &self.index else {
            return;
        };
        self.cursor = ActiveCursor::None;
        while self.pos_in_ranges < self.condition.len() {
            let clause = &self.condition[self.pos_in_ranges];
            let search: Option<Vec<JsonValue>> = index
                .fields()
                .iter()
                .map(|field| {
                    clause
                        .iter()
                        .find(|r| &r.attr == field)
                        .and_then(|r| r.equality_value())
                        .cloned()
                })
                .collect();
            match search {
                Some(search) => {
                    self.cursor = ActiveCursor::Hash(index.lookup(&search));
                    return;
                }
                None => self.pos_in_ranges += 1,
            }
        }
    }

    /// Build the skiplist iterator for the clause at the current sort
    /// position: a leading equality tuple, then the bounds of the first
    /// non-equality attribute.
    fn advance_skiplist_iterator(&mut self) {
        let IndexHandle::Skiplist(index) = &self.index else {
            return;
        };
        self.cursor = ActiveCursor::None;
        if self.pos_in_ranges >= self.sort_coords.len() {
            return;
        }
        let clause = &self.condition[self.sort_coords[self.pos_in_ranges]];
        let mut op = SkiplistOperator::default();
        for field in index.fields() {
            let Some(range) = clause.iter().find(|r| &r.attr == field) else {
                break;
            };
            if let Some(value) = range.equality_value() {
                op.equality.push(value.clone());
                continue;
            }
            op.lower = range.low.as_ref().map(|b| IndexBound {
                value: b.value.clone(),
                inclusive: b.inclusive,
            });
            op.upper = range.high.as_ref().map(|b| IndexBound {
                value: b.value.clone(),
                inclusive: b.inclusive,
            });
            break;
        }
        self.cursor = ActiveCursor::Skiplist(index.range(&op, self.reverse));
    }

    /// Order the clauses by the index's attribute prefix so that visiting
    /// them in `sort_coords` order yields index-ordered output.
    fn sort_conditions(&mut self) {
        let IndexHandle::Skiplist(index) = &self.index else {
            return;
        };
        let fields = index.fields().to_vec();
        let condition = &self.condition;
        let reverse = self.reverse;

        let less = |i: usize, j: usize| -> bool {
            let (l, r) = if reverse { (j, i) } else { (i, j) };
            for field in &fields {
                let lhs = condition[l].iter().find(|x| &x.attr == field);
                let rhs = condition[r].iter().find(|x| &x.attr == field);
                let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
                    break;
                };
                if lhs.is_equality() && rhs.is_equality() {
                    match compare_json(
                        lhs.equality_value().expect("checked equality"),
                        rhs.equality_value().expect("checked equality"),
                    ) {
                        Ordering::Less => return true,
                        Ordering::Greater => return false,
                        Ordering::Equal => continue,
                    }
                }
                // disjoint ranges: the one ending before the other starts
                // comes first
                return match (&lhs.high, &rhs.low) {
                    (Some(high), Some(low)) => {
                        compare_json(&high.value, &low.value) != Ordering::Greater
                    }
                    _ => false,
                };
            }
            false
        };

        self.sort_coords = (0..self.condition.len()).collect();
        self.sort_coords.sort_by(|&a, &b| {
            if less(a, b) {
                Ordering::Less
            } else if less(b, a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        self.pos_in_ranges = 0;
    }

    /// Refill the local document buffer from the active iterator, moving
    /// to the next clause as iterators drain. Returns false when nothing
    /// more can be produced for the current specialization.
    fn read_index(&mut self, core: &Core, at_most: usize) -> AqlResult<bool> {
        self.documents.clear();

        match self.kind() {
            IndexKind::Primary => {
                if self.fresh {
                    self.read_primary(core);
                }
            }
            IndexKind::Edge => {
                while self.documents.len() < at_most {
                    let batch = {
                        let ActiveCursor::Edge(cursor) = &mut self.cursor else {
                            break;
                        };
                        cursor.next_batch(at_most - self.documents.len())
                    };
                    if batch.is_empty() {
                        self.pos_in_ranges += 1;
                        self.advance_edge_iterator(core)?;
                        continue;
                    }
                    core.ctx.stats.add_scanned_index(batch.len());
                    self.documents.extend(batch);
                }
            }
            IndexKind::Hash => {
                while self.documents.len() < at_most {
                    let batch = {
                        let ActiveCursor::Hash(cursor) = &mut self.cursor else {
                            break;
                        };
                        cursor.next_batch(at_most - self.documents.len())
                    };
                    if batch.is_empty() {
                        self.pos_in_ranges += 1;
                        self.advance_hash_iterator();
                        continue;
                    }
                    core.ctx.stats.add_scanned_index(batch.len());
                    self.documents.extend(batch);
                }
            }
            IndexKind::Skiplist => {
                while self.documents.len() < at_most {
                    let next = {
                        let ActiveCursor::Skiplist(cursor) = &mut self.cursor else {
                            break;
                        };
                        cursor.next()
                    };
                    match next {
                        Some(doc) => {
                            core.ctx.stats.add_scanned_index(1);
                            self.documents.push(doc);
                        }
                        None => {
                            self.pos_in_ranges += 1;
                            self.advance_skiplist_iterator();
                        }
                    }
                }
            }
        }

        self.fresh = false;
        Ok(!self.documents.is_empty())
    }

    /// Primary-index lookups: each clause must pin `_id` or `_key`; at
    /// most one document per clause.
    fn read_primary(&mut self, core: &Core) {
        let IndexHandle::Primary(primary) = &self.index else {
            return;
        };
        for clause in &self.condition {
            let mut key: Option<String> = None;
            for range in clause {
                match range.attr.as_str() {
                    "_id" => {
                        if let Some(JsonValue::String(handle)) = range.equality_value() {
                            if let Ok((cid, parsed)) = resolve_handle(&core.ctx, handle) {
                                if cid == self.collection.id() {
                                    key = Some(parsed);
                                }
                            }
                        }
                    }
                    "_key" => {
                        if let Some(JsonValue::String(k)) = range.equality_value() {
                            key = Some(k.clone());
                        }
                    }
                    _ => {}
                }
            }
            if let Some(key) = key {
                if let Some(doc) = primary.lookup_key(&key) {
                    core.ctx.stats.add_scanned_index(1);
                    self.documents.push(doc);
                }
            }
        }
    }

    pub(crate) fn get_some(
        &mut self,
        core: &mut Core,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        if core.done {
            return Ok(None);
        }

        loop {
            if core.buffer.is_empty() {
                let to_fetch = DEFAULT_BATCH_SIZE.min(at_most);
                if !core.get_block(to_fetch, to_fetch)? {
                    core.done = true;
                    return Ok(None);
                }
                core.pos = 0;
                if !self.init_ranges(core)? {
                    core.done = true;
                    return Ok(None);
                }
                self.read_index(core, at_most)?;
                self.pos_in_docs = 0;
            } else if self.pos_in_docs >= self.documents.len() {
                self.pos_in_docs = 0;
                if !self.read_index(core, at_most)? {
                    // no more output for this input row: advance it
                    core.pos += 1;
                    if core.pos >= core.buffer.front().expect("still buffered").len() {
                        core.buffer.pop_front();
                        core.pos = 0;
                    }
                    if core.buffer.is_empty() {
                        if !core.get_block(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
                            core.done = true;
                            return Ok(None);
                        }
                        core.pos = 0;
                    }
                    if !self.init_ranges(core)? {
                        core.done = true;
                        return Ok(None);
                    }
                    self.read_index(core, at_most)?;
                }
            }

            let available = self.documents.len() - self.pos_in_docs;
            let to_send = at_most.min(available);
            if to_send > 0 {
                let cur = core.buffer.front().expect("buffer filled above");
                let cur_regs = cur.nr_regs();
                let mut res = ItemBlock::new(to_send, core.nr_regs);
                core.inherit_registers(cur, &mut res, core.pos);
                res.set_collection(cur_regs, Some(self.tag.clone()));
                for j in 0..to_send {
                    if j > 0 {
                        Core::copy_row_zero(&mut res, j, cur_regs);
                    }
                    res.set_value(
                        j,
                        cur_regs,
                        Value::Shaped(Arc::clone(&self.documents[self.pos_in_docs])),
                    );
                    self.pos_in_docs += 1;
                }
                return Ok(Some(res));
            }
        }
    }

    pub(crate) fn skip_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<usize> {
        if core.done {
            return Ok(0);
        }

        let mut skipped = 0;
        while skipped < at_least {
            if core.buffer.is_empty() {
                let to_fetch = DEFAULT_BATCH_SIZE.min(at_most);
                if !core.get_block(to_fetch, to_fetch)? {
                    core.done = true;
                    return Ok(skipped);
                }
                core.pos = 0;
                if !self.init_ranges(core)? {
                    core.done = true;
                    return Ok(skipped);
                }
                self.read_index(core, at_most)?;
                self.pos_in_docs = 0;
            }

            let available = self.documents.len() - self.pos_in_docs;
            let to_skip = (at_most - skipped).min(available);
            self.pos_in_docs += to_skip;
            skipped += to_skip;

            if self.pos_in_docs >= self.documents.len() {
                if !self.read_index(core, at_most)? {
                    core.pos += 1;
                    if core.pos >= core.buffer.front().expect("still buffered").len() {
                        core.buffer.pop_front();
                        core.pos = 0;
                    }
                    if !core.buffer.is_empty() {
                        if !self.init_ranges(core)? {
                            core.done = true;
                            return Ok(skipped);
                        }
                        self.read_index(core, at_most)?;
                    }
                }
                self.pos_in_docs = 0;
            }
        }
        Ok(skipped)
    }
}
