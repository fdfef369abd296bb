//! Stream grouping over pre-sorted input.
//!
//! The input is assumed sorted on the group registers (the planner plants
//! an upstream Sort). The operator keeps exactly one group's state at a
//! time: its key values and, depending on the mode, a count, the retained
//! row slices, or the values of a projected register. A group is emitted
//! when the key changes or the input ends.

use std::cmp::Ordering;

use aql_data::{CollectionTag, ItemBlock, RegisterId, Value};
use aql_errors::AqlResult;
use serde_json::Value as JsonValue;

use super::Core;

struct CurrentGroup {
    /// Key values of the open group, empty slots when no group is open.
    values: Vec<Value>,
    tags: Vec<Option<CollectionTag>>,
    group_length: usize,
    /// Retained row slices for INTO modes.
    group_blocks: Vec<ItemBlock>,
    /// First/last row of the group within the current input block.
    rows: Option<(usize, usize)>,
}

impl CurrentGroup {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            tags: Vec::new(),
            group_length: 0,
            group_blocks: Vec::new(),
            rows: None,
        }
    }

    fn initialize(&mut self, capacity: usize) {
        self.values = vec![Value::Empty; capacity];
        self.tags = vec![None; capacity];
        self.group_length = 0;
        self.group_blocks.clear();
        self.rows = None;
    }

    fn reset(&mut self) {
        for v in &mut self.values {
            *v = Value::Empty;
        }
        for t in &mut self.tags {
            *t = None;
        }
        self.group_length = 0;
        self.group_blocks.clear();
        self.rows = None;
    }

    fn set_first_row(&mut self, row: usize) {
        self.rows = Some((row, row));
    }

    fn set_last_row(&mut self, row: usize) {
        let first = self.rows.map_or(row, |(f, _)| f);
        self.rows = Some((first, row));
    }

    /// Fold the marked row span of `block` into the group: always the
    /// length, and the actual rows when an INTO mode retains them.
    fn add_values(&mut self, block: &ItemBlock, collect_rows: bool) {
        if let Some((first, last)) = self.rows.take() {
            self.group_length += last - first + 1;
            if collect_rows {
                self.group_blocks.push(block.slice(first, last + 1));
            }
        }
    }

    fn is_open(&self) -> bool {
        self.values.first().map(|v| !v.is_empty()).unwrap_or(false)
    }
}

/// State of one Collect operator.
pub struct CollectState {
    /// (output register, input register) per group key.
    group_registers: Vec<(RegisterId, RegisterId)>,
    /// `WITH COUNT INTO`: emit only the group size.
    count_only: bool,
    group_reg: Option<RegisterId>,
    expression_reg: Option<RegisterId>,
    /// (register, variable name) pairs materialized per retained row.
    keep: Vec<(RegisterId, String)>,
    current: CurrentGroup,
}

impl CollectState {
    pub(crate) fn new(
        group_registers: Vec<(RegisterId, RegisterId)>,
        count_only: bool,
        group_reg: Option<RegisterId>,
        expression_reg: Option<RegisterId>,
        keep: Vec<(RegisterId, String)>,
    ) -> Self {
        Self {
            group_registers,
            count_only,
            group_reg,
            expression_reg,
            keep,
            current: CurrentGroup::new(),
        }
    }

    pub(crate) fn initialize(&mut self) {
        self.current.initialize(self.group_registers.len());
    }

    pub(crate) fn reset_group(&mut self) {
        self.current.initialize(self.group_registers.len());
    }

    fn collect_rows(&self) -> bool {
        self.group_reg.is_some() && !self.count_only
    }

    /// Write the finished group into `res` row `row` and reset it.
    fn emit_group(
        &mut self,
        cur: Option<&ItemBlock>,
        res: &mut ItemBlock,
        row: usize,
    ) -> AqlResult<()> {
        if row > 0 {
            Core::copy_row_zero(res, row, res.nr_regs());
        }

        for (i, (out_reg, _)) in self.group_registers.iter().enumerate() {
            let value = std::mem::take(&mut self.current.values[i]);
            // a group key may be a document; there is only one collection
            // tag per output column, so documents materialize here
            let value = match value {
                Value::Shaped(_) => {
                    Value::json(value.materialize(self.current.tags[i].as_ref()))
                }
                other => other,
            };
            res.set_value(row, *out_reg, value);
        }

        if let Some(group_reg) = self.group_reg {
            if let Some(cur) = cur {
                let collect = self.collect_rows();
                self.current.add_values(cur, collect);
            }
            let value = if self.count_only {
                Value::json(JsonValue::from(self.current.group_length))
            } else if let Some(expression_reg) = self.expression_reg {
                let mut out = Vec::with_capacity(self.current.group_length);
                for block in &self.current.group_blocks {
                    let tag = block.collection(expression_reg);
                    for r in 0..block.len() {
                        out.push(block.value(r, expression_reg).materialize(tag));
                    }
                }
                Value::json(JsonValue::Array(out))
            } else {
                let mut out = Vec::with_capacity(self.current.group_length);
                for block in &self.current.group_blocks {
                    for r in 0..block.len() {
                        let mut obj = serde_json::Map::new();
                        for (reg, name) in &self.keep {
                            let tag = block.collection(*reg);
                            obj.insert(name.clone(), block.value(r, *reg).materialize(tag));
                        }
                        out.push(JsonValue::Object(obj));
                    }
                }
                Value::json(JsonValue::Array(out))
            };
            res.set_value(row, group_reg, value);
        }

        self.current.reset();
        Ok(())
    }

    pub(crate) fn get_or_skip_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
        skipping: bool,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        if core.done {
            return Ok((None, 0));
        }
        let is_total = self.group_registers.is_empty();

        if core.buffer.is_empty() {
            if !core.get_block(at_least, at_most)? {
                core.done = true;
                if is_total && self.current.group_length == 0 {
                    // total aggregation over empty input still emits the
                    // zero count
                    if skipping {
                        return Ok((None, 1));
                    }
                    let mut block = ItemBlock::new(1, core.nr_regs);
                    self.emit_group(None, &mut block, 0)?;
                    return Ok((Some(block), 1));
                }
                return Ok((None, 0));
            }
            core.pos = 0;
        }

        let mut res = if skipping {
            None
        } else {
            let cur = core.buffer.front().expect("filled above");
            let mut block = ItemBlock::new(at_most, core.nr_regs);
            core.inherit_registers(cur, &mut block, core.pos);
            Some(block)
        };

        let mut skipped = 0usize;
        while skipped < at_most {
            let new_group = if is_total {
                false
            } else if !self.current.is_open() {
                true
            } else {
                let cur = core.buffer.front().expect("non-empty in loop");
                self.group_registers.iter().enumerate().any(|(i, (_, in_reg))| {
                    Value::compare(
                        &self.current.values[i],
                        self.current.tags[i].as_ref(),
                        cur.value(core.pos, *in_reg),
                        cur.collection(*in_reg),
                    ) != Ordering::Equal
                })
            };

            if new_group {
                if self.current.is_open() {
                    if skipping {
                        // a skipped group is gone for good; drop its key so
                        // a later get_some does not resurrect it
                        self.current.reset();
                    } else {
                        let cur = core.buffer.front().expect("non-empty in loop");
                        self.emit_group(Some(cur), res.as_mut().expect("allocated"), skipped)?;
                    }
                    skipped += 1;
                    if skipped == at_most {
                        // output full; do not advance the input pointer
                        if let Some(block) = &mut res {
                            block.shrink(skipped)?;
                        }
                        return Ok((res, skipped));
                    }
                }

                // open the new group with the current row's key values
                let cur = core.buffer.front().expect("non-empty in loop");
                for (i, (_, in_reg)) in self.group_registers.iter().enumerate() {
                    self.current.values[i] = cur.value(core.pos, *in_reg).clone();
                    self.current.tags[i] = cur.collection(*in_reg).cloned();
                }
                if !skipping {
                    self.current.set_first_row(core.pos);
                }
            }
            if !skipping {
                self.current.set_last_row(core.pos);
            }

            core.pos += 1;
            if core.pos >= core.buffer.front().expect("non-empty in loop").len() {
                let finished = core.buffer.pop_front().expect("non-empty in loop");
                core.pos = 0;

                let has_more = !core.buffer.is_empty() || core.get_block(at_least, at_most)?;
                if !has_more {
                    // input exhausted: emit the final buffered group
                    if skipping {
                        skipped += 1;
                        self.current.reset();
                    } else {
                        self.emit_group(
                            Some(&finished),
                            res.as_mut().expect("allocated"),
                            skipped,
                        )?;
                        skipped += 1;
                        res.as_mut().expect("allocated").shrink(skipped)?;
                    }
                    core.done = true;
                    return Ok((res, skipped));
                }

                // carry the group's rows over before the block goes away
                let collect = self.collect_rows();
                self.current.add_values(&finished, collect);
            }
        }

        if let Some(block) = &mut res {
            block.shrink(skipped)?;
        }
        Ok((res, skipped))
    }
}
