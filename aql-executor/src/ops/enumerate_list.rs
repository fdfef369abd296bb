//! Iterate an array, range or nested-block value.

use aql_data::{CollectionTag, ItemBlock, RegisterId, Value};
use aql_errors::{AqlError, AqlResult};

use super::{Core, DEFAULT_BATCH_SIZE};

/// For each input row, emits one output row per element of the value in
/// the input register. JSON values must be arrays; ranges iterate
/// numerically; nested block vectors iterate their concatenated rows.
pub struct EnumerateListState {
    in_reg: RegisterId,
    /// Position within the current list value.
    index: usize,
    /// For DocVec values: the block the index currently falls into.
    this_block: usize,
    /// Rows of the blocks preceding `this_block`.
    seen: usize,
    /// Total rows of the current DocVec value.
    docvec_size: usize,
}

impl EnumerateListState {
    pub(crate) fn new(in_reg: RegisterId) -> Self {
        Self {
            in_reg,
            index: 0,
            this_block: 0,
            seen: 0,
            docvec_size: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.index = 0;
        self.this_block = 0;
        self.seen = 0;
        self.docvec_size = 0;
    }

    fn array_expected(value: &Value) -> AqlError {
        AqlError::ArrayExpected {
            context: format!("as operand to FOR loop, got {}", value.type_name()),
        }
    }

    /// Size of the value being iterated, failing on non-iterable values.
    fn size_of(&mut self, value: &Value) -> AqlResult<usize> {
        match value {
            Value::Json(_) | Value::Range(_) => value
                .iterable_len()
                .ok_or_else(|| Self::array_expected(value)),
            Value::DocVec(blocks) => {
                if self.index == 0 {
                    self.docvec_size = blocks.iter().map(ItemBlock::len).sum();
                }
                Ok(self.docvec_size)
            }
            _ => Err(Self::array_expected(value)),
        }
    }

    /// The element at the current index, advancing the cursor. For DocVec
    /// values the element's collection tag is returned alongside.
    fn next_element(&mut self, value: &Value) -> AqlResult<(Value, Option<CollectionTag>)> {
        match value {
            Value::Json(v) => {
                let items = v.as_array().ok_or_else(|| Self::array_expected(value))?;
                let element = Value::json(items[self.index].clone());
                self.index += 1;
                Ok((element, None))
            }
            Value::Range(r) => {
                let element = Value::json(r.at(self.index).into());
                self.index += 1;
                Ok((element, None))
            }
            Value::DocVec(blocks) => {
                let block = &blocks[self.this_block];
                let element = block.value(self.index - self.seen, 0).clone();
                let tag = block.collection(0).cloned();
                self.index += 1;
                if self.index == block.len() + self.seen {
                    self.seen += block.len();
                    self.this_block += 1;
                }
                Ok((element, tag))
            }
            _ => Err(Self::array_expected(value)),
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

        // the value we loop over can be empty, in which case we try the
        // next input row
        loop {
            if core.buffer.is_empty() {
                let to_fetch = DEFAULT_BATCH_SIZE.min(at_most);
                if !core.get_block(to_fetch, to_fetch)? {
                    core.done = true;
                    return Ok(None);
                }
                core.pos = 0;
            }

            let in_value = core
                .buffer
                .front()
                .expect("buffer filled above")
                .value(core.pos, self.in_reg)
                .clone();
            let size = self.size_of(&in_value)?;

            let mut result = None;
            if size > 0 && self.index < size {
                let to_send = at_most.min(size - self.index);
                let cur = core.buffer.front().expect("buffer filled above");
                let cur_regs = cur.nr_regs();
                let mut res = ItemBlock::new(to_send, core.nr_regs);
                core.inherit_registers(cur, &mut res, core.pos);
                for j in 0..to_send {
                    if j > 0 {
                        Core::copy_row_zero(&mut res, j, cur_regs);
                    }
                    let (element, tag) = self.next_element(&in_value)?;
                    if j == 0 {
                        res.set_collection(cur_regs, tag);
                    }
                    res.set_value(j, cur_regs, element);
                }
                result = Some(res);
            }

            if self.index >= size {
                self.reset();
                core.pos += 1;
                if core.pos >= core.buffer.front().expect("still buffered").len() {
                    core.buffer.pop_front();
                    core.pos = 0;
                }
            }

            if result.is_some() {
                return Ok(result);
            }
        }
    }

    pub(crate) fn skip_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<usize> {
        let mut skipped = 0;
        if core.done {
            return Ok(skipped);
        }

        while skipped < at_least {
            if core.buffer.is_empty() {
                let to_fetch = DEFAULT_BATCH_SIZE.min(at_most);
                if !core.get_block(to_fetch, to_fetch)? {
                    core.done = true;
                    return Ok(skipped);
                }
                core.pos = 0;
            }

            let in_value = core
                .buffer
                .front()
                .expect("buffer filled above")
                .value(core.pos, self.in_reg)
                .clone();
            let size = self.size_of(&in_value)?;

            if at_most - skipped < size - self.index {
                self.index += at_most - skipped;
                skipped = at_most;
            } else {
                skipped += size - self.index;
                self.reset();
                core.pos += 1;
                if core.pos >= core.buffer.front().expect("still buffered").len() {
                    core.buffer.pop_front();
                    core.pos = 0;
                }
            }
        }
        Ok(skipped)
    }
}
