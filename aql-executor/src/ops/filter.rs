//! Keep rows whose condition register is truthy.

use aql_data::{ItemBlock, RegisterId};
use aql_errors::{invariant, AqlResult};

use super::{Core, DEFAULT_BATCH_SIZE};

/// Filters rows on a boolean register computed upstream. Per buffered
/// block, the indices of passing rows are collected into `chosen`; output
/// splices project only those rows, stealing them out of blocks that are
/// consumed whole.
pub struct FilterState {
    in_reg: RegisterId,
    /// Indices of passing rows in the head buffered block.
    chosen: Vec<usize>,
}

impl FilterState {
    pub(crate) fn new(in_reg: RegisterId) -> Self {
        Self {
            in_reg,
            chosen: Vec::new(),
        }
    }

    /// Pull blocks until one contains at least one passing row. Blocks
    /// with no passing rows are dropped immediately.
    ///
    /// Only called with an empty buffer, so `chosen` always describes the
    /// block at the front.
    fn get_block(&mut self, core: &mut Core, at_least: usize, at_most: usize) -> AqlResult<bool> {
        debug_assert!(core.buffer.is_empty());
        loop {
            if !core.get_block(at_least, at_most)? {
                return Ok(false);
            }

            let cur = core.buffer.front().expect("just buffered");
            self.chosen.clear();
            self.chosen.reserve(cur.len());
            for row in 0..cur.len() {
                if cur.value(row, self.in_reg).is_true() {
                    self.chosen.push(row);
                }
            }
            core.ctx.stats.add_filtered(cur.len() - self.chosen.len());

            if !self.chosen.is_empty() {
                return Ok(true);
            }
            core.buffer.pop_front();
        }
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

        let mut skipped = 0usize;
        let mut collector: Vec<ItemBlock> = Vec::new();

        while skipped < at_least {
            if core.buffer.is_empty() {
                if !self.get_block(core, at_least - skipped, at_most - skipped)? {
                    core.done = true;
                    break;
                }
                core.pos = 0;
            }

            let cur_len = core.buffer.front().expect("checked above").len();
            if self.chosen.len() - core.pos + skipped > at_most {
                // the current block's chosen rows are too many for at_most
                if !skipping {
                    let slice = core.buffer.front().expect("checked above").slice_chosen(
                        &self.chosen,
                        core.pos,
                        core.pos + (at_most - skipped),
                    );
                    collector.push(slice);
                }
                core.pos += at_most - skipped;
                skipped = at_most;
            } else if core.pos > 0 || self.chosen.len() < cur_len {
                // block fits but is partially consumed or filtered: copy out
                if !skipping {
                    let stolen = core
                        .buffer
                        .front_mut()
                        .expect("checked above")
                        .steal_chosen(&self.chosen, core.pos, self.chosen.len());
                    collector.push(stolen);
                }
                skipped += self.chosen.len() - core.pos;
                core.buffer.pop_front();
                self.chosen.clear();
                core.pos = 0;
            } else {
                // every row passed and the block is fresh: hand it over
                skipped += cur_len;
                let block = core.buffer.pop_front().expect("checked above");
                if !skipping {
                    collector.push(block);
                }
                self.chosen.clear();
                core.pos = 0;
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

    pub(crate) fn has_more(&mut self, core: &mut Core) -> AqlResult<bool> {
        if core.done {
            return Ok(false);
        }
        if !core.buffer.is_empty() {
            return Ok(true);
        }
        if !self.get_block(core, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
            core.done = true;
            return Ok(false);
        }
        core.pos = 0;
        invariant!(!core.buffer.is_empty(), "filter buffered nothing");
        Ok(true)
    }
}
