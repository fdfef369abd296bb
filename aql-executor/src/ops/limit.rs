//! Offset/count windowing with optional full-count accounting.

use aql_data::ItemBlock;
use aql_errors::{internal, AqlResult};

use super::{Core, DEFAULT_BATCH_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Fresh,
    Running,
    Done,
}

/// Skips `offset` rows, then forwards at most `limit` rows. With
/// `full_count` set, the operator additionally drains its entire input
/// after the window, attributing the total input size to the query's
/// fullCount statistic.
pub struct LimitState {
    offset: usize,
    limit: usize,
    full_count: bool,
    phase: Phase,
    emitted: usize,
}

impl LimitState {
    pub(crate) fn new(offset: usize, limit: usize, full_count: bool) -> Self {
        Self {
            offset,
            limit,
            full_count,
            phase: Phase::Fresh,
            emitted: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.phase = Phase::Fresh;
        self.emitted = 0;
    }

    pub(crate) fn get_or_skip_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
        skipping: bool,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        if self.phase == Phase::Done {
            return Ok((None, 0));
        }

        if self.phase == Phase::Fresh {
            if self.full_count {
                core.ctx.stats.init_full_count();
                core.ctx.stats.add_full_count(self.offset);
            }
            if self.offset > 0 {
                let Some(dep) = core.deps.first_mut() else {
                    internal!("limit operator has no input");
                };
                dep.skip(self.offset)?;
            }
            self.phase = Phase::Running;
            self.emitted = 0;
            if self.limit == 0 && !self.full_count {
                self.phase = Phase::Done;
                return Ok((None, 0));
            }
        }

        let mut result = None;
        let mut skipped = 0;
        if self.limit > 0 {
            let at_most = at_most.min(self.limit - self.emitted);
            let at_least = at_least.min(at_most);
            (result, skipped) = core.default_get_or_skip(at_least, at_most, skipping)?;
            if skipped == 0 {
                return Ok((result, 0));
            }
            self.emitted += skipped;
            if self.full_count {
                core.ctx.stats.add_full_count(skipped);
            }
        }

        if self.emitted >= self.limit {
            self.phase = Phase::Done;
            if self.full_count {
                // drain the rest of the input just to count it
                loop {
                    let (block, drained) =
                        core.default_get_or_skip(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE, skipping)?;
                    drop(block);
                    if drained == 0 {
                        break;
                    }
                    core.ctx.stats.add_full_count(drained);
                }
            }
        }

        Ok((result, skipped))
    }
}
