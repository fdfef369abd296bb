//! Merge N input streams into one.

use std::cmp::Ordering;
use std::collections::VecDeque;

use aql_data::{ItemBlock, Value};
use aql_errors::AqlResult;

use super::{Core, DEFAULT_BATCH_SIZE};
use crate::plan::SortElement;

/// Either a simple concatenation (drain inputs one after the other) or a
/// sorted merge: per input a block queue and a row cursor, each output row
/// the minimum over the current front rows under the sort spec. Exhausted
/// inputs never win the comparison.
pub struct GatherState {
    elements: Vec<SortElement>,
    /// Simple mode: the input currently being drained.
    at_dep: usize,
    /// Merge mode: per input, the queued blocks.
    gather_buffer: Vec<VecDeque<ItemBlock>>,
    /// Merge mode: per input, (input index, row within its front block).
    gather_pos: Vec<(usize, usize)>,
}

impl GatherState {
    pub(crate) fn new(elements: Vec<SortElement>, nr_deps: usize) -> Self {
        Self {
            elements,
            at_dep: 0,
            gather_buffer: (0..nr_deps).map(|_| VecDeque::new()).collect(),
            gather_pos: (0..nr_deps).map(|i| (i, 0)).collect(),
        }
    }

    fn is_simple(&self) -> bool {
        self.elements.is_empty()
    }

    pub(crate) fn reset(&mut self, core: &Core) {
        self.at_dep = 0;
        if !self.is_simple() {
            self.gather_buffer = (0..core.deps.len()).map(|_| VecDeque::new()).collect();
            self.gather_pos = (0..core.deps.len()).map(|i| (i, 0)).collect();
        }
    }

    pub(crate) fn shutdown(&mut self, core: &mut Core, code: i32) -> AqlResult<()> {
        for dep in &mut core.deps {
            dep.shutdown(code)?;
        }
        if !self.is_simple() {
            for queue in &mut self.gather_buffer {
                queue.clear();
            }
            for (i, pos) in self.gather_pos.iter_mut().enumerate() {
                *pos = (i, 0);
            }
        }
        Ok(())
    }

    /// Pull one block from input `i` into its queue.
    fn get_block(&mut self, core: &mut Core, i: usize, at_least: usize, at_most: usize) -> AqlResult<bool> {
        core.throw_if_killed()?;
        match core.deps[i].get_some(at_least, at_most)? {
            Some(block) => {
                self.gather_buffer[i].push_back(block);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn has_more(&mut self, core: &mut Core) -> AqlResult<bool> {
        if core.done {
            return Ok(false);
        }
        if self.is_simple() {
            for dep in &mut core.deps {
                if dep.has_more()? {
                    return Ok(true);
                }
            }
        } else {
            for i in 0..core.deps.len() {
                if !self.gather_buffer[i].is_empty() {
                    return Ok(true);
                }
                if self.get_block(core, i, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
                    self.gather_pos[i] = (i, 0);
                    return Ok(true);
                }
            }
        }
        core.done = true;
        Ok(false)
    }

    pub(crate) fn count(&self, core: &Core) -> AqlResult<Option<usize>> {
        let mut sum = 0;
        for dep in &core.deps {
            match dep.count()? {
                Some(c) => sum += c,
                None => return Ok(None),
            }
        }
        Ok(Some(sum))
    }

    pub(crate) fn remaining(&mut self, core: &mut Core) -> AqlResult<Option<usize>> {
        let mut sum: usize = self
            .gather_buffer
            .iter()
            .zip(self.gather_pos.iter())
            .map(|(queue, &(_, row))| {
                queue
                    .iter()
                    .enumerate()
                    .map(|(i, b)| if i == 0 { b.len() - row } else { b.len() })
                    .sum::<usize>()
            })
            .sum();
        for dep in &mut core.deps {
            match dep.remaining()? {
                Some(r) => sum += r,
                None => return Ok(None),
            }
        }
        Ok(Some(sum))
    }

    /// Compare the front rows of two inputs under the sort spec.
    fn compare_fronts(&self, a: usize, b: usize) -> Ordering {
        // exhausted inputs sort last so they are never chosen
        let block_a = self.gather_buffer[a].front();
        let block_b = self.gather_buffer[b].front();
        match (block_a, block_b) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            _ => {}
        }
        let block_a = block_a.expect("checked above");
        let block_b = block_b.expect("checked above");
        let row_a = self.gather_pos[a].1;
        let row_b = self.gather_pos[b].1;
        for element in &self.elements {
            let cmp = Value::compare(
                block_a.value(row_a, element.register),
                block_a.collection(element.register),
                block_b.value(row_b, element.register),
                block_b.collection(element.register),
            );
            if cmp != Ordering::Equal {
                return if element.ascending { cmp } else { cmp.reverse() };
            }
        }
        Ordering::Equal
    }

    /// Top the input queues up until the merge can satisfy `at_least`
    /// rows or every input is exhausted; returns the rows available.
    /// Leftover rows queued by an earlier, smaller pull do not count as
    /// exhaustion, so inputs are re-pulled while the bound is unmet.
    fn refill_and_count(&mut self, core: &mut Core, at_least: usize, at_most: usize) -> AqlResult<usize> {
        let n = core.deps.len();
        let mut exhausted = vec![false; n];
        loop {
            let mut available = 0;
            for i in 0..n {
                let queue = &self.gather_buffer[i];
                if let Some(front) = queue.front() {
                    available += front.len() - self.gather_pos[i].1;
                    available += queue.iter().skip(1).map(ItemBlock::len).sum::<usize>();
                }
            }
            if available >= at_least || exhausted.iter().all(|&e| e) {
                return Ok(available);
            }
            for i in 0..n {
                if exhausted[i] {
                    continue;
                }
                let was_empty = self.gather_buffer[i].is_empty();
                if self.get_block(core, i, at_least, at_most)? {
                    if was_empty {
                        self.gather_pos[i] = (i, 0);
                    }
                } else {
                    exhausted[i] = true;
                }
            }
        }
    }

    /// The input whose front row is smallest under the sort spec.
    fn min_input(&self) -> usize {
        let mut best = 0;
        for j in 1..self.gather_buffer.len() {
            if self.compare_fronts(j, best) == Ordering::Less {
                best = j;
            }
        }
        best
    }

    /// Advance `input`'s cursor past its front row, retiring the front
    /// block when it is fully consumed.
    fn advance(&mut self, input: usize) {
        self.gather_pos[input].1 += 1;
        if self.gather_pos[input].1
            == self.gather_buffer[input]
                .front()
                .expect("chosen input is non-empty")
                .len()
        {
            self.gather_buffer[input].pop_front();
            self.gather_pos[input] = (input, 0);
        }
    }

    pub(crate) fn get_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        if core.done {
            return Ok(None);
        }

        if self.is_simple() {
            let mut res = core.deps[self.at_dep].get_some(at_least, at_most)?;
            while res.is_none() && self.at_dep < core.deps.len() - 1 {
                self.at_dep += 1;
                res = core.deps[self.at_dep].get_some(at_least, at_most)?;
            }
            if res.is_none() {
                core.done = true;
            }
            return Ok(res);
        }

        let available = self.refill_and_count(core, at_least, at_most)?;
        if available == 0 {
            core.done = true;
            return Ok(None);
        }

        let to_send = available.min(at_most);
        let example = self
            .gather_buffer
            .iter()
            .find_map(VecDeque::front)
            .expect("available > 0");
        let nr_regs = example.nr_regs();
        let mut res = ItemBlock::new(to_send, nr_regs);
        for reg in 0..nr_regs {
            res.set_collection(reg, example.collection(reg).cloned());
        }

        for i in 0..to_send {
            let input = self.min_input();
            let row = self.gather_pos[input].1;
            let front = self.gather_buffer[input]
                .front()
                .expect("chosen input is non-empty");
            for reg in 0..nr_regs {
                let value = front.value(row, reg).clone();
                res.set_value(i, reg, value);
            }
            self.advance(input);
        }

        Ok(Some(res))
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

        if self.is_simple() {
            let mut skipped = core.deps[self.at_dep].skip_some(at_least, at_most)?;
            while skipped == 0 && self.at_dep < core.deps.len() - 1 {
                self.at_dep += 1;
                skipped = core.deps[self.at_dep].skip_some(at_least, at_most)?;
            }
            if skipped == 0 {
                core.done = true;
            }
            return Ok(skipped);
        }

        let available = self.refill_and_count(core, at_least, at_most)?;
        if available == 0 {
            core.done = true;
            return Ok(0);
        }

        let skipped = available.min(at_most);
        for _ in 0..skipped {
            let input = self.min_input();
            self.advance(input);
        }
        Ok(skipped)
    }
}
