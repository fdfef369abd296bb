//! Materialize and sort the entire input.

use std::cmp::Ordering;
use std::collections::VecDeque;

use aql_data::{CollectionTag, ItemBlock, Value};
use aql_errors::AqlResult;

use super::{Core, DEFAULT_BATCH_SIZE};
use crate::plan::SortElement;

/// Pulls everything into the buffer on `initialize_cursor`, sorts a
/// coordinate vector over it, then rebuilds the buffer in sorted order.
/// Batches are served from the rebuilt buffer by the default splicing.
pub struct SortState {
    elements: Vec<SortElement>,
    stable: bool,
}

impl SortState {
    pub(crate) fn new(elements: Vec<SortElement>, stable: bool) -> Self {
        Self { elements, stable }
    }

    pub(crate) fn fill_and_sort(&mut self, core: &mut Core) -> AqlResult<()> {
        // suck the entire input into the buffer
        while core.get_block(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {}

        if core.buffer.is_empty() {
            core.done = true;
            return Ok(());
        }
        self.do_sorting(core)?;
        core.done = false;
        core.pos = 0;
        Ok(())
    }

    fn do_sorting(&self, core: &mut Core) -> AqlResult<()> {
        let total: usize = core.buffer.iter().map(ItemBlock::len).sum();

        // coords[i] = (block index, row within block)
        let mut coords = Vec::with_capacity(total);
        for (block_idx, block) in core.buffer.iter().enumerate() {
            for row in 0..block.len() {
                coords.push((block_idx, row));
            }
        }

        let tags: Vec<Option<CollectionTag>> = {
            let front = core.buffer.front().expect("non-empty checked");
            self.elements
                .iter()
                .map(|e| front.collection(e.register).cloned())
                .collect()
        };

        let buffer = &core.buffer;
        let compare = |a: &(usize, usize), b: &(usize, usize)| -> Ordering {
            for (element, tag) in self.elements.iter().zip(tags.iter()) {
                let va = buffer[a.0].value(a.1, element.register);
                let vb = buffer[b.0].value(b.1, element.register);
                let cmp = Value::compare(va, tag.as_ref(), vb, tag.as_ref());
                if cmp != Ordering::Equal {
                    return if element.ascending { cmp } else { cmp.reverse() };
                }
            }
            Ordering::Equal
        };

        if self.stable {
            coords.sort_by(compare);
        } else {
            coords.sort_unstable_by(compare);
        }

        // rebuild the buffer in sorted order; payloads are shared, not
        // copied
        let nr_regs = core.buffer.front().expect("non-empty checked").nr_regs();
        let all_tags: Vec<Option<CollectionTag>> = (0..nr_regs)
            .map(|reg| core.buffer.front().expect("non-empty checked").collection(reg).cloned())
            .collect();

        let mut new_buffer: VecDeque<ItemBlock> = VecDeque::new();
        let mut count = 0;
        while count < total {
            let size_next = (total - count).min(DEFAULT_BATCH_SIZE);
            let mut next = ItemBlock::new(size_next, nr_regs);
            for (reg, tag) in all_tags.iter().enumerate() {
                next.set_collection(reg, tag.clone());
            }
            for i in 0..size_next {
                let (block_idx, row) = coords[count];
                for reg in 0..nr_regs {
                    let value = core.buffer[block_idx].value(row, reg).clone();
                    next.set_value(i, reg, value);
                }
                count += 1;
            }
            new_buffer.push_back(next);
        }

        core.buffer = new_buffer;
        Ok(())
    }
}
