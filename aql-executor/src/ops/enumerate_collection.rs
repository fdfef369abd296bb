//! Full collection scan, linear or random.

use std::sync::Arc;

use aql_data::{CollectionId, CollectionTag, Document, ItemBlock, Value};
use aql_errors::AqlResult;
use aql_storage::{Barrier, CollectionScanner, TransactionCollection};

use super::{Core, DEFAULT_BATCH_SIZE};
use crate::context::QueryContext;

/// Scans a collection, emitting one output row per document with the
/// incoming registers carried along. A barrier on the collection is held
/// for the operator's entire life so documents stay referencable.
pub struct EnumerateCollectionState {
    collection: Arc<dyn TransactionCollection>,
    _barrier: Barrier,
    scanner: Box<dyn CollectionScanner>,
    tag: CollectionTag,
    documents: Vec<Arc<Document>>,
    pos_in_documents: usize,
}

impl EnumerateCollectionState {
    pub(crate) fn new(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        random: bool,
    ) -> AqlResult<Self> {
        let collection = ctx.trx.collection(collection)?;
        let barrier = collection.order_barrier();
        let scanner = if random {
            collection.random_scanner()
        } else {
            collection.linear_scanner()
        };
        let tag = collection.tag();
        Ok(Self {
            collection,
            _barrier: barrier,
            scanner,
            tag,
            documents: Vec::new(),
            pos_in_documents: 0,
        })
    }

    pub(crate) fn reset(&mut self) {
        self.scanner.reset();
        self.documents.clear();
        self.pos_in_documents = 0;
    }

    /// Refill the local document batch. Returns false when the scan is
    /// exhausted.
    fn more_documents(&mut self, core: &Core, hint: usize) -> AqlResult<bool> {
        let hint = hint.max(DEFAULT_BATCH_SIZE);
        let docs = self.scanner.scan(hint)?;
        if docs.is_empty() {
            return Ok(false);
        }
        core.ctx.stats.add_scanned_full(docs.len());
        self.documents = docs;
        self.pos_in_documents = 0;
        Ok(true)
    }

    pub(crate) fn get_some(
        &mut self,
        core: &mut Core,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        if core.done {
            return Ok(None);
        }

        if core.buffer.is_empty() {
            let to_fetch = DEFAULT_BATCH_SIZE.min(at_most);
            if !core.get_block(to_fetch, to_fetch)? {
                core.done = true;
                return Ok(None);
            }
            core.pos = 0;
            self.reset();
        }

        if self.pos_in_documents >= self.documents.len() && !self.more_documents(core, at_most)? {
            core.done = true;
            return Ok(None);
        }

        let cur = core.buffer.front().expect("buffer filled above");
        let cur_regs = cur.nr_regs();
        let available = self.documents.len() - self.pos_in_documents;
        let to_send = at_most.min(available);

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
                Value::Shaped(Arc::clone(&self.documents[self.pos_in_documents])),
            );
            self.pos_in_documents += 1;
        }

        // advance the read position once the document batch drains
        if self.pos_in_documents >= self.documents.len() && !self.more_documents(core, at_most)? {
            self.reset();
            core.pos += 1;
            if core.pos >= core.buffer.front().expect("still buffered").len() {
                core.buffer.pop_front();
                core.pos = 0;
            }
        }

        Ok(Some(res))
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
                self.reset();
            }

            if self.pos_in_documents >= self.documents.len()
                && !self.more_documents(core, at_most)?
            {
                core.done = true;
                return Ok(skipped);
            }

            let available = self.documents.len() - self.pos_in_documents;
            if at_most >= skipped + available {
                skipped += available;
                self.pos_in_documents = self.documents.len();
                if !self.more_documents(core, at_most - skipped)? {
                    self.reset();
                    core.pos += 1;
                    if core.pos >= core.buffer.front().expect("still buffered").len() {
                        core.buffer.pop_front();
                        core.pos = 0;
                    }
                }
            } else {
                self.pos_in_documents += at_most - skipped;
                skipped = at_most;
            }
        }
        Ok(skipped)
    }

    /// The collection being scanned.
    pub fn collection(&self) -> &Arc<dyn TransactionCollection> {
        &self.collection
    }
}
