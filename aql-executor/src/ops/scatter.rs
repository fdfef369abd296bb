//! One input stream served to N shard clients.

use std::collections::HashMap;

use aql_data::ItemBlock;
use aql_errors::{internal_err, AqlResult};
use aql_storage::ShardId;

use super::{Core, DEFAULT_BATCH_SIZE};

/// The client bookkeeping shared by Scatter and Distribute: the shard→id
/// map, per-client done flags, and the collapse of per-client
/// `initializeCursor`/`shutdown` calls into one effective call.
pub(crate) struct ClientRegistry {
    shard_map: HashMap<ShardId, usize>,
    pub(crate) nr_clients: usize,
    pub(crate) done_for_client: Vec<bool>,
    /// Set after a cursor init; cleared by the next per-client call, so
    /// repeated inits from other clients' requests are no-ops.
    pub(crate) ignore_init_cursor: bool,
    pub(crate) ignore_shutdown: bool,
}

impl ClientRegistry {
    pub(crate) fn new(shards: Vec<ShardId>) -> Self {
        let nr_clients = shards.len();
        let shard_map = shards
            .into_iter()
            .enumerate()
            .map(|(i, s)| (s, i))
            .collect();
        Self {
            shard_map,
            nr_clients,
            done_for_client: vec![false; nr_clients],
            ignore_init_cursor: false,
            ignore_shutdown: false,
        }
    }

    pub(crate) fn client_id(&self, shard: &str) -> AqlResult<usize> {
        self.shard_map
            .get(shard)
            .copied()
            .ok_or_else(|| internal_err!("unknown shard id {shard}"))
    }

    /// A per-client request arrived: the next cursor init / shutdown is
    /// meaningful again.
    pub(crate) fn touch(&mut self) {
        self.ignore_init_cursor = false;
        self.ignore_shutdown = false;
    }

    pub(crate) fn begin_initialize_cursor(
        &mut self,
        core: &mut Core,
        items: Option<&ItemBlock>,
        pos: usize,
    ) -> AqlResult<()> {
        self.ignore_init_cursor = true;
        core.base_initialize_cursor(items, pos)?;
        self.done_for_client = vec![false; self.nr_clients];
        Ok(())
    }

    pub(crate) fn begin_shutdown(&mut self, core: &mut Core, code: i32) -> AqlResult<()> {
        self.ignore_shutdown = true;
        self.done_for_client.clear();
        core.base_shutdown(code)
    }
}

/// Serves the input stream to every client in full. Per client a
/// `(buffer index, row)` cursor advances independently over the shared
/// input buffer; the front block is retired only once every client has
/// moved past it.
pub struct ScatterState {
    pub(crate) clients: ClientRegistry,
    /// Per client: (block index into the shared buffer, row within it).
    pos_for_client: Vec<(usize, usize)>,
}

impl ScatterState {
    pub(crate) fn new(shards: Vec<ShardId>) -> Self {
        let clients = ClientRegistry::new(shards);
        let pos_for_client = vec![(0, 0); clients.nr_clients];
        Self {
            clients,
            pos_for_client,
        }
    }

    pub(crate) fn initialize_cursor(
        &mut self,
        core: &mut Core,
        items: Option<&ItemBlock>,
        pos: usize,
    ) -> AqlResult<()> {
        if self.clients.ignore_init_cursor {
            return Ok(());
        }
        self.clients.begin_initialize_cursor(core, items, pos)?;
        self.pos_for_client = vec![(0, 0); self.clients.nr_clients];
        Ok(())
    }

    pub(crate) fn shutdown(&mut self, core: &mut Core, code: i32) -> AqlResult<()> {
        if self.clients.ignore_shutdown {
            return Ok(());
        }
        self.clients.begin_shutdown(core, code)?;
        self.pos_for_client.clear();
        Ok(())
    }

    pub(crate) fn has_more_for_client(&mut self, core: &mut Core, shard: &str) -> AqlResult<bool> {
        let client = self.clients.client_id(shard)?;
        if self.clients.done_for_client[client] {
            return Ok(false);
        }
        self.clients.touch();

        let (block_idx, _) = self.pos_for_client[client];
        if block_idx >= core.buffer.len()
            && !core.get_block(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)?
        {
            self.clients.done_for_client[client] = true;
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn remaining_for_client(
        &mut self,
        core: &mut Core,
        shard: &str,
    ) -> AqlResult<Option<usize>> {
        let client = self.clients.client_id(shard)?;
        if self.clients.done_for_client[client] {
            return Ok(Some(0));
        }
        let Some(dep) = core.deps.first_mut() else {
            return Ok(None);
        };
        let Some(mut sum) = dep.remaining()? else {
            return Ok(None);
        };
        let (block_idx, row) = self.pos_for_client[client];
        for (i, block) in core.buffer.iter().enumerate().skip(block_idx) {
            sum += if i == block_idx {
                block.len() - row
            } else {
                block.len()
            };
        }
        Ok(Some(sum))
    }

    pub(crate) fn get_or_skip_for_client(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
        skipping: bool,
        shard: &str,
    ) -> AqlResult<(Option<ItemBlock>, usize)> {
        let client = self.clients.client_id(shard)?;
        if self.clients.done_for_client[client] {
            return Ok((None, 0));
        }
        self.clients.touch();

        // a block buffered by another client's smaller request may not
        // cover this client's lower bound, so keep pulling and splicing
        // until it is met or the input is exhausted
        let mut collector = Vec::new();
        let mut skipped = 0usize;

        while skipped < at_least {
            if self.pos_for_client[client].0 >= core.buffer.len() {
                if !core.get_block(at_least - skipped, at_most - skipped)? {
                    if skipped == 0 {
                        self.clients.done_for_client[client] = true;
                    }
                    break;
                }
            }

            let (block_idx, row) = self.pos_for_client[client];
            let block = &core.buffer[block_idx];
            let taken = (block.len() - row).min(at_most - skipped);
            if !skipping {
                collector.push(block.slice(row, row + taken));
            }
            skipped += taken;

            self.pos_for_client[client].1 += taken;
            if self.pos_for_client[client].1 == core.buffer[block_idx].len() {
                self.pos_for_client[client].0 += 1;
                self.pos_for_client[client].1 = 0;

                // retire the front block once every client moved past it
                if self.pos_for_client.iter().all(|&(b, _)| b > 0) {
                    core.buffer.pop_front();
                    for pos in &mut self.pos_for_client {
                        pos.0 -= 1;
                    }
                }
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
}
