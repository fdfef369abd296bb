//! Route each input row to exactly one shard client.

use std::collections::VecDeque;
use std::sync::Arc;

use aql_data::{ItemBlock, RegisterId, Value};
use aql_errors::{AqlError, AqlResult};
use aql_storage::{KeyGenerator, ShardId, ShardLocator};
use serde_json::Value as JsonValue;

use super::scatter::ClientRegistry;
use super::{Core, DEFAULT_BATCH_SIZE};

/// Routes rows by hashing the routed register's document against the
/// target collection's shard keys. Per client a queue of
/// `(buffer index, row)` pairs is maintained; refilling advances a single
/// scan position over the shared input buffer, applying the routing
/// function to each row once.
///
/// Rows may be rewritten in place while routing: a plain string becomes
/// `{_key: s}`, and a generated `_key` is injected when the target
/// collection's sharding calls for one.
pub struct DistributeState {
    pub(crate) clients: ClientRegistry,
    /// Per client: queue of routed-but-undelivered rows.
    dist_buffer: Vec<VecDeque<(usize, usize)>>,
    /// Block index of the routing scan; the row within it is `core.pos`.
    index: usize,
    in_reg: RegisterId,
    create_keys: bool,
    locator: Arc<dyn ShardLocator>,
    key_generator: Arc<dyn KeyGenerator>,
}

impl DistributeState {
    pub(crate) fn new(
        shards: Vec<ShardId>,
        in_reg: RegisterId,
        create_keys: bool,
        locator: Arc<dyn ShardLocator>,
        key_generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        let clients = ClientRegistry::new(shards);
        let dist_buffer = (0..clients.nr_clients).map(|_| VecDeque::new()).collect();
        Self {
            clients,
            dist_buffer,
            index: 0,
            in_reg,
            create_keys,
            locator,
            key_generator,
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
        self.dist_buffer = (0..self.clients.nr_clients).map(|_| VecDeque::new()).collect();
        self.index = 0;
        Ok(())
    }

    pub(crate) fn shutdown(&mut self, core: &mut Core, code: i32) -> AqlResult<()> {
        if self.clients.ignore_shutdown {
            return Ok(());
        }
        self.clients.begin_shutdown(core, code)?;
        self.dist_buffer.clear();
        Ok(())
    }

    pub(crate) fn has_more_for_client(&mut self, core: &mut Core, shard: &str) -> AqlResult<bool> {
        let client = self.clients.client_id(shard)?;
        if self.clients.done_for_client[client] {
            return Ok(false);
        }
        self.clients.touch();

        if !self.dist_buffer[client].is_empty() {
            return Ok(true);
        }
        if !self.get_block_for_client(core, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE, client)? {
            self.clients.done_for_client[client] = true;
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn remaining_for_client(
        &mut self,
        _core: &mut Core,
        shard: &str,
    ) -> AqlResult<Option<usize>> {
        let client = self.clients.client_id(shard)?;
        if self.clients.done_for_client[client] {
            return Ok(Some(0));
        }
        // routed rows are known; how the rest of the input splits over
        // clients is not
        Ok(None)
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

        if self.dist_buffer[client].is_empty()
            && !self.get_block_for_client(core, at_least, at_most, client)?
        {
            self.clients.done_for_client[client] = true;
            return Ok((None, 0));
        }

        let queue = &mut self.dist_buffer[client];
        let skipped = queue.len().min(at_most);

        if skipping {
            queue.drain(..skipped);
            return Ok((None, skipped));
        }

        // rows for this client may span several buffered blocks; slice per
        // source block
        let mut collector = Vec::new();
        let mut taken = 0;
        while taken < skipped {
            let block_idx = queue.front().expect("sized above").0;
            let mut chosen = Vec::new();
            while taken < skipped && queue.front().map(|&(b, _)| b) == Some(block_idx) {
                chosen.push(queue.pop_front().expect("peeked").1);
                taken += 1;
            }
            collector.push(core.buffer[block_idx].slice_chosen(&chosen, 0, chosen.len()));
        }

        let result = if collector.len() == 1 {
            collector.pop()
        } else {
            Some(ItemBlock::concatenate(collector)?)
        };
        // the shared input buffer stays intact until shutdown; other
        // clients still hold positions into it
        Ok((result, skipped))
    }

    /// Route input rows until `client`'s queue holds at least `at_least`
    /// entries or the input is exhausted. Rows for other clients are
    /// queued as they are encountered.
    fn get_block_for_client(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
        client: usize,
    ) -> AqlResult<bool> {
        if core.buffer.is_empty() {
            self.index = 0;
            core.pos = 0;
        }

        while self.dist_buffer[client].len() < at_least {
            if self.index == core.buffer.len() {
                if !core.get_block(at_least, at_most)? {
                    if self.dist_buffer[client].is_empty() {
                        self.clients.done_for_client[client] = true;
                        return Ok(false);
                    }
                    break;
                }
            }

            while core.pos < core.buffer[self.index].len()
                && self.dist_buffer[client].len() < at_least
            {
                let target = self.send_to_client(core)?;
                self.dist_buffer[target].push_back((self.index, core.pos));
                core.pos += 1;
            }

            if core.pos == core.buffer[self.index].len() {
                core.pos = 0;
                self.index += 1;
            } else {
                break;
            }
        }
        Ok(true)
    }

    /// Determine the client for the row at the scan position, rewriting
    /// the routed value in place where sharding demands it.
    fn send_to_client(&mut self, core: &mut Core) -> AqlResult<usize> {
        let value = core.buffer[self.index].value(core.pos, self.in_reg);
        let Value::Json(payload) = value else {
            return Err(AqlError::DocumentTypeInvalid {
                got: value.type_name().into(),
            });
        };

        let mut has_created_key = false;
        let mut object = match payload.as_ref() {
            JsonValue::String(key) => {
                // a bare key routes as {_key: key}
                has_created_key = true;
                serde_json::json!({ "_key": key })
            }
            JsonValue::Object(_) => payload.as_ref().clone(),
            other => {
                return Err(AqlError::DocumentTypeInvalid {
                    got: match other {
                        JsonValue::Null => "null",
                        JsonValue::Bool(_) => "bool",
                        JsonValue::Number(_) => "number",
                        JsonValue::Array(_) => "array",
                        _ => "string",
                    }
                    .into(),
                })
            }
        };
        let mut rewritten = has_created_key;

        if self.create_keys {
            if self.locator.uses_default_sharding() {
                if !has_created_key && object.get("_key").is_none() {
                    object["_key"] = JsonValue::String(self.key_generator.generate());
                    rewritten = true;
                }
            } else {
                if has_created_key || object.get("_key").is_some() {
                    return Err(AqlError::MustNotSpecifyKey);
                }
                object["_key"] = JsonValue::String(self.key_generator.generate());
                rewritten = true;
            }
        }

        let shard = self.locator.responsible_shard(&object)?;
        if rewritten {
            core.buffer[self.index].set_value(core.pos, self.in_reg, Value::json(object));
        }
        self.clients.client_id(&shard)
    }
}
