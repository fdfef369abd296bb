//! The data-modification operators: Remove, Insert, Update, Replace.

use std::sync::Arc;

use aql_data::{CollectionId, CollectionTag, Document, ItemBlock, RegisterId, Value};
use aql_errors::{AqlError, AqlResult};
use aql_storage::{Barrier, CollectionKind, EdgeInfo, PatchOptions, TransactionCollection};
use serde_json::Value as JsonValue;

use super::{resolve_handle, Core};
use crate::context::QueryContext;

/// Behavior flags of a mutation operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModificationOptions {
    /// Count qualifying write errors instead of aborting the query.
    pub ignore_errors: bool,
    /// Ask the storage layer to sync the write.
    pub wait_for_sync: bool,
    /// For Update: `null` patch values remove the attribute.
    pub null_means_remove: bool,
    /// For Update: merge nested objects instead of replacing them.
    pub merge_objects: bool,
    /// On cluster workers: treat "document not found" as success (the row
    /// was routed to a shard that does not hold the document).
    pub ignore_document_not_found: bool,
    /// Accumulate the complete input before applying any write; required
    /// when reads and writes may alias.
    pub read_complete_input: bool,
    /// For Update/Replace with an output register: read back the written
    /// document instead of returning the pre-write revision.
    pub return_new_values: bool,
}

impl Default for ModificationOptions {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            wait_for_sync: false,
            null_means_remove: false,
            merge_objects: true,
            ignore_document_not_found: false,
            read_complete_input: true,
            return_new_values: false,
        }
    }
}

enum MutationOp {
    Remove {
        in_reg: RegisterId,
    },
    Insert {
        in_reg: RegisterId,
    },
    Update {
        doc_reg: RegisterId,
        key_reg: Option<RegisterId>,
    },
    Replace {
        doc_reg: RegisterId,
        key_reg: Option<RegisterId>,
    },
}

/// State shared by the four mutation operators. Input is consumed either
/// accumulate-all (the default) or block-by-block streaming; each row
/// computes a key and/or document from its registers and calls the
/// transaction.
pub struct MutationState {
    collection: Arc<dyn TransactionCollection>,
    _barrier: Barrier,
    options: ModificationOptions,
    out_reg: Option<RegisterId>,
    op: MutationOp,
    tag: CollectionTag,
}

impl MutationState {
    fn with_op(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        options: ModificationOptions,
        out_reg: Option<RegisterId>,
        op: MutationOp,
    ) -> AqlResult<Self> {
        let collection = ctx.trx.collection(collection)?;
        let barrier = collection.order_barrier();
        let tag = collection.tag();
        Ok(Self {
            collection,
            _barrier: barrier,
            options,
            out_reg,
            op,
            tag,
        })
    }

    pub(crate) fn remove(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        in_reg: RegisterId,
        options: ModificationOptions,
        out_reg: Option<RegisterId>,
    ) -> AqlResult<Self> {
        Self::with_op(ctx, collection, options, out_reg, MutationOp::Remove { in_reg })
    }

    pub(crate) fn insert(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        in_reg: RegisterId,
        options: ModificationOptions,
        out_reg: Option<RegisterId>,
    ) -> AqlResult<Self> {
        Self::with_op(ctx, collection, options, out_reg, MutationOp::Insert { in_reg })
    }

    pub(crate) fn update(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        doc_reg: RegisterId,
        key_reg: Option<RegisterId>,
        options: ModificationOptions,
        out_reg: Option<RegisterId>,
    ) -> AqlResult<Self> {
        Self::with_op(
            ctx,
            collection,
            options,
            out_reg,
            MutationOp::Update { doc_reg, key_reg },
        )
    }

    pub(crate) fn replace(
        ctx: &Arc<QueryContext>,
        collection: CollectionId,
        doc_reg: RegisterId,
        key_reg: Option<RegisterId>,
        options: ModificationOptions,
        out_reg: Option<RegisterId>,
    ) -> AqlResult<Self> {
        Self::with_op(
            ctx,
            collection,
            options,
            out_reg,
            MutationOp::Replace { doc_reg, key_reg },
        )
    }

    pub(crate) fn get_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        if self.options.read_complete_input {
            // reads and writes may alias: buffer everything first
            let mut blocks = Vec::new();
            loop {
                let (block, _) = core.default_get_or_skip(at_least, at_most, false)?;
                match block {
                    Some(block) => blocks.push(block),
                    None => break,
                }
            }
            if blocks.is_empty() {
                return Ok(None);
            }
            self.work(core, &blocks)
        } else {
            loop {
                let (block, _) = core.default_get_or_skip(at_least, at_most, false)?;
                let Some(block) = block else {
                    return Ok(None);
                };
                let reply = self.work(core, std::slice::from_ref(&block))?;
                if reply.is_some() {
                    return Ok(reply);
                }
            }
        }
    }

    fn work(&mut self, core: &Core, blocks: &[ItemBlock]) -> AqlResult<Option<ItemBlock>> {
        let count: usize = blocks.iter().map(ItemBlock::len).sum();
        let mut result = match self.out_reg {
            Some(out_reg) if count > 0 => {
                let mut block = ItemBlock::new(count, core.nr_regs);
                block.set_collection(out_reg, Some(self.tag.clone()));
                Some(block)
            }
            _ => None,
        };
        let mut written = 0usize;

        for block in blocks {
            core.throw_if_killed()?;
            for row in 0..block.len() {
                match self.apply_row(core, block, row) {
                    Ok(read_back) => {
                        core.ctx.stats.add_write_executed();
                        if let (Some(result), Some(doc), Some(out_reg)) =
                            (&mut result, read_back, self.out_reg)
                        {
                            result.set_value(written, out_reg, Value::Shaped(doc));
                            written += 1;
                        }
                    }
                    Err(e) if self.options.ignore_errors && e.is_ignorable_write_error() => {
                        core.ctx.stats.add_write_ignored();
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        match result {
            Some(mut block) if written > 0 => {
                block.shrink(written)?;
                Ok(Some(block))
            }
            _ => Ok(None),
        }
    }

    /// Treat "document not found" as success on cluster workers when the
    /// operator says so; the row may simply live on another shard.
    fn tolerate_missing<T>(&self, core: &Core, result: AqlResult<T>) -> AqlResult<Option<T>> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(AqlError::DocumentNotFound)
                if core.ctx.cluster_mode && self.options.ignore_document_not_found =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply the mutation for one input row, returning the document to
    /// place into the output register, if any.
    fn apply_row(
        &self,
        core: &Core,
        block: &ItemBlock,
        row: usize,
    ) -> AqlResult<Option<Arc<Document>>> {
        let wait = self.options.wait_for_sync;
        match &self.op {
            MutationOp::Remove { in_reg } => {
                let key = extract_key(block.value(row, *in_reg))?;
                let mut old = None;
                if self.out_reg.is_some() {
                    match self.tolerate_missing(core, self.collection.read_single(&key))? {
                        Some(doc) => old = Some(doc),
                        None => return Ok(None),
                    }
                }
                match self.tolerate_missing(core, self.collection.remove(&key, wait))? {
                    Some(()) => Ok(old),
                    None => Ok(None),
                }
            }
            MutationOp::Insert { in_reg } => {
                let value = block.value(row, *in_reg);
                let body = match value {
                    Value::Json(v) if v.is_object() => v.as_ref().clone(),
                    Value::Shaped(_) => value.materialize(block.collection(*in_reg)),
                    other => {
                        return Err(AqlError::DocumentTypeInvalid {
                            got: other.type_name().into(),
                        })
                    }
                };
                let edge = if self.collection.kind() == CollectionKind::Edge {
                    Some(extract_edge(&core.ctx, &body)?)
                } else {
                    None
                };
                let created = self.collection.create(&body, edge.as_ref(), wait)?;
                Ok(self.out_reg.is_some().then_some(created))
            }
            MutationOp::Update { doc_reg, key_reg } => {
                let patch_value = block.value(row, *doc_reg);
                if !matches!(patch_value, Value::Json(_) | Value::Shaped(_)) {
                    return Err(AqlError::DocumentTypeInvalid {
                        got: patch_value.type_name().into(),
                    });
                }
                let key = match key_reg {
                    Some(key_reg) => extract_key(block.value(row, *key_reg))?,
                    None => extract_key(patch_value)?,
                };
                let patch = patch_value.materialize(block.collection(*doc_reg));
                let old = match self.tolerate_missing(core, self.collection.read_single(&key))? {
                    Some(doc) => doc,
                    None => return Ok(None),
                };
                let patch_options = PatchOptions {
                    null_means_remove: self.options.null_means_remove,
                    merge_objects: self.options.merge_objects,
                };
                let new =
                    match self.tolerate_missing(
                        core,
                        self.collection.update(&key, &patch, &patch_options, wait),
                    )? {
                        Some(doc) => doc,
                        None => return Ok(None),
                    };
                if self.out_reg.is_none() {
                    return Ok(None);
                }
                Ok(Some(if self.options.return_new_values { new } else { old }))
            }
            MutationOp::Replace { doc_reg, key_reg } => {
                let doc_value = block.value(row, *doc_reg);
                if !matches!(doc_value, Value::Json(_) | Value::Shaped(_)) {
                    return Err(AqlError::DocumentTypeInvalid {
                        got: doc_value.type_name().into(),
                    });
                }
                let key = match key_reg {
                    Some(key_reg) => extract_key(block.value(row, *key_reg))?,
                    None => extract_key(doc_value)?,
                };
                let mut old = None;
                if self.out_reg.is_some() && !self.options.return_new_values {
                    match self.tolerate_missing(core, self.collection.read_single(&key))? {
                        Some(doc) => old = Some(doc),
                        None => return Ok(None),
                    }
                }
                let body = doc_value.materialize(block.collection(*doc_reg));
                let new = match self
                    .tolerate_missing(core, self.collection.replace(&key, &body, wait))?
                {
                    Some(doc) => doc,
                    None => return Ok(None),
                };
                if self.out_reg.is_none() {
                    return Ok(None);
                }
                Ok(Some(if self.options.return_new_values {
                    new
                } else {
                    old.expect("read before replace")
                }))
            }
        }
    }
}

/// Compute the document key from a register value: documents and objects
/// yield their `_key`, strings are the key itself.
fn extract_key(value: &Value) -> AqlResult<String> {
    match value {
        Value::Shaped(doc) => Ok(doc.key.clone()),
        Value::Json(v) => match v.as_ref() {
            JsonValue::Object(map) => match map.get("_key") {
                Some(JsonValue::String(key)) => Ok(key.clone()),
                _ => Err(AqlError::DocumentKeyMissing),
            },
            JsonValue::String(key) => Ok(key.clone()),
            other => Err(AqlError::DocumentTypeInvalid {
                got: match other {
                    JsonValue::Null => "null",
                    JsonValue::Bool(_) => "bool",
                    JsonValue::Number(_) => "number",
                    JsonValue::Array(_) => "array",
                    _ => "object",
                }
                .into(),
            }),
        },
        other => Err(AqlError::DocumentTypeInvalid {
            got: other.type_name().into(),
        }),
    }
}

/// Resolve the `_from`/`_to` handles of an edge document body.
fn extract_edge(ctx: &QueryContext, body: &JsonValue) -> AqlResult<EdgeInfo> {
    let from = body
        .get("_from")
        .and_then(JsonValue::as_str)
        .ok_or(AqlError::DocumentHandleBad)?;
    let to = body
        .get("_to")
        .and_then(JsonValue::as_str)
        .ok_or(AqlError::DocumentHandleBad)?;
    let (from_cid, from_key) = resolve_handle(ctx, from)?;
    let (to_cid, to_key) = resolve_handle(ctx, to)?;
    Ok(EdgeInfo {
        from_cid,
        from_key,
        to_cid,
        to_key,
    })
}
