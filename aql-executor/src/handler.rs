//! Server-side dispatch of cluster-peer requests onto a local engine.
//!
//! The inverse of the Remote operator: a peer mounts the
//! `/_db/{vocbase}/_api/aql/{op}/{queryId}` endpoint, resolves the query id
//! to an [`ExecutionEngine`], and hands operation, optional `Shard-Id`
//! header and request body to [`handle_request`]. When a shard id is given
//! and the engine's root fans out to clients, the per-client entry points
//! are used.

use aql_errors::{AqlError, AqlResult};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::api::{
    ApiOperation, BatchRequest, CodeResponse, CountResponse, ErrorResponse, GetSomeResponse,
    HasMoreResponse, InitializeCursorRequest, RemainingResponse, ShutdownRequest,
    ShutdownResponse, SkipSomeResponse,
};
use crate::engine::ExecutionEngine;

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> AqlResult<T> {
    serde_json::from_str(body).map_err(|e| AqlError::ClusterCommunication {
        message: format!("malformed request body: {e}"),
    })
}

fn dispatch(
    engine: &mut ExecutionEngine,
    op: ApiOperation,
    shard: Option<&str>,
    body: &str,
) -> AqlResult<JsonValue> {
    let routed = shard.filter(|_| engine.root_mut().serves_clients());
    let response = match op {
        ApiOperation::InitializeCursor => {
            let request: InitializeCursorRequest = parse_body(body)?;
            match request.items {
                Some(items) => {
                    let block = items.into_block()?;
                    engine.initialize_cursor(Some(&block), request.pos.unwrap_or(0))?;
                }
                None => engine.initialize_cursor(None, 0)?,
            }
            serde_json::to_value(CodeResponse { code: 0 })
        }
        ApiOperation::GetSome => {
            let request: BatchRequest = parse_body(body)?;
            let block = match routed {
                Some(shard) => engine.root_mut().get_some_for_client(
                    request.at_least,
                    request.at_most,
                    shard,
                )?,
                None => engine.get_some(request.at_least, request.at_most)?,
            };
            serde_json::to_value(GetSomeResponse {
                exhausted: block.is_none(),
                error: false,
                block: block.as_ref().map(|b| b.to_serialized()),
                stats: engine.stats(),
            })
        }
        ApiOperation::SkipSome => {
            let request: BatchRequest = parse_body(body)?;
            let skipped = match routed {
                Some(shard) => engine.root_mut().skip_some_for_client(
                    request.at_least,
                    request.at_most,
                    shard,
                )?,
                None => engine.skip_some(request.at_least, request.at_most)?,
            };
            serde_json::to_value(SkipSomeResponse {
                skipped,
                error: false,
            })
        }
        ApiOperation::HasMore => {
            let has_more = match routed {
                Some(shard) => engine.root_mut().has_more_for_client(shard)?,
                None => engine.has_more()?,
            };
            serde_json::to_value(HasMoreResponse {
                has_more,
                error: false,
            })
        }
        ApiOperation::Count => {
            let count = engine.count()?;
            serde_json::to_value(CountResponse {
                count: count.map(|c| c as i64).unwrap_or(-1),
                error: false,
            })
        }
        ApiOperation::Remaining => {
            let remaining = match routed {
                Some(shard) => engine.root_mut().remaining_for_client(shard)?,
                None => engine.remaining()?,
            };
            serde_json::to_value(RemainingResponse {
                remaining: remaining.map(|r| r as i64).unwrap_or(-1),
                error: false,
            })
        }
        ApiOperation::Shutdown => {
            let request: ShutdownRequest = parse_body(body)?;
            engine.shutdown(request.code)?;
            let warnings = engine.warnings();
            serde_json::to_value(ShutdownResponse {
                code: 0,
                warnings: (!warnings.is_empty()).then_some(warnings),
            })
        }
    };
    response.map_err(|e| AqlError::Internal {
        message: format!("could not serialize {op} response: {e}"),
    })
}

/// Handle one cluster-peer request against a local engine, returning the
/// response body. Errors become the standard error body.
pub fn handle_request(
    engine: &mut ExecutionEngine,
    op: ApiOperation,
    shard: Option<&str>,
    body: &str,
) -> String {
    debug!(%op, ?shard, "handling cluster request");
    match dispatch(engine, op, shard, body) {
        Ok(response) => response.to_string(),
        Err(error) => serde_json::json!(ErrorResponse {
            error: true,
            error_num: error.code(),
            error_message: error.to_string(),
        })
        .to_string(),
    }
}
