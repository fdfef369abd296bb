//! The RPC proxy standing in for the remainder of the plan on a peer.

use std::sync::Arc;
use std::time::Duration;

use aql_data::ItemBlock;
use aql_errors::{internal_err, AqlError, AqlResult};
use aql_storage::ShardId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::Core;
use crate::api::{
    ApiOperation, BatchRequest, CodeResponse, CountResponse, GetSomeResponse, HasMoreResponse,
    InitializeCursorRequest, RemainingResponse, ShutdownRequest, ShutdownResponse,
    SkipSomeResponse,
};
use crate::stats::StatsSnapshot;
use crate::transport::{HttpMethod, RemoteTransport};

/// Default deadline for cluster-peer requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Forwards every cursor operation as one blocking request to the peer
/// that runs the remainder of the plan. Statistics arrive as snapshots;
/// only the delta since the previous response is folded into the local
/// counters.
pub struct RemoteState {
    server: String,
    vocbase: String,
    query_id: String,
    own_shard: Option<ShardId>,
    transport: Arc<dyn RemoteTransport>,
    delta: StatsSnapshot,
}

impl RemoteState {
    pub(crate) fn new(
        server: String,
        vocbase: String,
        query_id: String,
        own_shard: Option<ShardId>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            server,
            vocbase,
            query_id,
            own_shard,
            transport,
            delta: StatsSnapshot::default(),
        }
    }

    fn send(&self, op: ApiOperation, body: String) -> AqlResult<JsonValue> {
        let vocbase: String =
            url::form_urlencoded::byte_serialize(self.vocbase.as_bytes()).collect();
        let path = format!("/_db/{}/_api/aql/{}/{}", vocbase, op.path(), self.query_id);
        let method = if op.is_put() {
            HttpMethod::Put
        } else {
            HttpMethod::Get
        };
        let text = self.transport.request(
            method,
            &self.server,
            &path,
            self.own_shard.as_deref(),
            body,
            DEFAULT_TIMEOUT,
        )?;
        let json: JsonValue = serde_json::from_str(&text).map_err(|_| {
            AqlError::ClusterCommunication {
                message: format!("peer {} answered {op} with a non-JSON body", self.server),
            }
        })?;

        if json.get("error").and_then(JsonValue::as_bool) == Some(true) {
            let message = json
                .get("errorMessage")
                .and_then(JsonValue::as_str)
                .unwrap_or("(no valid error in response)")
                .to_string();
            let error = match json.get("errorNum").and_then(JsonValue::as_i64) {
                Some(num) => AqlError::from_code(num as i32, message),
                None => AqlError::ClusterCommunication { message },
            };
            return Err(error);
        }
        Ok(json)
    }

    fn send_typed<B: Serialize, R: DeserializeOwned>(
        &self,
        op: ApiOperation,
        body: &B,
    ) -> AqlResult<R> {
        let body = serde_json::to_string(body)
            .map_err(|e| internal_err!("could not serialize {op} request: {e}"))?;
        let response = self.send(op, body)?;
        serde_json::from_value(response).map_err(|e| AqlError::ClusterCommunication {
            message: format!("malformed {op} response: {e}"),
        })
    }

    pub(crate) fn initialize_cursor(
        &mut self,
        _core: &mut Core,
        items: Option<&ItemBlock>,
        pos: usize,
    ) -> AqlResult<()> {
        let request = match items {
            None => InitializeCursorRequest {
                exhausted: true,
                error: false,
                pos: None,
                items: None,
            },
            Some(block) => InitializeCursorRequest {
                exhausted: false,
                error: false,
                pos: Some(pos),
                items: Some(block.to_serialized()),
            },
        };
        let response: CodeResponse = self.send_typed(ApiOperation::InitializeCursor, &request)?;
        if response.code != 0 {
            return Err(AqlError::from_code(response.code, String::new()));
        }
        Ok(())
    }

    pub(crate) fn shutdown(&mut self, core: &mut Core, code: i32) -> AqlResult<()> {
        let body = serde_json::to_string(&ShutdownRequest { code })
            .map_err(|e| internal_err!("could not serialize shutdown request: {e}"))?;
        let response = match self.send(ApiOperation::Shutdown, body) {
            Ok(response) => response,
            // the peer may already have torn the query down
            Err(AqlError::QueryNotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        let parsed: ShutdownResponse =
            serde_json::from_value(response).map_err(|e| AqlError::ClusterCommunication {
                message: format!("malformed shutdown response: {e}"),
            })?;
        if let Some(warnings) = parsed.warnings {
            for warning in warnings {
                core.ctx.register_warning(warning.code, warning.message);
            }
        }
        if parsed.code != 0 {
            return Err(AqlError::from_code(parsed.code, String::new()));
        }
        Ok(())
    }

    pub(crate) fn get_some(
        &mut self,
        core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<Option<ItemBlock>> {
        let response: GetSomeResponse = self.send_typed(
            ApiOperation::GetSome,
            &BatchRequest { at_least, at_most },
        )?;

        core.ctx.stats.add_delta(&self.delta, &response.stats);
        self.delta = response.stats;

        if response.exhausted {
            return Ok(None);
        }
        let block = response.block.ok_or_else(|| AqlError::ClusterCommunication {
            message: "getSome response carried neither a block nor `exhausted`".into(),
        })?;
        Ok(Some(block.into_block()?))
    }

    pub(crate) fn skip_some(
        &mut self,
        _core: &mut Core,
        at_least: usize,
        at_most: usize,
    ) -> AqlResult<usize> {
        let response: SkipSomeResponse = self.send_typed(
            ApiOperation::SkipSome,
            &BatchRequest { at_least, at_most },
        )?;
        Ok(response.skipped)
    }

    pub(crate) fn has_more(&mut self, _core: &mut Core) -> AqlResult<bool> {
        let response: HasMoreResponse =
            self.send_typed(ApiOperation::HasMore, &JsonValue::Null)?;
        Ok(response.has_more)
    }

    pub(crate) fn count(&self, _core: &Core) -> AqlResult<Option<usize>> {
        let response: CountResponse = self.send_typed(ApiOperation::Count, &JsonValue::Null)?;
        Ok(usize::try_from(response.count).ok())
    }

    pub(crate) fn remaining(&mut self, _core: &mut Core) -> AqlResult<Option<usize>> {
        let response: RemainingResponse =
            self.send_typed(ApiOperation::Remaining, &JsonValue::Null)?;
        Ok(usize::try_from(response.remaining).ok())
    }
}
