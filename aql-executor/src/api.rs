//! Request and response bodies of the cluster-peer API.
//!
//! One HTTP endpoint per operation under
//! `/_db/{vocbase}/_api/aql/{operation}/{queryId}`; PUT for state-changing
//! operations, GET for observations. The bodies below are the exact shapes
//! both the Remote operator (client side) and [`crate::handler`] (server
//! side) speak.

use std::fmt;
use std::str::FromStr;

use aql_data::SerializedBlock;
use serde::{Deserialize, Serialize};

use crate::stats::{StatsSnapshot, Warning};

/// The operations of the cluster-peer API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiOperation {
    /// Reset the peer plan's cursor for a new input row.
    InitializeCursor,
    /// Pull a batch.
    GetSome,
    /// Skip a batch.
    SkipSome,
    /// Ask whether another batch could be produced.
    HasMore,
    /// Ask for the total row count, if known.
    Count,
    /// Ask for the remaining row count, if known.
    Remaining,
    /// Tear the peer query down.
    Shutdown,
}

impl ApiOperation {
    /// The path segment of this operation.
    pub fn path(&self) -> &'static str {
        match self {
            ApiOperation::InitializeCursor => "initializeCursor",
            ApiOperation::GetSome => "getSome",
            ApiOperation::SkipSome => "skipSome",
            ApiOperation::HasMore => "hasMore",
            ApiOperation::Count => "count",
            ApiOperation::Remaining => "remaining",
            ApiOperation::Shutdown => "shutdown",
        }
    }

    /// Whether the operation is carried by a PUT (it changes state) rather
    /// than a GET.
    pub fn is_put(&self) -> bool {
        matches!(
            self,
            ApiOperation::InitializeCursor
                | ApiOperation::GetSome
                | ApiOperation::SkipSome
                | ApiOperation::Shutdown
        )
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ApiOperation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initializeCursor" => ApiOperation::InitializeCursor,
            "getSome" => ApiOperation::GetSome,
            "skipSome" => ApiOperation::SkipSome,
            "hasMore" => ApiOperation::HasMore,
            "count" => ApiOperation::Count,
            "remaining" => ApiOperation::Remaining,
            "shutdown" => ApiOperation::Shutdown,
            _ => return Err(()),
        })
    }
}

/// Body of an `initializeCursor` PUT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeCursorRequest {
    /// True when there is no input row (first call on the leaf plan).
    pub exhausted: bool,
    /// Always false in requests.
    pub error: bool,
    /// Row within `items` the cursor starts at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<usize>,
    /// The serialized input block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<SerializedBlock>,
}

/// Response carrying only a result code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeResponse {
    /// 0 on success, an error code otherwise.
    pub code: i32,
}

/// Body of a `getSome` or `skipSome` PUT.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Lower batch bound.
    pub at_least: usize,
    /// Upper batch bound.
    pub at_most: usize,
}

/// Response to `getSome`: either `exhausted`, or a serialized block
/// (flattened into the object), always with a statistics snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetSomeResponse {
    /// True when the peer produced no block.
    pub exhausted: bool,
    /// Always false on success.
    pub error: bool,
    /// The block, flattened; absent when exhausted.
    #[serde(flatten)]
    pub block: Option<SerializedBlock>,
    /// The peer's current counters; the caller applies the delta.
    pub stats: StatsSnapshot,
}

/// Response to `skipSome`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SkipSomeResponse {
    /// Rows skipped.
    pub skipped: usize,
    /// Always false on success.
    pub error: bool,
}

/// Response to `hasMore`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasMoreResponse {
    /// Whether another `getSome` could produce a row.
    pub has_more: bool,
    /// Always false on success.
    pub error: bool,
}

/// Response to `count`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CountResponse {
    /// Total row count, -1 when unknown.
    pub count: i64,
    /// Always false on success.
    pub error: bool,
}

/// Response to `remaining`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RemainingResponse {
    /// Remaining row count, -1 when unknown.
    pub remaining: i64,
    /// Always false on success.
    pub error: bool,
}

/// Body of a `shutdown` PUT.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShutdownRequest {
    /// The error code execution finished with, 0 for success.
    pub code: i32,
}

/// Response to `shutdown`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShutdownResponse {
    /// 0 on success.
    pub code: i32,
    /// Warnings accumulated by the peer query, folded into the caller's
    /// warning list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<Warning>>,
}

/// The error body any operation may answer with.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always true.
    pub error: bool,
    /// Numeric error code.
    pub error_num: i32,
    /// Human-readable message.
    pub error_message: String,
}
