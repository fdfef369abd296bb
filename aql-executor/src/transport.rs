//! The transport the Remote operator sends requests over.

use std::time::Duration;

use aql_errors::{AqlError, AqlResult};
use url::Url;

/// HTTP method of a cluster-peer request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    /// Observation requests.
    Get,
    /// State-changing requests.
    Put,
}

/// A synchronous request/response channel to cluster peers.
///
/// The engine thread blocks for the duration of a request; no other
/// operator of the same query runs in the meantime. Implementations map
/// transport-level failures to [`AqlError::ClusterTimeout`] or
/// [`AqlError::ClusterConnectionLost`] and hand every received body back
/// verbatim, including error bodies, which the caller inspects.
pub trait RemoteTransport: Send + Sync {
    /// Send one request and return the raw response body.
    fn request(
        &self,
        method: HttpMethod,
        server: &str,
        path: &str,
        shard_id: Option<&str>,
        body: String,
        timeout: Duration,
    ) -> AqlResult<String>;
}

/// The production transport: blocking HTTP via `reqwest`.
#[derive(Debug, Default)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteTransport for HttpTransport {
    fn request(
        &self,
        method: HttpMethod,
        server: &str,
        path: &str,
        shard_id: Option<&str>,
        body: String,
        timeout: Duration,
    ) -> AqlResult<String> {
        let url = Url::parse(server)
            .and_then(|u| u.join(path))
            .map_err(|e| AqlError::ClusterCommunication {
                message: format!("invalid peer url {server}{path}: {e}"),
            })?;
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Put => self.client.put(url).body(body),
        }
        .timeout(timeout);
        if let Some(shard) = shard_id {
            request = request.header("Shard-Id", shard);
        }
        tracing::debug!(%server, %path, ?shard_id, "sending cluster request");
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                AqlError::ClusterTimeout {
                    message: format!("request to {server}{path} timed out"),
                }
            } else {
                AqlError::ClusterConnectionLost {
                    message: format!("request to {server}{path} failed: {e}"),
                }
            }
        })?;
        response.text().map_err(|e| AqlError::ClusterConnectionLost {
            message: format!("reading response from {server}{path} failed: {e}"),
        })
    }
}
