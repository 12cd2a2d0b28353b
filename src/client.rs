//! HTTP client adapter
//!
//! Wraps a reqwest HTTP client behind the open/invoke/close capability set.
//! Every transport-level failure is caught here and converted into a tagged
//! outcome; nothing error-shaped crosses the adapter boundary to the workers.
//!
//! Classification follows idempotence, not a blanket rule: an error on a
//! request that provably never reached the server is a definite failure for
//! any operation, while a timeout or broken response on a write or cas is
//! ambiguous — the mutation may have applied.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::cluster::NodeAddr;
use crate::history::{OpKind, OpResult};

/// Transport-level errors, internal to the adapter
#[derive(Debug, Error)]
enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Did the request provably never reach the server?
    fn provably_inert(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }

    /// Worth another attempt against the same node
    fn retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Status(503)
        )
    }
}

/// Final outcome of a single invoke, as seen by the executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Definite answer from the service
    Ok(OpResult),
    /// The operation provably never took effect
    Fail(String),
    /// The operation may or may not have taken effect
    Ambiguous(String),
}

/// Bounded retry with fixed backoff; exhaustion yields a deterministic
/// Fail or Ambiguous outcome
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Per-process connection, bound to one node at worker start and threaded
/// explicitly through every invoke
pub struct Connection {
    node: NodeAddr,
    http: reqwest::Client,
}

impl Connection {
    /// Node this connection is bound to
    pub fn node(&self) -> &NodeAddr {
        &self.node
    }
}

/// Response body for `["read", key]`
#[derive(Debug, Deserialize)]
struct ReadResponse {
    value: Option<String>,
}

/// Response body for `["write", key, value]`
#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[allow(dead_code)]
    ack: bool,
}

/// Response body for `["cas", key, old, new]`
#[derive(Debug, Deserialize)]
struct CasResponse {
    applied: bool,
}

/// Consensus metadata optionally carried in response headers; informational
/// only, never required for correctness
#[derive(Debug, Default)]
struct ConsensusMeta {
    leader: Option<String>,
    term: Option<u64>,
    index: Option<u64>,
}

impl ConsensusMeta {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        ConsensusMeta {
            leader: text("x-consensus-leader"),
            term: text("x-consensus-term").and_then(|s| s.parse().ok()),
            index: text("x-consensus-index").and_then(|s| s.parse().ok()),
        }
    }
}

/// Client adapter for the single-register service
pub struct ClientAdapter {
    /// Name of the register cell
    key: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    retry: RetryPolicy,
}

/// Failure to construct a connection; fatal to the run
#[derive(Debug, Error)]
#[error("failed to open connection to {node}: {reason}")]
pub struct OpenError {
    pub node: String,
    pub reason: String,
}

impl ClientAdapter {
    pub fn new(key: &str, request_timeout: Duration, retry: RetryPolicy) -> Self {
        ClientAdapter {
            key: key.to_string(),
            connect_timeout: Duration::from_millis(500),
            request_timeout,
            retry,
        }
    }

    /// Open a connection bound to one node
    pub fn open(&self, node: &NodeAddr) -> Result<Connection, OpenError> {
        let http = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| OpenError {
                node: node.0.clone(),
                reason: e.to_string(),
            })?;

        Ok(Connection {
            node: node.clone(),
            http,
        })
    }

    /// Release a connection at worker shutdown
    pub fn close(&self, conn: Connection) {
        drop(conn);
    }

    /// Perform one operation against the connection's node.
    ///
    /// Retries retryable transport failures up to the configured attempt
    /// budget, then classifies the final error per the idempotence rule.
    pub async fn invoke(&self, conn: &Connection, kind: &OpKind) -> Outcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send(conn, kind).await {
                Ok(result) => return Outcome::Ok(result),
                Err(err) => {
                    if err.retryable() && attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                        continue;
                    }
                    return Self::classify(kind, &err);
                }
            }
        }
    }

    /// Map a terminal transport error to Fail or Ambiguous.
    ///
    /// Reads are idempotent and effect-free, so any failure is definite.
    /// Writes and cas are only definite failures when the request provably
    /// never reached the server.
    fn classify(kind: &OpKind, err: &TransportError) -> Outcome {
        match kind {
            OpKind::Read => Outcome::Fail(err.to_string()),
            OpKind::Write { .. } | OpKind::Cas { .. } => {
                if err.provably_inert() {
                    Outcome::Fail(err.to_string())
                } else {
                    Outcome::Ambiguous(err.to_string())
                }
            }
        }
    }

    /// One request/response round trip. The body is the ordered list
    /// encoding of the operation; the response is a JSON body plus optional
    /// consensus metadata headers.
    async fn send(&self, conn: &Connection, kind: &OpKind) -> Result<OpResult, TransportError> {
        let url = format!("http://{}/register", conn.node.0);
        let body = match kind {
            OpKind::Read => serde_json::json!(["read", self.key]),
            OpKind::Write { value } => serde_json::json!(["write", self.key, value]),
            OpKind::Cas { old, new } => serde_json::json!(["cas", self.key, old, new]),
        };

        let response = conn
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Send(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let meta = ConsensusMeta::from_headers(response.headers());
        if meta.leader.is_some() || meta.term.is_some() || meta.index.is_some() {
            debug!(
                node = %conn.node.0,
                leader = ?meta.leader,
                term = ?meta.term,
                index = ?meta.index,
                "consensus metadata"
            );
        }

        match kind {
            OpKind::Read => {
                let resp: ReadResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(OpResult::ReadOk(resp.value))
            }
            OpKind::Write { .. } => {
                let _resp: WriteResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(OpResult::WriteOk)
            }
            OpKind::Cas { .. } => {
                let resp: CasResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(OpResult::CasOk(resp.applied))
            }
        }
    }
}
