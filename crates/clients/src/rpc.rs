//! Minimal JSON-RPC 2.0 client over HTTP.
//!
//! Every call is a `POST` of `{"jsonrpc": "2.0", "method", "params", "id"}`
//! to a single endpoint. A response carries either `result` or an `error`
//! object; remote faults keep their free-text message so each adapter can
//! classify them in its own translation function.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use provisioner_pipeline::collaborators::CollaboratorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for JSON-RPC calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("RPC endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The remote side raised a fault.
    #[error("RPC fault {code}: {message}")]
    Fault { code: i64, message: String },

    /// The response was not a JSON-RPC envelope or had the wrong shape.
    #[error("Malformed RPC response: {0}")]
    Protocol(String),
}

impl From<RpcError> for CollaboratorError {
    /// Classification shared by every RPC adapter for failures that carry no
    /// remote fault text. Adapters inspect `Fault` messages themselves and
    /// fall back to this conversion.
    fn from(err: RpcError) -> Self {
        match &err {
            RpcError::Request(e) if e.is_timeout() => CollaboratorError::Timeout(err.to_string()),
            RpcError::Request(_) => CollaboratorError::Unavailable(err.to_string()),
            RpcError::HttpStatus { status, .. } if matches!(status, 401 | 403) => {
                CollaboratorError::Unauthorized(err.to_string())
            }
            RpcError::HttpStatus { status, .. } if *status >= 500 => {
                CollaboratorError::Unavailable(err.to_string())
            }
            RpcError::HttpStatus { .. } | RpcError::Fault { .. } | RpcError::Protocol(_) => {
                CollaboratorError::Rejected(err.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Fault>,
}

#[derive(Debug, Deserialize)]
struct Fault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl Fault {
    /// The detailed message when the server provides one in `data`.
    fn into_error(self) -> RpcError {
        let detail = self
            .data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        RpcError::Fault {
            code: self.code,
            message: detail.unwrap_or(self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// JsonRpcClient
// ---------------------------------------------------------------------------

/// JSON-RPC client bound to one endpoint URL.
pub struct JsonRpcClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client for `endpoint`; every request is bounded by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, endpoint, timeout))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, endpoint: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke `method` and return the raw `result` value.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = Request {
            jsonrpc: "2.0",
            method,
            params: &params,
            id,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Response = response
            .json()
            .await
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        tracing::debug!(endpoint = %self.endpoint, method, id, "RPC call completed");

        match (envelope.error, envelope.result) {
            (Some(fault), _) => Err(fault.into_error()),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    /// Invoke `method` and decode its `result` into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    /// Dispatch to a named service: `call({"service", "method", "args"})`.
    ///
    /// The back-office servers expose every service through this single
    /// RPC method.
    pub async fn service<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<T, RpcError> {
        self.call_as(
            "call",
            serde_json::json!({ "service": service, "method": method, "args": args }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
