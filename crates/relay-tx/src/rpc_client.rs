//! Minimal JSON-RPC 2.0 client over HTTP.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use relay_types::{RelayError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Call `method` and decode its `result`.
    ///
    /// A JSON-RPC error object becomes `RelayError::Rpc`; a `null` result
    /// decodes only into an `Option`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self.client
            .post(&self.url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelayError::Other(format!("rpc request {} failed: {}", method, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Other(format!(
                "rpc {} returned status {}: {}",
                method, status, body
            )));
        }

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Decode(format!("failed to parse rpc response: {}", e)))?;

        decode_response(method, body)
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, body: RpcResponse) -> Result<T> {
    if let Some(err) = body.error {
        return Err(RelayError::Rpc { code: err.code, message: err.message });
    }
    serde_json::from_value(body.result)
        .map_err(|e| RelayError::Decode(format!("unexpected {} result: {}", method, e)))
}
