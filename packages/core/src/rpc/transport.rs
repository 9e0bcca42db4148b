use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

/// Sends one JSON-RPC call to one endpoint.
///
/// The pool only talks to upstream nodes through this trait so tests can
/// substitute scripted transports.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC over HTTP(S) using a shared `reqwest` client.
pub struct HttpTransport {
    http: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new() -> Result<Self, RpcError> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("solana-rpc-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RpcError::Configuration(format!("HTTP client build failed: {}", err)))?;

        Ok(Self {
            http,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Value::from(self.next_id.fetch_add(1, Ordering::Relaxed)),
            method: method.to_string(),
            params: params.clone(),
        };

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Network(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::from_http_status(response.status().as_u16()));
        }

        let body = response.json::<JsonRpcResponse>().await.map_err(|err| {
            if err.is_timeout() {
                RpcError::Timeout
            } else {
                RpcError::Serialization(err.to_string())
            }
        })?;

        if let Some(error) = body.error {
            return Err(RpcError::from_rpc_error(error.code, &error.message));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn returns_result_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getSlot" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": 12345 })),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let result = transport
            .send(&server.uri(), "getSlot", &Value::Null, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(result, json!(12345));
    }

    #[tokio::test]
    async fn rpc_error_object_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32005, "message": "Too many requests" }
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .send(&server.uri(), "getSlot", &Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::RateLimitExceeded);
    }

    #[tokio::test]
    async fn http_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .send(&server.uri(), "getSlot", &Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::RateLimitExceeded);
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "ok" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .send(&server.uri(), "getHealth", &Value::Null, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::Timeout);
    }

    #[test]
    fn null_params_are_omitted_from_request() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(1),
            method: "getHealth".into(),
            params: Value::Null,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert!(encoded.get("params").is_none());
    }
}
