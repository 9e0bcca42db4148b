use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::rpc::RpcError;

/// Unified application error.
///
/// Used by the binary and the HTTP handlers so every layer fails in a
/// predictable way.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Database error: {0}")]
    Database(#[from] CacheError),
    #[error("Upstream error: {0}")]
    Upstream(#[from] RpcError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(CacheError::Database(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Upstream(err) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": err.to_string(), "kind": err.kind() }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            other => {
                tracing::error!("{}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": other.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn exhausted_retries_report_the_last_classification() {
        let err = AppError::Upstream(RpcError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RpcError::Timeout),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = body_json(response).await;
        assert_eq!(body["kind"], RpcError::Timeout.kind());
    }

    #[tokio::test]
    async fn bad_request_maps_to_400() {
        let response = AppError::BadRequest("unknown domain".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "unknown domain");
    }

    #[test]
    fn config_error_display_keeps_prefix() {
        assert_eq!(
            AppError::Config("RPC_ENDPOINTS is required".into()).to_string(),
            "Config error: RPC_ENDPOINTS is required"
        );
    }
}
