use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;

/// Liveness. Never cached by clients or by the gateway.
pub async fn health(State(state): State<AppState>) -> Response {
    let endpoints = state.pool.endpoints().await.len();
    let body = json!({
        "status": "ok",
        "endpoints": endpoints,
        "leased": state.pool.leased_count(),
    });

    let mut response = (StatusCode::OK, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
