//! HTTP surface of the gateway.
//!
//! Routes:
//! - `GET  /health`               liveness plus pool size
//! - `GET  /metrics`              Prometheus text format
//! - `GET  /pool/stats`           ranked endpoints and lease counts
//! - `GET  /rate-limiter/stats`   token bucket snapshot
//! - `GET  /cache/stats`          cache and history row counts
//! - `GET  /history/:domain`      history snapshots, newest first
//! - `POST /rpc`                  JSON-RPC passthrough via the pool
//! - `GET  /network/status`       cached
//! - `GET  /network/performance`  cached
//! - `GET  /network/nodes`        cached

pub mod admin;
pub mod health;
pub mod network;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;

use crate::cache::history::{ROUTE_NETWORK_STATUS, ROUTE_PERFORMANCE, ROUTE_RPC_NODES};
use crate::cache::{cache_middleware, CacheConfig, CacheLayerState, CacheStore};
use crate::metrics::AppMetrics;
use crate::rpc::ConnectionPool;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub cache: Arc<CacheStore>,
    pub metrics: Arc<AppMetrics>,
}

/// Assemble the full router. The cache layer wraps every route; it only
/// acts on `GET` requests to routes present in `cache_config`.
pub fn create_router(state: AppState, cache_config: Arc<CacheConfig>) -> Router {
    let cache_layer = CacheLayerState::new(Arc::clone(&state.cache), cache_config)
        .with_metrics(Arc::clone(&state.metrics));
    let metrics = Arc::clone(&state.metrics);

    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(render_metrics))
        .route("/pool/stats", get(admin::pool_stats))
        .route("/rate-limiter/stats", get(admin::rate_limiter_stats))
        .route("/cache/stats", get(admin::cache_stats))
        .route("/history/:domain", get(admin::history))
        .route("/rpc", post(admin::rpc_passthrough))
        .route(ROUTE_NETWORK_STATUS, get(network::network_status))
        .route(ROUTE_PERFORMANCE, get(network::network_performance))
        .route(ROUTE_RPC_NODES, get(network::network_nodes))
        .route_layer(middleware::from_fn_with_state(metrics, track_http))
        .layer(middleware::from_fn_with_state(cache_layer, cache_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            Body::from(body),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

/// Count and time every matched request, labelled by route template.
async fn track_http(State(metrics): State<Arc<AppMetrics>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());

    response
}
