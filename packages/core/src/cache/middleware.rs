//! Read-through response caching for the HTTP router.
//!
//! Applied with `axum::middleware::from_fn_with_state`. Only `GET`
//! requests to routes with a configured TTL are considered; everything
//! else passes straight through. Every cacheable request also appends a
//! history snapshot, whether it was a hit or a miss.
//!
//! Store failures are logged and swallowed. The caller always gets the
//! handler's response, cached or not.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body, HttpBody},
    extract::{Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::metrics::AppMetrics;

use super::history::{
    extract_fields, HistoryDomain, ROUTE_MINT_ANALYTICS, ROUTE_NETWORK_STATUS, ROUTE_PERFORMANCE,
    ROUTE_PUMP_TRENDING, ROUTE_RPC_NODES,
};
use super::store::CacheStore;

pub const X_CACHE: &str = "x-cache";

/// Largest response body the layer will buffer for caching.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Built-in per-route TTLs in seconds.
pub const DEFAULT_ROUTE_TTLS: &[(&str, u64)] = &[
    (ROUTE_NETWORK_STATUS, 30),
    (ROUTE_PERFORMANCE, 60),
    (ROUTE_RPC_NODES, 300),
    (ROUTE_MINT_ANALYTICS, 60),
    (ROUTE_PUMP_TRENDING, 30),
];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Route path to TTL in seconds. A route absent from the map is never cached.
    pub route_ttls: HashMap<String, u64>,
    pub retention_days: i64,
    /// Responses larger than this, or of unknown length, are passed through uncached.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            route_ttls: DEFAULT_ROUTE_TTLS
                .iter()
                .map(|(route, ttl)| (route.to_string(), *ttl))
                .collect(),
            retention_days: 7,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl CacheConfig {
    /// Merge `overrides` over the current table. A TTL of zero removes the route.
    pub fn with_overrides(mut self, overrides: HashMap<String, u64>) -> Self {
        for (route, ttl) in overrides {
            if ttl == 0 {
                self.route_ttls.remove(&route);
            } else {
                self.route_ttls.insert(route, ttl);
            }
        }
        self
    }

    pub fn ttl_for(&self, route: &str) -> Option<Duration> {
        self.route_ttls.get(route).map(|secs| Duration::from_secs(*secs))
    }
}

#[derive(Clone)]
pub struct CacheLayerState {
    pub store: Arc<CacheStore>,
    pub config: Arc<CacheConfig>,
    pub metrics: Option<Arc<AppMetrics>>,
}

impl CacheLayerState {
    pub fn new(store: Arc<CacheStore>, config: Arc<CacheConfig>) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn record_history(&self, route: &str, query: &BTreeMap<String, String>, payload: &str) {
        let Some(domain) = HistoryDomain::for_route(route) else {
            return;
        };

        let parsed = match serde_json::from_str::<Value>(payload) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(route, "history payload is not valid JSON: {}", err);
                Value::Null
            }
        };
        let fields = extract_fields(domain, query, &parsed);

        match self.store.record_history(&fields, payload).await {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.history_records_total.inc();
                }
            }
            Err(err) => tracing::warn!(route, "failed to record {} history: {}", domain, err),
        }
    }
}

pub async fn cache_middleware(
    State(state): State<CacheLayerState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let route = request.uri().path().to_string();
    let Some(ttl) = state.config.ttl_for(&route) else {
        return next.run(request).await;
    };

    let query: BTreeMap<String, String> = Query::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    let params = Value::Object(
        query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );

    match state.store.get(&route, &params, ttl).await {
        Ok(Some(payload)) => {
            tracing::debug!(route = %route, "cache hit");
            if let Some(metrics) = &state.metrics {
                metrics.cache_hits_total.inc();
            }
            state.record_history(&route, &query, &payload).await;
            return cached_response(payload);
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(route = %route, "cache lookup failed: {}", err),
    }

    if let Some(metrics) = &state.metrics {
        metrics.cache_misses_total.inc();
    }

    let response = next.run(request).await;
    if !response.status().is_success() || !is_json(&response) {
        return response;
    }

    let limit = state.config.max_body_bytes;
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= limit as u64);
    if !fits {
        tracing::debug!(route = %route, limit, "response too large to cache");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(route = %route, "failed to buffer response body: {}", err);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(payload) => {
            if let Err(err) = state.store.put(&route, payload, &params, ttl).await {
                tracing::warn!(route = %route, "failed to store cache entry: {}", err);
            }
            state.record_history(&route, &query, payload).await;
        }
        Err(err) => tracing::warn!(route = %route, "response body is not UTF-8: {}", err),
    }

    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

fn cached_response(payload: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                header::HeaderName::from_static(X_CACHE),
                HeaderValue::from_static("HIT"),
            ),
        ],
        payload,
    )
        .into_response()
}
