//! Operational endpoints: pool, limiter and cache statistics, history
//! queries, and the raw JSON-RPC passthrough.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::{HistoryDomain, HistoryRecord, StoreStats};
use crate::error::AppError;
use crate::rpc::{PoolStats, RateLimiterStats};

use super::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const DEFAULT_HISTORY_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub domain: HistoryDomain,
    pub count: usize,
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `GET /pool/stats`
pub async fn pool_stats(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats().await)
}

/// `GET /rate-limiter/stats`
pub async fn rate_limiter_stats(State(state): State<AppState>) -> Json<RateLimiterStats> {
    Json(state.pool.rate_limiter().stats().await)
}

/// `GET /cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    Ok(Json(state.cache.export_stats().await?))
}

/// `GET /history/:domain?limit=&hours=`
pub async fn history(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let domain: HistoryDomain = domain
        .parse()
        .map_err(|err: crate::cache::CacheError| AppError::BadRequest(err.to_string()))?;

    let records = state
        .cache
        .query_history(
            domain,
            query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            query.hours.unwrap_or(DEFAULT_HISTORY_HOURS),
        )
        .await?;

    Ok(Json(HistoryResponse {
        domain,
        count: records.len(),
        records,
    }))
}

/// `POST /rpc`. Forwards one JSON-RPC call through the pool. Never cached.
pub async fn rpc_passthrough(
    State(state): State<AppState>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<Value>, AppError> {
    if request.method.trim().is_empty() {
        return Err(AppError::BadRequest("method must not be empty".to_string()));
    }

    let result = state.pool.call(&request.method, request.params).await?;

    Ok(Json(json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "result": result,
    })))
}
