//! Cluster read endpoints backed by the connection pool.
//!
//! Responses are plain JSON so the cache layer can store them and extract
//! history fields (`status`, `max_tps`/`avg_tps`, `total_nodes`).

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;

use super::AppState;

const DEFAULT_SAMPLES: usize = 10;
/// Upper bound accepted by `getRecentPerformanceSamples`.
const MAX_SAMPLES: usize = 720;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpochInfo {
    epoch: u64,
    slot_index: u64,
    slots_in_epoch: u64,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerformanceSample {
    slot: u64,
    num_transactions: u64,
    sample_period_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ClusterNodeInfo {
    #[serde(default)]
    rpc: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NetworkStatus {
    pub status: String,
    pub slot: u64,
    pub epoch: u64,
    pub slot_index: u64,
    pub slots_in_epoch: u64,
    pub epoch_progress: f64,
    pub block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub samples: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NetworkPerformance {
    pub samples: usize,
    pub max_tps: f64,
    pub avg_tps: f64,
    pub latest_slot: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct NetworkNodes {
    pub total_nodes: usize,
    pub rpc_nodes: usize,
    pub versions: BTreeMap<String, usize>,
}

fn parse<T: for<'de> Deserialize<'de>>(method: &str, value: Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|err| AppError::Parse(format!("unexpected {} result: {}", method, err)))
}

/// `GET /network/status`
pub async fn network_status(State(state): State<AppState>) -> Result<Json<NetworkStatus>, AppError> {
    // An unhealthy answer is still a status; only slot and epoch are required.
    let status = match state.pool.call("getHealth", Value::Null).await {
        Ok(_) => "healthy".to_string(),
        Err(err) => {
            tracing::warn!("getHealth failed: {}", err);
            "degraded".to_string()
        }
    };

    let slot: u64 = parse("getSlot", state.pool.call("getSlot", Value::Null).await?)?;
    let epoch: EpochInfo = parse("getEpochInfo", state.pool.call("getEpochInfo", Value::Null).await?)?;

    let epoch_progress = if epoch.slots_in_epoch == 0 {
        0.0
    } else {
        epoch.slot_index as f64 / epoch.slots_in_epoch as f64
    };

    Ok(Json(NetworkStatus {
        status,
        slot,
        epoch: epoch.epoch,
        slot_index: epoch.slot_index,
        slots_in_epoch: epoch.slots_in_epoch,
        epoch_progress,
        block_height: epoch.block_height,
    }))
}

/// `GET /network/performance?samples=N`
pub async fn network_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<NetworkPerformance>, AppError> {
    let limit = query.samples.unwrap_or(DEFAULT_SAMPLES).clamp(1, MAX_SAMPLES);
    let raw = state
        .pool
        .call("getRecentPerformanceSamples", json!([limit]))
        .await?;
    let samples: Vec<PerformanceSample> = parse("getRecentPerformanceSamples", raw)?;

    Ok(Json(summarize_performance(&samples)))
}

fn summarize_performance(samples: &[PerformanceSample]) -> NetworkPerformance {
    let tps: Vec<f64> = samples
        .iter()
        .filter(|s| s.sample_period_secs > 0)
        .map(|s| s.num_transactions as f64 / s.sample_period_secs as f64)
        .collect();

    let max_tps = tps.iter().copied().fold(0.0, f64::max);
    let avg_tps = if tps.is_empty() {
        0.0
    } else {
        tps.iter().sum::<f64>() / tps.len() as f64
    };

    NetworkPerformance {
        samples: samples.len(),
        max_tps,
        avg_tps,
        latest_slot: samples.iter().map(|s| s.slot).max(),
    }
}

/// `GET /network/nodes`
pub async fn network_nodes(State(state): State<AppState>) -> Result<Json<NetworkNodes>, AppError> {
    let raw = state.pool.call("getClusterNodes", Value::Null).await?;
    let nodes: Vec<ClusterNodeInfo> = parse("getClusterNodes", raw)?;

    let mut versions = BTreeMap::new();
    for node in &nodes {
        let version = node.version.clone().unwrap_or_else(|| "unknown".to_string());
        *versions.entry(version).or_insert(0) += 1;
    }

    Ok(Json(NetworkNodes {
        total_nodes: nodes.len(),
        rpc_nodes: nodes.iter().filter(|n| n.rpc.is_some()).count(),
        versions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_summary_skips_empty_periods() {
        let samples = vec![
            PerformanceSample { slot: 10, num_transactions: 1200, sample_period_secs: 60 },
            PerformanceSample { slot: 12, num_transactions: 3000, sample_period_secs: 60 },
            PerformanceSample { slot: 11, num_transactions: 99, sample_period_secs: 0 },
        ];

        let summary = summarize_performance(&samples);
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.max_tps, 50.0);
        assert_eq!(summary.avg_tps, 35.0);
        assert_eq!(summary.latest_slot, Some(12));
    }

    #[test]
    fn empty_samples_report_zero() {
        let summary = summarize_performance(&[]);
        assert_eq!(summary.max_tps, 0.0);
        assert_eq!(summary.avg_tps, 0.0);
        assert_eq!(summary.latest_slot, None);
    }
}
