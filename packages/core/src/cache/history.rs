//! History domains and their summary fields.
//!
//! Every tracked route appends an immutable snapshot to its domain's table
//! on each request, hit or miss. Each domain keeps a few small, indexable
//! summary fields next to the full payload. Extraction is lenient: an
//! unexpected payload shape falls back to defaults rather than failing the
//! request.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::error::CacheError;

pub const ROUTE_NETWORK_STATUS: &str = "/network/status";
pub const ROUTE_MINT_ANALYTICS: &str = "/mints/analytics";
pub const ROUTE_PUMP_TRENDING: &str = "/pump/trending";
pub const ROUTE_RPC_NODES: &str = "/network/nodes";
pub const ROUTE_PERFORMANCE: &str = "/network/performance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryDomain {
    NetworkStatus,
    MintAnalytics,
    PumpTrending,
    RpcNodes,
    Performance,
}

impl HistoryDomain {
    pub const ALL: [HistoryDomain; 5] = [
        HistoryDomain::NetworkStatus,
        HistoryDomain::MintAnalytics,
        HistoryDomain::PumpTrending,
        HistoryDomain::RpcNodes,
        HistoryDomain::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkStatus => "network_status",
            Self::MintAnalytics => "mint_analytics",
            Self::PumpTrending => "pump_trending",
            Self::RpcNodes => "rpc_nodes",
            Self::Performance => "performance",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::NetworkStatus => "network_status_history",
            Self::MintAnalytics => "mint_analytics_history",
            Self::PumpTrending => "pump_trending_history",
            Self::RpcNodes => "rpc_nodes_history",
            Self::Performance => "performance_history",
        }
    }

    /// The domain a cacheable route records into, if any.
    pub fn for_route(route: &str) -> Option<Self> {
        match route {
            ROUTE_NETWORK_STATUS => Some(Self::NetworkStatus),
            ROUTE_MINT_ANALYTICS => Some(Self::MintAnalytics),
            ROUTE_PUMP_TRENDING => Some(Self::PumpTrending),
            ROUTE_RPC_NODES => Some(Self::RpcNodes),
            ROUTE_PERFORMANCE => Some(Self::Performance),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryDomain {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| CacheError::UnknownDomain(s.to_string()))
    }
}

/// Domain-specific summary columns of one history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistoryFields {
    NetworkStatus {
        status: String,
    },
    MintAnalytics {
        blocks_param: i64,
        new_mints_count: i64,
        pump_tokens_count: i64,
    },
    PumpTrending {
        timeframe: String,
        sort_metric: String,
        tokens_count: i64,
    },
    RpcNodes {
        total_nodes: i64,
    },
    Performance {
        max_tps: f64,
        avg_tps: f64,
    },
}

impl HistoryFields {
    pub fn domain(&self) -> HistoryDomain {
        match self {
            Self::NetworkStatus { .. } => HistoryDomain::NetworkStatus,
            Self::MintAnalytics { .. } => HistoryDomain::MintAnalytics,
            Self::PumpTrending { .. } => HistoryDomain::PumpTrending,
            Self::RpcNodes { .. } => HistoryDomain::RpcNodes,
            Self::Performance { .. } => HistoryDomain::Performance,
        }
    }
}

/// One stored history row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub domain: HistoryDomain,
    #[serde(flatten)]
    pub fields: HistoryFields,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// Pull the summary fields for `domain` out of a response payload and the
/// request's query parameters.
pub fn extract_fields(
    domain: HistoryDomain,
    query: &BTreeMap<String, String>,
    payload: &Value,
) -> HistoryFields {
    match domain {
        HistoryDomain::NetworkStatus => HistoryFields::NetworkStatus {
            status: str_field(payload, "status").unwrap_or_else(|| "unknown".to_string()),
        },
        HistoryDomain::MintAnalytics => HistoryFields::MintAnalytics {
            blocks_param: query
                .get("blocks")
                .and_then(|b| b.parse().ok())
                .or_else(|| payload.get("blocks_analyzed").and_then(Value::as_i64))
                .unwrap_or(0),
            new_mints_count: count_field(payload, "new_mints", "new_mints_count"),
            pump_tokens_count: count_field(payload, "pump_tokens", "pump_tokens_count"),
        },
        HistoryDomain::PumpTrending => HistoryFields::PumpTrending {
            timeframe: query
                .get("timeframe")
                .cloned()
                .or_else(|| str_field(payload, "timeframe"))
                .unwrap_or_else(|| "24h".to_string()),
            sort_metric: query
                .get("sort_by")
                .cloned()
                .or_else(|| str_field(payload, "sort_by"))
                .unwrap_or_else(|| "volume".to_string()),
            tokens_count: count_field(payload, "tokens", "tokens_count"),
        },
        HistoryDomain::RpcNodes => HistoryFields::RpcNodes {
            total_nodes: count_field(payload, "nodes", "total_nodes"),
        },
        HistoryDomain::Performance => HistoryFields::Performance {
            max_tps: payload.get("max_tps").and_then(Value::as_f64).unwrap_or(0.0),
            avg_tps: payload.get("avg_tps").and_then(Value::as_f64).unwrap_or(0.0),
        },
    }
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// An explicit count field wins; otherwise the length of the array under
/// `array_key`; otherwise zero.
fn count_field(payload: &Value, array_key: &str, count_key: &str) -> i64 {
    if let Some(count) = payload.get(count_key).and_then(Value::as_i64) {
        return count;
    }
    match payload.get(array_key) {
        Some(Value::Array(items)) => items.len() as i64,
        Some(other) => {
            tracing::debug!("expected array under `{}`, found {}", array_key, other);
            0
        }
        None => 0,
    }
}
