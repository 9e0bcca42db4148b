//! Error types for upstream RPC calls

use thiserror::Error;

/// JSON-RPC code used by Solana nodes (and most providers) for "too many requests".
pub const CODE_RATE_LIMITED: i64 = -32005;
/// Node is behind the cluster tip.
pub const CODE_NODE_BEHIND: i64 = -32004;
/// Minimum context slot not reached.
pub const CODE_MIN_CONTEXT_SLOT: i64 = -32016;
/// Generic internal error, treated as an unhealthy node.
pub const CODE_INTERNAL: i64 = -32603;

/// Errors from calling an upstream RPC node through the pool
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Node unhealthy: {0}")]
    NodeUnhealthy(String),

    #[error("Node behind: {0}")]
    NodeBehind(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No available endpoints")]
    NoAvailableEndpoints,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<RpcError> },
}

impl RpcError {
    /// `true` when the call may succeed on a different endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimitExceeded
                | Self::NodeUnhealthy(_)
                | Self::NodeBehind(_)
                | Self::Network(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimitExceeded => "rate_limited",
            Self::NodeUnhealthy(_) => "node_unhealthy",
            Self::NodeBehind(_) => "node_behind",
            Self::Rpc { .. } => "rpc_error",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Network(_) => "network",
            Self::NoAvailableEndpoints => "no_endpoints",
            Self::PoolClosed => "pool_closed",
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// Classify a JSON-RPC error object returned by a node.
    pub fn from_rpc_error(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        match code {
            CODE_RATE_LIMITED => Self::RateLimitExceeded,
            CODE_NODE_BEHIND | CODE_MIN_CONTEXT_SLOT => Self::NodeBehind(message.to_string()),
            CODE_INTERNAL => Self::NodeUnhealthy(message.to_string()),
            _ if lower.contains("too many requests") || lower.contains("rate limit") => {
                Self::RateLimitExceeded
            }
            _ if lower.contains("behind") => Self::NodeBehind(message.to_string()),
            _ if lower.contains("unhealthy") => Self::NodeUnhealthy(message.to_string()),
            _ => Self::Rpc {
                code,
                message: message.to_string(),
            },
        }
    }

    /// Classify a non-success HTTP status from a node.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimitExceeded,
            500..=599 => Self::NodeUnhealthy(format!("HTTP {}", status)),
            _ => Self::Network(format!("HTTP {}", status)),
        }
    }
}
