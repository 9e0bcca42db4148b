//! Upstream RPC access: rate limiting, endpoint health, the leased
//! connection pool, endpoint discovery, and the maintenance loops.

pub mod discovery;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod pool;
pub mod rate_limiter;
pub mod transport;

pub use discovery::{DiscoveryConfig, DiscoveryMode, EndpointDiscovery};
pub use error::RpcError;
pub use health::{EndpointSummary, FailureKind, HealthTracker};
pub use maintenance::{MaintenanceConfig, PoolHealth, PoolMaintenance};
pub use pool::{ConnectionPool, LeasedClient, PoolConfig, PoolStats};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats};
pub use transport::{HttpTransport, RpcTransport};
