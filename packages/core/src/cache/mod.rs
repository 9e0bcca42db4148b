//! Persisted response cache, history snapshots, and the HTTP caching layer.

pub mod error;
pub mod history;
pub mod middleware;
pub mod store;

pub use error::CacheError;
pub use history::{HistoryDomain, HistoryFields, HistoryRecord};
pub use middleware::{cache_middleware, CacheConfig, CacheLayerState};
pub use store::{CacheStore, CleanupReport, StoreStats};
