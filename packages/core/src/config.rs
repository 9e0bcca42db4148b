use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::rpc::{DiscoveryConfig, MaintenanceConfig, PoolConfig, RateLimiterConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Vec<String>,
    pub pinned_endpoints: Vec<String>,
    pub pool_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub requests_per_second: f64,
    pub burst_limit: u32,
    pub min_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub full_update_interval_hours: u64,
    pub health_check_interval_hours: u64,
    pub discovery_top_n: usize,
    pub retention_days: i64,
    pub route_ttls: HashMap<String, u64>,
    pub database_url: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoints = lookup("RPC_ENDPOINTS")
            .map(|raw| split_list(&raw))
            .filter(|list| !list.is_empty())
            .ok_or("RPC_ENDPOINTS is required")?;

        let pinned_endpoints = lookup("PINNED_ENDPOINTS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let route_ttls = match lookup("CACHE_TTL_OVERRIDES") {
            Some(raw) => CacheConfig::default()
                .with_overrides(parse_ttl_overrides(&raw)?)
                .route_ttls,
            None => CacheConfig::default().route_ttls,
        };

        Ok(Self {
            endpoints,
            pinned_endpoints,
            pool_size: parse_or(&lookup, "POOL_SIZE", 10)?,
            max_retries: parse_or(&lookup, "MAX_RETRIES", 3)?,
            retry_delay: Duration::from_millis(parse_or(&lookup, "RETRY_DELAY_MS", 500)?),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECONDS", 10)?),
            requests_per_second: parse_or(&lookup, "REQUESTS_PER_SECOND", 10.0)?,
            burst_limit: parse_or(&lookup, "BURST_LIMIT", 20)?,
            min_interval: Duration::from_millis(parse_or(&lookup, "MIN_INTERVAL_MS", 50)?),
            rate_limit_cooldown: Duration::from_secs(parse_or(
                &lookup,
                "RATE_LIMIT_COOLDOWN_SECONDS",
                60,
            )?),
            full_update_interval_hours: parse_or(&lookup, "FULL_UPDATE_INTERVAL_HOURS", 12)?,
            health_check_interval_hours: parse_or(&lookup, "HEALTH_CHECK_INTERVAL_HOURS", 1)?,
            discovery_top_n: parse_or(&lookup, "DISCOVERY_TOP_N", 10)?,
            retention_days: parse_or(&lookup, "RETENTION_DAYS", 7)?,
            route_ttls,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://rpc_cache.db".to_string()),
            api_port: parse_or(&lookup, "API_PORT", 8080)?,
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            request_timeout: self.request_timeout,
            rate_limit_cooldown: self.rate_limit_cooldown,
            pinned_endpoints: self.pinned_endpoints.clone(),
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: self.requests_per_second,
            burst_limit: self.burst_limit,
            min_interval: self.min_interval,
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_hours * 3600),
            full_update_interval: Duration::from_secs(self.full_update_interval_hours * 3600),
            ..MaintenanceConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            seed_endpoints: self.endpoints.clone(),
            top_n: self.discovery_top_n,
            ..DiscoveryConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            route_ttls: self.route_ttls.clone(),
            retention_days: self.retention_days,
            ..CacheConfig::default()
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

/// Parse `route=secs,route=secs`.
fn parse_ttl_overrides(raw: &str) -> Result<HashMap<String, u64>, String> {
    split_list(raw)
        .into_iter()
        .map(|pair| {
            let (route, secs) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid CACHE_TTL_OVERRIDES entry: {}", pair))?;
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("Invalid TTL for {} in CACHE_TTL_OVERRIDES", route.trim()))?;
            Ok((route.trim().to_string(), secs))
        })
        .collect()
}
