//! Pool maintenance loops.
//!
//! Two cooperating tasks keep the connection pool fresh:
//!
//! - the health-check loop probes every endpoint, re-sorts the list, and
//!   triggers a quick discovery pass when the pool looks unhealthy;
//! - the full-update loop runs a complete discovery pass on a long,
//!   jittered period and replaces the endpoint list with the best
//!   survivors.
//!
//! Both run one pass immediately, then wait. Errors are logged and the
//! loop carries on with its next tick. Both stop when the shutdown
//! channel flips to `true` (or its sender is dropped); a pass interrupted
//! mid-way never leaves a partial list because the pool swaps lists whole.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::metrics::AppMetrics;

use super::discovery::{DiscoveryMode, EndpointDiscovery};
use super::error::RpcError;
use super::health::EndpointSummary;
use super::pool::ConnectionPool;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub health_check_interval: Duration,
    pub full_update_interval: Duration,
    /// Fraction of `full_update_interval` applied as random +/- jitter.
    pub jitter_fraction: f64,
    /// Endpoints above this success rate count as healthy.
    pub healthy_success_rate: f64,
    /// Remediate when fewer than this fraction of endpoints are healthy.
    pub min_healthy_fraction: f64,
    /// Remediate when more than this fraction of endpoints are rate limited.
    pub max_rate_limited_fraction: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60 * 60),
            full_update_interval: Duration::from_secs(12 * 60 * 60),
            jitter_fraction: 0.1,
            healthy_success_rate: 0.7,
            min_healthy_fraction: 0.5,
            max_rate_limited_fraction: 0.3,
        }
    }
}

/// Pool-wide health verdict computed after each health check.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub total: usize,
    pub healthy: usize,
    pub rate_limited: usize,
    pub healthy_fraction: f64,
    pub rate_limited_fraction: f64,
    pub needs_remediation: bool,
}

pub fn evaluate_pool_health(summaries: &[EndpointSummary], config: &MaintenanceConfig) -> PoolHealth {
    let total = summaries.len();
    let healthy = summaries
        .iter()
        .filter(|s| s.success_rate > config.healthy_success_rate)
        .count();
    let rate_limited = summaries.iter().filter(|s| s.rate_limited).count();

    let (healthy_fraction, rate_limited_fraction) = if total == 0 {
        (0.0, 0.0)
    } else {
        (healthy as f64 / total as f64, rate_limited as f64 / total as f64)
    };

    PoolHealth {
        total,
        healthy,
        rate_limited,
        healthy_fraction,
        rate_limited_fraction,
        needs_remediation: healthy_fraction < config.min_healthy_fraction
            || rate_limited_fraction > config.max_rate_limited_fraction,
    }
}

/// `base` scaled by a random factor in `[1 - fraction, 1 + fraction]`.
pub fn jittered(base: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-fraction..=fraction);
    base.mul_f64(factor.max(0.0))
}

pub struct PoolMaintenance {
    pool: Arc<ConnectionPool>,
    discovery: EndpointDiscovery,
    config: MaintenanceConfig,
    metrics: Option<Arc<AppMetrics>>,
}

impl PoolMaintenance {
    pub fn new(
        pool: Arc<ConnectionPool>,
        discovery: EndpointDiscovery,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            pool,
            discovery,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn both loops on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let health = Arc::clone(&self);
        let health_shutdown = shutdown.clone();
        let full = self;

        vec![
            tokio::spawn(async move { health.run_health_check_loop(health_shutdown).await }),
            tokio::spawn(async move { full.run_full_update_loop(shutdown).await }),
        ]
    }

    pub async fn run_health_check_loop(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Health-check loop started (interval: {}s)",
            self.config.health_check_interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.health_check_once() => {}
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = time::sleep(self.config.health_check_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Health-check loop stopped cleanly");
    }

    pub async fn run_full_update_loop(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Full-update loop started (interval: {}s, jitter: {:.0}%)",
            self.config.full_update_interval.as_secs(),
            self.config.jitter_fraction * 100.0
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.update_pool(DiscoveryMode::Full) => {
                    if let Err(err) = result {
                        tracing::error!("Full pool update failed, keeping current endpoints: {}", err);
                    }
                }
                _ = shutdown.changed() => break,
            }

            let wait = jittered(self.config.full_update_interval, self.config.jitter_fraction);
            tracing::debug!("Next full pool update in {}s", wait.as_secs());

            tokio::select! {
                _ = time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Full-update loop stopped cleanly");
    }

    /// Probe, re-sort, evaluate, and remediate if needed.
    pub async fn health_check_once(&self) -> PoolHealth {
        self.pool.check_all_endpoints_health().await;
        let ranked = self.pool.sort_endpoints_by_performance().await;
        let summaries = self.pool.endpoint_summaries().await;
        let health = evaluate_pool_health(&summaries, &self.config);

        if let Some(metrics) = &self.metrics {
            metrics
                .maintenance_runs_total
                .with_label_values(&["health_check"])
                .inc();
        }

        tracing::info!(
            healthy = health.healthy,
            rate_limited = health.rate_limited,
            total = health.total,
            best = ranked.first().map(String::as_str).unwrap_or("-"),
            "pool health evaluated"
        );

        if health.needs_remediation {
            tracing::warn!(
                healthy_fraction = health.healthy_fraction,
                rate_limited_fraction = health.rate_limited_fraction,
                "pool unhealthy, running quick remediation"
            );
            if let Err(err) = self.update_pool(DiscoveryMode::Quick).await {
                tracing::error!("Quick remediation failed: {}", err);
            }
        }

        health
    }

    /// Discover and install a new endpoint list. Pinned endpoints are
    /// always kept, ahead of discovered ones. Returns the installed list.
    pub async fn update_pool(&self, mode: DiscoveryMode) -> Result<Vec<String>, RpcError> {
        let known = self.pool.endpoints().await;
        let discovered = self.discovery.discover(&known, mode).await;

        if discovered.is_empty() {
            return Err(RpcError::NoAvailableEndpoints);
        }

        let mut next: Vec<String> = self.pool.config().pinned_endpoints.clone();
        for url in discovered {
            if !next.contains(&url) {
                next.push(url);
            }
        }

        self.pool.update_endpoints(next.clone()).await?;
        if mode == DiscoveryMode::Full {
            self.pool.record_full_update().await;
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .maintenance_runs_total
                .with_label_values(&[mode.as_str()])
                .inc();
        }

        tracing::info!(mode = mode.as_str(), endpoints = next.len(), "pool endpoints refreshed");
        Ok(next)
    }
}
