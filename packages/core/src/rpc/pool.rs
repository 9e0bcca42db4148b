//! Connection pool over a ranked set of upstream RPC endpoints.
//!
//! The pool owns the endpoint list (best first), the [`HealthTracker`],
//! and a semaphore bounding how many clients may be leased at once.
//! Leasing picks the best endpoint that is not cooling down from a rate
//! limit and asks the shared [`RateLimiter`] for admission. Executing a
//! call retries retryable failures on the next-best endpoint up to
//! `max_retries` attempts in total.
//!
//! The endpoint list lives behind an `Arc` that is swapped whole, so a
//! reader always sees either the old list or the new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use crate::metrics::AppMetrics;

use super::error::RpcError;
use super::health::{EndpointSummary, FailureKind, HealthTracker};
use super::rate_limiter::RateLimiter;
use super::transport::RpcTransport;

/// Method used for liveness probes.
pub const PROBE_METHOD: &str = "getHealth";

/// Number of endpoints reported as top performers in [`PoolStats`].
const TOP_PERFORMERS: usize = 5;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently leased clients.
    pub pool_size: usize,
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub rate_limit_cooldown: Duration,
    pub pinned_endpoints: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(60),
            pinned_endpoints: Vec::new(),
        }
    }
}

/// A client bound to one endpoint. Dropping it releases the pool slot.
pub struct LeasedClient {
    endpoint: String,
    permit: Option<OwnedSemaphorePermit>,
    leases: Arc<Semaphore>,
    pool_size: usize,
    metrics: Option<Arc<AppMetrics>>,
}

impl LeasedClient {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for LeasedClient {
    fn drop(&mut self) {
        drop(self.permit.take());
        let leased = self.pool_size.saturating_sub(self.leases.available_permits());
        if let Some(metrics) = &self.metrics {
            metrics.pool_leased_clients.set(leased as f64);
        }
        tracing::trace!(endpoint = %self.endpoint, leased, "client released");
    }
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    pub healthy: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub endpoint_count: usize,
    pub pool_size: usize,
    pub leased: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub last_full_update: Option<DateTime<Utc>>,
    pub top_performers: Vec<EndpointSummary>,
}

pub struct ConnectionPool {
    config: PoolConfig,
    endpoints: RwLock<Arc<Vec<String>>>,
    health: Mutex<HealthTracker>,
    leases: Arc<Semaphore>,
    rate_limiter: Arc<RateLimiter>,
    transport: Arc<dyn RpcTransport>,
    last_full_update: RwLock<Option<DateTime<Utc>>>,
    metrics: Option<Arc<AppMetrics>>,
}

impl ConnectionPool {
    /// Build a pool over `endpoints` with fresh health entries.
    ///
    /// Fails with [`RpcError::Configuration`] if `endpoints` is empty.
    pub fn initialize(
        endpoints: Vec<String>,
        config: PoolConfig,
        rate_limiter: Arc<RateLimiter>,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self, RpcError> {
        let endpoints = normalize_endpoints(endpoints);
        if endpoints.is_empty() {
            return Err(RpcError::Configuration(
                "connection pool requires at least one endpoint".to_string(),
            ));
        }
        if config.pool_size == 0 {
            return Err(RpcError::Configuration("pool_size must be at least 1".to_string()));
        }

        let mut health = HealthTracker::new(
            config.pinned_endpoints.clone(),
            config.rate_limit_cooldown,
            config.request_timeout,
        );
        health.reset(&endpoints);

        tracing::info!(
            endpoints = endpoints.len(),
            pool_size = config.pool_size,
            max_retries = config.max_retries,
            "connection pool initialized"
        );

        Ok(Self {
            leases: Arc::new(Semaphore::new(config.pool_size)),
            config,
            endpoints: RwLock::new(Arc::new(endpoints)),
            health: Mutex::new(health),
            rate_limiter,
            transport,
            last_full_update: RwLock::new(None),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        Arc::clone(&self.transport)
    }

    /// Snapshot of the current endpoint list, best first.
    pub async fn endpoints(&self) -> Arc<Vec<String>> {
        Arc::clone(&*self.endpoints.read().await)
    }

    pub fn leased_count(&self) -> usize {
        self.config
            .pool_size
            .saturating_sub(self.leases.available_permits())
    }

    /// Lease a client bound to the best eligible endpoint.
    ///
    /// Waits for a free slot, then consults the rate limiter. The slot is
    /// released when the returned client is dropped, including on every
    /// error path out of this function.
    pub async fn lease_client(&self) -> Result<LeasedClient, RpcError> {
        let permit = Arc::clone(&self.leases)
            .acquire_owned()
            .await
            .map_err(|_| RpcError::PoolClosed)?;

        let endpoint = self
            .select_endpoint(&[])
            .await
            .ok_or(RpcError::NoAvailableEndpoints)?;

        if let Err(err) = self.rate_limiter.acquire().await {
            if let Some(metrics) = &self.metrics {
                metrics.rate_limiter_throttled_total.inc();
            }
            return Err(err);
        }

        let client = LeasedClient {
            endpoint,
            permit: Some(permit),
            leases: Arc::clone(&self.leases),
            pool_size: self.config.pool_size,
            metrics: self.metrics.clone(),
        };

        let leased = self.leased_count();
        if let Some(metrics) = &self.metrics {
            metrics.pool_leased_clients.set(leased as f64);
        }
        tracing::trace!(endpoint = %client.endpoint, leased, "client leased");

        Ok(client)
    }

    /// Issue `method` starting on the client's endpoint, failing over to
    /// alternates on retryable errors.
    ///
    /// Non-retryable errors return immediately. Once `max_retries` attempts
    /// are spent, or no untried eligible endpoint remains, the last error is
    /// returned wrapped in [`RpcError::RetriesExhausted`].
    pub async fn execute(
        &self,
        client: &LeasedClient,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.execute_from(client, method, params, 1).await
    }

    /// Body of [`execute`](Self::execute) with `first_attempt - 1` attempts
    /// already spent on admission.
    async fn execute_from(
        &self,
        client: &LeasedClient,
        method: &str,
        params: Value,
        first_attempt: u32,
    ) -> Result<Value, RpcError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut tried: Vec<String> = Vec::new();
        let mut endpoint = client.endpoint.clone();
        let mut last_error = RpcError::NoAvailableEndpoints;
        let mut attempts_used = first_attempt.saturating_sub(1);

        for attempt in first_attempt..=max_attempts.max(first_attempt) {
            if attempt > first_attempt {
                time::sleep(self.config.retry_delay).await;

                endpoint = match self.select_endpoint(&tried).await {
                    Some(next) => next,
                    None => {
                        tracing::warn!(method, attempt, "no alternate endpoint left to retry on");
                        break;
                    }
                };
                attempts_used = attempt;

                if let Err(err) = self.rate_limiter.acquire().await {
                    if let Some(metrics) = &self.metrics {
                        metrics.rate_limiter_throttled_total.inc();
                    }
                    last_error = err;
                    continue;
                }

                if let Some(metrics) = &self.metrics {
                    metrics.rpc_retries_total.inc();
                }
            }

            attempts_used = attempt;
            tried.push(endpoint.clone());

            match self.attempt(&endpoint, method, &params).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        method,
                        attempt,
                        max_attempts,
                        error = %err,
                        "retryable upstream failure"
                    );
                    last_error = err;
                }
            }
        }

        Err(RpcError::RetriesExhausted {
            attempts: attempts_used,
            last: Box::new(last_error),
        })
    }

    /// Lease a client and execute one call on it.
    ///
    /// A local rate-limit rejection at lease time spends one attempt and
    /// waits `retry_delay` before leasing again, sharing the `max_retries`
    /// budget with the upstream failover in [`execute`](Self::execute).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        let client = loop {
            match self.lease_client().await {
                Ok(client) => break client,
                Err(RpcError::RateLimitExceeded) if attempt < max_attempts => {
                    tracing::debug!(method, attempt, "admission throttled, retrying lease");
                    time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(RpcError::RateLimitExceeded) => {
                    return Err(RpcError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(RpcError::RateLimitExceeded),
                    });
                }
                Err(err) => return Err(err),
            }
        };

        self.execute_from(&client, method, params, attempt).await
    }

    /// One call against one endpoint, bounded by the request timeout and
    /// reported to the health tracker whatever the outcome.
    async fn attempt(&self, endpoint: &str, method: &str, params: &Value) -> Result<Value, RpcError> {
        let timeout = self.config.request_timeout;
        let started = Instant::now();

        let outcome = match time::timeout(
            timeout,
            self.transport.send(endpoint, method, params, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout),
        };
        let latency = started.elapsed();

        {
            let mut health = self.health.lock().await;
            match &outcome {
                Ok(_) => health.record_success(endpoint, latency),
                Err(err) => health.record_failure(endpoint, FailureKind::from(err)),
            }
        }

        if let Some(metrics) = &self.metrics {
            let label = match &outcome {
                Ok(_) => "success",
                Err(err) => err.kind(),
            };
            metrics
                .rpc_requests_total
                .with_label_values(&[endpoint, label])
                .inc();
        }

        tracing::debug!(
            endpoint = %endpoint,
            method,
            latency_ms = latency.as_millis() as u64,
            ok = outcome.is_ok(),
            "upstream call finished"
        );

        outcome
    }

    /// Best endpoint not in `exclude` and not cooling down.
    async fn select_endpoint(&self, exclude: &[String]) -> Option<String> {
        let endpoints = self.endpoints().await;
        let health = self.health.lock().await;
        let now = Instant::now();

        health
            .sort_by_score(&endpoints)
            .into_iter()
            .find(|url| !exclude.contains(url) && !health.is_rate_limited(url, now))
    }

    /// Probe every endpoint concurrently and record the outcomes.
    pub async fn check_all_endpoints_health(&self) -> Vec<ProbeResult> {
        let endpoints = self.endpoints().await;
        let timeout = self.config.request_timeout;
        let mut probes = JoinSet::new();

        for url in endpoints.iter().cloned() {
            let transport = Arc::clone(&self.transport);
            probes.spawn(async move {
                let started = Instant::now();
                let outcome = match time::timeout(
                    timeout,
                    transport.send(&url, PROBE_METHOD, &Value::Null, timeout),
                )
                .await
                {
                    Ok(result) => result.map(|_| ()),
                    Err(_) => Err(RpcError::Timeout),
                };
                (url, outcome, started.elapsed())
            });
        }

        let mut results = Vec::with_capacity(endpoints.len());
        while let Some(joined) = probes.join_next().await {
            let (url, outcome, latency) = match joined {
                Ok(probe) => probe,
                Err(err) => {
                    tracing::error!("health probe task failed: {}", err);
                    continue;
                }
            };

            {
                let mut health = self.health.lock().await;
                match &outcome {
                    Ok(()) => health.record_success(&url, latency),
                    Err(err) => health.record_failure(&url, FailureKind::from(err)),
                }
            }

            results.push(ProbeResult {
                endpoint: url,
                healthy: outcome.is_ok(),
                latency_ms: latency.as_secs_f64() * 1000.0,
                error: outcome.err().map(|err| err.to_string()),
            });
        }

        let healthy = results.iter().filter(|r| r.healthy).count();
        tracing::info!(checked = results.len(), healthy, "endpoint health check complete");
        results
    }

    /// Re-rank the endpoint list by score (pinned first) and store the new order.
    pub async fn sort_endpoints_by_performance(&self) -> Vec<String> {
        let mut guard = self.endpoints.write().await;
        let sorted = {
            let health = self.health.lock().await;
            health.sort_by_score(&guard)
        };
        *guard = Arc::new(sorted.clone());
        sorted
    }

    /// Replace the endpoint list, keeping health stats for endpoints that survive.
    pub async fn update_endpoints(&self, new_endpoints: Vec<String>) -> Result<(), RpcError> {
        let new_endpoints = normalize_endpoints(new_endpoints);
        if new_endpoints.is_empty() {
            return Err(RpcError::Configuration(
                "refusing to replace endpoint list with an empty one".to_string(),
            ));
        }

        let mut guard = self.endpoints.write().await;
        {
            let mut health = self.health.lock().await;
            for url in &new_endpoints {
                health.track(url);
            }
        }
        tracing::info!(
            previous = guard.len(),
            current = new_endpoints.len(),
            "endpoint list updated"
        );
        *guard = Arc::new(new_endpoints);
        Ok(())
    }

    /// Replace the endpoint list and discard all accumulated health.
    pub async fn reset(&self, endpoints: Vec<String>) -> Result<(), RpcError> {
        let endpoints = normalize_endpoints(endpoints);
        if endpoints.is_empty() {
            return Err(RpcError::Configuration(
                "connection pool requires at least one endpoint".to_string(),
            ));
        }

        let mut guard = self.endpoints.write().await;
        self.health.lock().await.reset(&endpoints);
        *guard = Arc::new(endpoints);
        *self.last_full_update.write().await = None;
        tracing::info!(endpoints = guard.len(), "connection pool reset");
        Ok(())
    }

    pub async fn record_full_update(&self) {
        *self.last_full_update.write().await = Some(Utc::now());
    }

    pub async fn last_full_update(&self) -> Option<DateTime<Utc>> {
        *self.last_full_update.read().await
    }

    /// Health summaries for every endpoint, in ranked order.
    pub async fn endpoint_summaries(&self) -> Vec<EndpointSummary> {
        let endpoints = self.endpoints().await;
        let health = self.health.lock().await;
        let now = Instant::now();
        health
            .sort_by_score(&endpoints)
            .iter()
            .map(|url| health.summary(url, now))
            .collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let summaries = self.endpoint_summaries().await;
        let leased = self.leased_count();

        PoolStats {
            endpoint_count: summaries.len(),
            pool_size: self.config.pool_size,
            leased,
            available: self.config.pool_size.saturating_sub(leased),
            rate_limited: summaries.iter().filter(|s| s.rate_limited).count(),
            last_full_update: self.last_full_update().await,
            top_performers: summaries.into_iter().take(TOP_PERFORMERS).collect(),
        }
    }

    /// Stop handing out leases. Outstanding clients release normally.
    pub fn close(&self) {
        self.leases.close();
        tracing::info!(outstanding = self.leased_count(), "connection pool closed");
    }
}

/// Trim, drop empties, and de-duplicate while keeping order.
fn normalize_endpoints(endpoints: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(endpoints.len());
    for url in endpoints {
        let url = url.trim().trim_end_matches('/').to_string();
        if !url.is_empty() && !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}
