//! Token-bucket admission gate shared by every outbound upstream call.
//!
//! Tokens refill continuously at `requests_per_second` up to `burst_limit`
//! and each admitted call consumes one. On top of the bucket, consecutive
//! grants are spaced by at least `min_interval`: a caller arriving too soon
//! after the previous grant is suspended for the remainder. A caller that
//! finds the bucket empty is rejected with [`RpcError::RateLimitExceeded`]
//! instead of queuing, so the pool's retry path decides what happens next.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use super::error::RpcError;

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst_limit: u32,
    pub min_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_limit: 20,
            min_interval: Duration::from_millis(50),
        }
    }
}

/// Point-in-time view of the limiter, returned by [`RateLimiter::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tokens: f64,
    pub burst_limit: u32,
    pub requests_per_second: f64,
    /// `1 - tokens / burst_limit`
    pub utilization: f64,
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub burst_requests: u64,
    pub average_interval_ms: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_grant: Option<Instant>,
    total_requests: u64,
    throttled_requests: u64,
    burst_requests: u64,
    interval_samples: u64,
    average_interval_secs: f64,
}

impl BucketState {
    fn new(burst_limit: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst_limit),
            last_refill: now,
            last_grant: None,
            total_requests: 0,
            throttled_requests: 0,
            burst_requests: 0,
            interval_samples: 0,
            average_interval_secs: 0.0,
        }
    }

    /// Token count as of `now`, without touching the bucket.
    fn tokens_at(&self, now: Instant, config: &RateLimiterConfig) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * config.requests_per_second;
        (self.tokens + added).clamp(0.0, f64::from(config.burst_limit))
    }

    fn refill(&mut self, now: Instant, config: &RateLimiterConfig) {
        self.tokens = self.tokens_at(now, config);
        self.last_refill = now;
    }

    /// Refill, then take one token if available. Returns whether the call
    /// was admitted.
    fn try_consume(&mut self, now: Instant, config: &RateLimiterConfig) -> bool {
        self.refill(now, config);
        self.total_requests += 1;

        if self.tokens < 1.0 {
            self.throttled_requests += 1;
            return false;
        }
        self.tokens -= 1.0;

        if let Some(previous) = self.last_grant {
            let gap = now.saturating_duration_since(previous).as_secs_f64();
            self.interval_samples += 1;
            self.average_interval_secs +=
                (gap - self.average_interval_secs) / self.interval_samples as f64;

            // Faster than the sustained rate means the grant was paid for by burst capacity.
            if config.requests_per_second > 0.0 && gap < 1.0 / config.requests_per_second {
                self.burst_requests += 1;
            }
        }
        self.last_grant = Some(now);
        true
    }
}

/// Process-wide token bucket. Share it behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = BucketState::new(config.burst_limit, Instant::now());
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Admit one upstream call.
    ///
    /// Suspends the caller while the `min_interval` floor is in effect,
    /// then fails fast with [`RpcError::RateLimitExceeded`] if the bucket
    /// holds less than one token. The lock is held across the floor wait
    /// so grants are serialized.
    pub async fn acquire(&self) -> Result<(), RpcError> {
        let mut state = self.state.lock().await;

        if let Some(last_grant) = state.last_grant {
            let since_grant = Instant::now().saturating_duration_since(last_grant);
            if since_grant < self.config.min_interval {
                time::sleep(self.config.min_interval - since_grant).await;
            }
        }

        if state.try_consume(Instant::now(), &self.config) {
            Ok(())
        } else {
            tracing::debug!(
                tokens = state.tokens,
                throttled = state.throttled_requests,
                "rate limiter rejected call"
            );
            Err(RpcError::RateLimitExceeded)
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        let tokens = state.tokens_at(Instant::now(), &self.config);

        let burst = f64::from(self.config.burst_limit);
        let utilization = if burst > 0.0 { 1.0 - tokens / burst } else { 0.0 };

        RateLimiterStats {
            tokens,
            burst_limit: self.config.burst_limit,
            requests_per_second: self.config.requests_per_second,
            utilization,
            total_requests: state.total_requests,
            throttled_requests: state.throttled_requests,
            burst_requests: state.burst_requests,
            average_interval_ms: state.average_interval_secs * 1000.0,
        }
    }

    /// Zero the counters. Tokens are left as they are.
    pub async fn reset_stats(&self) {
        let mut state = self.state.lock().await;
        state.total_requests = 0;
        state.throttled_requests = 0;
        state.burst_requests = 0;
        state.interval_samples = 0;
        state.average_interval_secs = 0.0;
    }
}
