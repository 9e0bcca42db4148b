//! Per-endpoint rolling statistics used to score and order endpoints.
//!
//! Scoring: `average_latency_ms * (2 - success_ratio)`, lower is better.
//! An endpoint with no successful call yet is scored with the configured
//! worst-case latency. Pinned endpoints always sort first regardless of
//! their score.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::error::RpcError;

/// Why an attempt against an endpoint failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Unhealthy,
    Behind,
    Rejected,
    Other,
}

impl From<&RpcError> for FailureKind {
    fn from(err: &RpcError) -> Self {
        match err {
            RpcError::Timeout => Self::Timeout,
            RpcError::RateLimitExceeded => Self::RateLimited,
            RpcError::NodeUnhealthy(_) | RpcError::Network(_) => Self::Unhealthy,
            RpcError::NodeBehind(_) => Self::Behind,
            RpcError::Rpc { .. } => Self::Rejected,
            RpcError::RetriesExhausted { last, .. } => Self::from(last.as_ref()),
            _ => Self::Other,
        }
    }
}

/// Mutable health state of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub average_latency_ms: f64,
    pub rate_limited_until: Option<Instant>,
}

impl EndpointHealth {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            average_latency_ms: 0.0,
            rate_limited_until: None,
        }
    }

    pub fn total_attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success ratio in `[0, 1]`; `None` when nothing was recorded yet.
    pub fn success_ratio(&self) -> Option<f64> {
        let total = self.total_attempts();
        if total == 0 {
            None
        } else {
            Some((self.success_count as f64 / total as f64).clamp(0.0, 1.0))
        }
    }

    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.rate_limited_until.map_or(false, |until| until > now)
    }
}

/// Serializable per-endpoint summary for stats output.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub rate_limited: bool,
    pub score: f64,
}

/// Health table for every endpoint the pool has ever been given.
#[derive(Debug)]
pub struct HealthTracker {
    endpoints: HashMap<String, EndpointHealth>,
    pinned: Vec<String>,
    rate_limit_cooldown: Duration,
    worst_case_latency_ms: f64,
}

impl HealthTracker {
    pub fn new(
        pinned: Vec<String>,
        rate_limit_cooldown: Duration,
        worst_case_latency: Duration,
    ) -> Self {
        Self {
            endpoints: HashMap::new(),
            pinned,
            rate_limit_cooldown,
            worst_case_latency_ms: worst_case_latency.as_secs_f64() * 1000.0,
        }
    }

    /// Start tracking `url` if it is not tracked yet. Existing stats are kept.
    pub fn track(&mut self, url: &str) {
        self.endpoints
            .entry(url.to_string())
            .or_insert_with(|| EndpointHealth::new(url));
    }

    /// Drop all history and track exactly `urls` with fresh entries.
    pub fn reset(&mut self, urls: &[String]) {
        self.endpoints.clear();
        for url in urls {
            self.track(url);
        }
    }

    pub fn get(&self, url: &str) -> Option<&EndpointHealth> {
        self.endpoints.get(url)
    }

    pub fn pinned(&self) -> &[String] {
        &self.pinned
    }

    pub fn record_success(&mut self, url: &str, latency: Duration) {
        self.track(url);
        if let Some(health) = self.endpoints.get_mut(url) {
            health.success_count += 1;
            health.consecutive_failures = 0;
            let latency_ms = latency.as_secs_f64() * 1000.0;
            health.average_latency_ms +=
                (latency_ms - health.average_latency_ms) / health.success_count as f64;
        }
    }

    pub fn record_failure(&mut self, url: &str, kind: FailureKind) {
        self.track(url);
        let cooldown = self.rate_limit_cooldown;
        if let Some(health) = self.endpoints.get_mut(url) {
            health.failure_count += 1;
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            if kind == FailureKind::RateLimited {
                health.rate_limited_until = Some(Instant::now() + cooldown);
                tracing::warn!(
                    endpoint = %url,
                    cooldown_secs = cooldown.as_secs(),
                    "endpoint rate limited, cooling down"
                );
            }
        }
    }

    pub fn is_rate_limited(&self, url: &str, now: Instant) -> bool {
        self.endpoints
            .get(url)
            .map_or(false, |health| health.is_rate_limited(now))
    }

    /// Lower is better.
    pub fn score(&self, url: &str) -> f64 {
        let Some(health) = self.endpoints.get(url) else {
            return self.worst_case_latency_ms;
        };

        let latency = if health.success_count == 0 {
            self.worst_case_latency_ms
        } else {
            health.average_latency_ms
        };

        // No history at all scores as a neutral ratio; failures-only scores as zero.
        let ratio = health.success_ratio().unwrap_or(1.0);
        latency * (2.0 - ratio)
    }

    /// Order `urls` ascending by score, then move pinned endpoints to the
    /// front in their configured order.
    pub fn sort_by_score(&self, urls: &[String]) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> =
            urls.iter().map(|url| (self.score(url), url)).collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut ordered: Vec<String> = self
            .pinned
            .iter()
            .filter(|pinned| urls.contains(pinned))
            .cloned()
            .collect();
        ordered.extend(
            scored
                .into_iter()
                .map(|(_, url)| url.clone())
                .filter(|url| !self.pinned.contains(url)),
        );
        ordered
    }

    pub fn summary(&self, url: &str, now: Instant) -> EndpointSummary {
        let health = self
            .endpoints
            .get(url)
            .cloned()
            .unwrap_or_else(|| EndpointHealth::new(url));
        EndpointSummary {
            endpoint: url.to_string(),
            success_rate: health.success_ratio().unwrap_or(0.0),
            average_latency_ms: health.average_latency_ms,
            success_count: health.success_count,
            failure_count: health.failure_count,
            consecutive_failures: health.consecutive_failures,
            rate_limited: health.is_rate_limited(now),
            score: self.score(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(pinned: &[&str]) -> HealthTracker {
        HealthTracker::new(
            pinned.iter().map(|p| p.to_string()).collect(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn success_resets_consecutive_failures_and_averages_latency() {
        let mut t = tracker(&[]);
        t.record_failure("a", FailureKind::Timeout);
        t.record_failure("a", FailureKind::Timeout);
        assert_eq!(t.get("a").unwrap().consecutive_failures, 2);

        t.record_success("a", Duration::from_millis(100));
        t.record_success("a", Duration::from_millis(300));

        let health = t.get("a").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.success_count, 2);
        assert_eq!(health.failure_count, 2);
        assert!((health.average_latency_ms - 200.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_failure_sets_cooldown() {
        let mut t = tracker(&[]);
        t.record_failure("a", FailureKind::RateLimited);
        assert!(t.is_rate_limited("a", Instant::now()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!t.is_rate_limited("a", Instant::now()));
    }

    #[test]
    fn timeout_failure_does_not_set_cooldown() {
        let mut t = tracker(&[]);
        t.record_failure("a", FailureKind::Timeout);
        assert!(!t.is_rate_limited("a", Instant::now()));
    }

    #[test]
    fn score_follows_latency_and_success_ratio() {
        let mut t = tracker(&[]);
        t.record_success("a", Duration::from_millis(100));
        // 100ms, ratio 1.0 -> 100
        assert!((t.score("a") - 100.0).abs() < 1e-6);

        t.record_failure("a", FailureKind::Timeout);
        // ratio 0.5 -> 100 * 1.5
        assert!((t.score("a") - 150.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_and_failing_endpoints_score_worst() {
        let mut t = tracker(&[]);
        t.track("fresh");
        t.record_failure("failing", FailureKind::Unhealthy);

        assert!((t.score("fresh") - 10_000.0).abs() < 1e-6);
        assert!((t.score("failing") - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn sort_orders_by_ascending_score() {
        let mut t = tracker(&[]);
        t.record_success("slow", Duration::from_millis(900));
        t.record_success("fast", Duration::from_millis(50));
        t.record_success("mid", Duration::from_millis(300));

        let sorted = t.sort_by_score(&urls(&["slow", "fast", "mid"]));
        assert_eq!(sorted, urls(&["fast", "mid", "slow"]));
    }

    #[test]
    fn pinned_endpoint_is_always_first() {
        let mut t = tracker(&["paid"]);
        t.record_success("paid", Duration::from_millis(5_000));
        t.record_failure("paid", FailureKind::Timeout);
        t.record_success("fast", Duration::from_millis(10));

        let sorted = t.sort_by_score(&urls(&["fast", "paid", "other"]));
        assert_eq!(sorted[0], "paid");
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn pinned_endpoint_missing_from_list_is_not_added() {
        let t = tracker(&["paid"]);
        let sorted = t.sort_by_score(&urls(&["a", "b"]));
        assert_eq!(sorted, urls(&["a", "b"]));
    }

    #[test]
    fn reset_discards_history() {
        let mut t = tracker(&[]);
        t.record_success("a", Duration::from_millis(10));
        t.reset(&urls(&["a", "b"]));

        assert_eq!(t.get("a").unwrap().success_count, 0);
        assert!(t.get("b").is_some());
    }
}
