//! Prometheus metrics registry for the RPC gateway.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and hand it to
//! the connection pool, the maintenance loops, and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Upstream RPC attempts, labelled by endpoint and outcome kind.
    pub rpc_requests_total: CounterVec,
    /// Attempts that were retried on another endpoint.
    pub rpc_retries_total: Counter,
    /// Calls rejected by the local token bucket.
    pub rate_limiter_throttled_total: Counter,
    /// Clients currently leased from the pool.
    pub pool_leased_clients: Gauge,
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    /// History snapshots appended, from hits and misses alike.
    pub history_records_total: Counter,
    /// Maintenance passes, labelled by kind (health_check, full_update, quick_update).
    pub maintenance_runs_total: CounterVec,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rpc_requests_total = CounterVec::new(
            Opts::new(
                "rpc_gateway_rpc_requests_total",
                "Upstream RPC attempts by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;

        let rpc_retries_total = Counter::with_opts(Opts::new(
            "rpc_gateway_rpc_retries_total",
            "Upstream RPC attempts retried on another endpoint",
        ))?;

        let rate_limiter_throttled_total = Counter::with_opts(Opts::new(
            "rpc_gateway_rate_limiter_throttled_total",
            "Calls rejected by the local token bucket",
        ))?;

        let pool_leased_clients = Gauge::with_opts(Opts::new(
            "rpc_gateway_pool_leased_clients",
            "Clients currently leased from the connection pool",
        ))?;

        let cache_hits_total = Counter::with_opts(Opts::new(
            "rpc_gateway_cache_hits_total",
            "Requests served from the response cache",
        ))?;

        let cache_misses_total = Counter::with_opts(Opts::new(
            "rpc_gateway_cache_misses_total",
            "Cacheable requests that fell through to the handler",
        ))?;

        let history_records_total = Counter::with_opts(Opts::new(
            "rpc_gateway_history_records_total",
            "History snapshots appended",
        ))?;

        let maintenance_runs_total = CounterVec::new(
            Opts::new(
                "rpc_gateway_maintenance_runs_total",
                "Pool maintenance passes by kind",
            ),
            &["kind"],
        )?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "rpc_gateway_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "rpc_gateway_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(rpc_requests_total.clone()))?;
        registry.register(Box::new(rpc_retries_total.clone()))?;
        registry.register(Box::new(rate_limiter_throttled_total.clone()))?;
        registry.register(Box::new(pool_leased_clients.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(history_records_total.clone()))?;
        registry.register(Box::new(maintenance_runs_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            rpc_requests_total,
            rpc_retries_total,
            rate_limiter_throttled_total,
            pool_leased_clients,
            cache_hits_total,
            cache_misses_total,
            history_records_total,
            maintenance_runs_total,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_contains_counter_after_increment() {
        let metrics = AppMetrics::new().unwrap();
        metrics.cache_hits_total.inc_by(2.0);
        let output = metrics.render().unwrap();
        assert!(output.contains("rpc_gateway_cache_hits_total 2"));
    }

    #[test]
    fn rpc_requests_labels_work() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .rpc_requests_total
            .with_label_values(&["https://api.example.com", "success"])
            .inc();
        let val = metrics
            .rpc_requests_total
            .with_label_values(&["https://api.example.com", "success"])
            .get();
        assert!((val - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn leased_gauge_set_and_get() {
        let metrics = AppMetrics::new().unwrap();
        metrics.pool_leased_clients.set(3.0);
        assert!((metrics.pool_leased_clients.get() - 3.0).abs() < f64::EPSILON);
    }
}
