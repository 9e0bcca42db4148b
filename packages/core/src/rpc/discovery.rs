//! Candidate endpoint discovery.
//!
//! Candidates come from the configured seed list plus every RPC address
//! the cluster advertises through `getClusterNodes`. Each candidate is
//! probed with a handful of cheap read methods under a concurrency bound
//! and a per-call timeout; survivors are ranked by how many methods they
//! answered and then by average latency.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use super::error::RpcError;
use super::transport::RpcTransport;

/// Methods every usable endpoint must answer.
pub const PROBE_METHODS: &[&str] = &["getHealth", "getVersion", "getSlot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Every candidate, generous timeout.
    Full,
    /// Small candidate set, short timeout. Used for remediation.
    Quick,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full_update",
            Self::Quick => "quick_update",
        }
    }

    fn probe_timeout(&self) -> Duration {
        match self {
            Self::Full => Duration::from_secs(5),
            Self::Quick => Duration::from_secs(2),
        }
    }

    fn max_candidates(&self) -> Option<usize> {
        match self {
            Self::Full => None,
            Self::Quick => Some(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub seed_endpoints: Vec<String>,
    pub probe_concurrency: usize,
    pub top_n: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seed_endpoints: Vec::new(),
            probe_concurrency: 10,
            top_n: 10,
        }
    }
}

/// Outcome of probing one candidate with [`PROBE_METHODS`].
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub methods_passed: usize,
    pub average_latency_ms: f64,
}

#[derive(Debug, Deserialize)]
struct ClusterNode {
    #[serde(default)]
    rpc: Option<String>,
}

pub struct EndpointDiscovery {
    transport: Arc<dyn RpcTransport>,
    config: DiscoveryConfig,
}

impl EndpointDiscovery {
    pub fn new(transport: Arc<dyn RpcTransport>, config: DiscoveryConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Discover, probe, and rank. Returns at most `top_n` endpoints, best first.
    pub async fn discover(&self, known: &[String], mode: DiscoveryMode) -> Vec<String> {
        let mut candidates = self.candidates(known, mode).await;
        if let Some(max) = mode.max_candidates() {
            candidates.truncate(max);
        }

        tracing::info!(
            mode = mode.as_str(),
            candidates = candidates.len(),
            "probing candidate endpoints"
        );

        let outcomes = self.probe_all(candidates, mode.probe_timeout()).await;
        rank(outcomes, self.config.top_n)
    }

    /// Seeds, then the currently known endpoints, then anything the cluster
    /// advertises. De-duplicated, order preserved.
    pub async fn candidates(&self, known: &[String], mode: DiscoveryMode) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let mut push = |url: String| {
            let url = url.trim_end_matches('/').to_string();
            if !url.is_empty() && !candidates.contains(&url) {
                candidates.push(url);
            }
        };

        for url in self.config.seed_endpoints.iter().chain(known.iter()) {
            push(url.clone());
        }

        match self.cluster_rpc_addresses(known, mode.probe_timeout()).await {
            Ok(advertised) => {
                for url in advertised {
                    push(url);
                }
            }
            Err(err) => {
                tracing::warn!("cluster node listing unavailable: {}", err);
            }
        }

        candidates
    }

    /// Ask the known endpoints, in order, for the cluster's node list and
    /// collect the advertised RPC addresses.
    async fn cluster_rpc_addresses(
        &self,
        known: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, RpcError> {
        let mut last_error = RpcError::NoAvailableEndpoints;

        for source in known {
            let result = time::timeout(
                timeout,
                self.transport.send(source, "getClusterNodes", &Value::Null, timeout),
            )
            .await
            .unwrap_or(Err(RpcError::Timeout));

            match result {
                Ok(value) => return parse_cluster_nodes(value),
                Err(err) => {
                    tracing::debug!(endpoint = %source, "getClusterNodes failed: {}", err);
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn probe_all(&self, candidates: Vec<String>, timeout: Duration) -> Vec<ProbeOutcome> {
        let permits = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));
        let mut probes = JoinSet::new();

        for url in candidates {
            let transport = Arc::clone(&self.transport);
            let permits = Arc::clone(&permits);
            probes.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Some(probe_endpoint(transport.as_ref(), url, timeout).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(err) => tracing::error!("probe task failed: {}", err),
            }
        }
        outcomes
    }
}

async fn probe_endpoint(transport: &dyn RpcTransport, url: String, timeout: Duration) -> ProbeOutcome {
    let mut passed = 0;
    let mut total_latency_ms = 0.0;

    for method in PROBE_METHODS {
        let started = Instant::now();
        let result = time::timeout(timeout, transport.send(&url, method, &Value::Null, timeout))
            .await
            .unwrap_or(Err(RpcError::Timeout));

        if result.is_ok() {
            passed += 1;
            total_latency_ms += started.elapsed().as_secs_f64() * 1000.0;
        }
    }

    ProbeOutcome {
        endpoint: url,
        methods_passed: passed,
        average_latency_ms: if passed > 0 {
            total_latency_ms / passed as f64
        } else {
            f64::INFINITY
        },
    }
}

/// Drop candidates that answered nothing, order by coverage then latency,
/// keep the first `top_n`.
pub fn rank(mut outcomes: Vec<ProbeOutcome>, top_n: usize) -> Vec<String> {
    outcomes.retain(|o| o.methods_passed > 0);
    outcomes.sort_by(|a, b| {
        b.methods_passed
            .cmp(&a.methods_passed)
            .then(a.average_latency_ms.total_cmp(&b.average_latency_ms))
    });
    outcomes
        .into_iter()
        .take(top_n)
        .map(|o| o.endpoint)
        .collect()
}

fn parse_cluster_nodes(value: Value) -> Result<Vec<String>, RpcError> {
    let nodes: Vec<ClusterNode> =
        serde_json::from_value(value).map_err(|err| RpcError::Serialization(err.to_string()))?;

    Ok(nodes
        .into_iter()
        .filter_map(|node| node.rpc)
        .map(|rpc| {
            if rpc.starts_with("http://") || rpc.starts_with("https://") {
                rpc
            } else {
                format!("http://{}", rpc)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    /// Per-endpoint artificial latency; `None` means the endpoint is down.
    struct FakeCluster {
        latency: HashMap<String, Option<Duration>>,
        advertised: Value,
    }

    #[async_trait]
    impl RpcTransport for FakeCluster {
        async fn send(
            &self,
            url: &str,
            method: &str,
            _params: &Value,
            _timeout: Duration,
        ) -> Result<Value, RpcError> {
            match self.latency.get(url).copied().flatten() {
                Some(delay) => {
                    time::sleep(delay).await;
                    if method == "getClusterNodes" {
                        Ok(self.advertised.clone())
                    } else {
                        Ok(json!("ok"))
                    }
                }
                None => Err(RpcError::NodeUnhealthy("down".into())),
            }
        }
    }

    #[test]
    fn rank_prefers_coverage_then_latency() {
        let outcomes = vec![
            ProbeOutcome { endpoint: "slow-full".into(), methods_passed: 3, average_latency_ms: 400.0 },
            ProbeOutcome { endpoint: "fast-partial".into(), methods_passed: 2, average_latency_ms: 10.0 },
            ProbeOutcome { endpoint: "fast-full".into(), methods_passed: 3, average_latency_ms: 50.0 },
            ProbeOutcome { endpoint: "dead".into(), methods_passed: 0, average_latency_ms: f64::INFINITY },
        ];

        let ranked = rank(outcomes, 10);
        assert_eq!(ranked, vec!["fast-full", "slow-full", "fast-partial"]);
        assert_eq!(rank(Vec::new(), 3), Vec::<String>::new());
    }

    #[test]
    fn cluster_nodes_without_rpc_are_skipped() {
        let parsed = parse_cluster_nodes(json!([
            { "pubkey": "a", "rpc": "10.0.0.1:8899" },
            { "pubkey": "b", "rpc": null },
            { "pubkey": "c" },
            { "pubkey": "d", "rpc": "https://rpc.example.com" },
        ]))
        .unwrap();

        assert_eq!(parsed, vec!["http://10.0.0.1:8899", "https://rpc.example.com"]);
        assert!(parse_cluster_nodes(json!({ "unexpected": true })).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn discover_ranks_advertised_and_seed_endpoints() {
        let latency = HashMap::from([
            ("http://known".to_string(), Some(Duration::from_millis(200))),
            ("http://seed".to_string(), Some(Duration::from_millis(50))),
            ("http://10.0.0.1:8899".to_string(), Some(Duration::from_millis(10))),
            ("http://10.0.0.2:8899".to_string(), None),
        ]);
        let transport = Arc::new(FakeCluster {
            latency,
            advertised: json!([
                { "rpc": "10.0.0.1:8899" },
                { "rpc": "10.0.0.2:8899" },
            ]),
        });
        let discovery = EndpointDiscovery::new(
            transport,
            DiscoveryConfig {
                seed_endpoints: vec!["http://seed".into()],
                probe_concurrency: 2,
                top_n: 2,
            },
        );

        let ranked = discovery
            .discover(&["http://known".to_string()], DiscoveryMode::Full)
            .await;

        assert_eq!(ranked, vec!["http://10.0.0.1:8899", "http://seed"]);
    }
}
