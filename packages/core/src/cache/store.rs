//! Persisted response cache and history tables.
//!
//! All SQLite read/write logic for the cache lives here. The cache table
//! is keyed by `(endpoint, normalized params)`; a read is a hit only while
//! `now < stored_at + ttl`, and a miss never deletes anything. History
//! tables are append-only and pruned by [`CacheStore::cleanup`].
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that
//! string comparison in SQL matches chronological order.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::error::CacheError;
use super::history::{HistoryDomain, HistoryFields, HistoryRecord};

/// Upper bound on rows returned by [`CacheStore::query_history`].
pub const MAX_HISTORY_LIMIT: i64 = 1_000;

/// Rows removed by one [`CacheStore::cleanup`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cache_rows_deleted: u64,
    pub history_rows_deleted: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.cache_rows_deleted + self.history_rows_deleted
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub cache_entries: i64,
    pub history_rows: BTreeMap<String, i64>,
    pub total_size_bytes: i64,
    pub earliest_history: Option<DateTime<Utc>>,
    pub latest_history: Option<DateTime<Utc>>,
}

/// Canonical text form of a parameter set: object keys sorted at every
/// level, `null` treated as no parameters.
pub fn normalize_params(params: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    if params.is_null() {
        return "{}".to_string();
    }
    let mut out = String::new();
    write(params, &mut out);
    out
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Start of a look-back window ending at `now`. Windows reaching past the
/// Unix epoch, or too large to represent, start at the epoch.
fn window_start(now: DateTime<Utc>, span: Option<TimeDelta>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_sub_signed(span))
        .map_or(DateTime::UNIX_EPOCH, |start| start.max(DateTime::UNIX_EPOCH))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| CacheError::InvalidTimestamp(raw.to_string()))
}

/// Repository for the response cache and the five history tables.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cached payload for `(endpoint, params)` if stored less than `ttl` ago.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &Value,
        ttl: Duration,
    ) -> Result<Option<String>, CacheError> {
        self.get_at(endpoint, params, ttl, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        endpoint: &str,
        params: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CacheError> {
        let row = sqlx::query(
            "SELECT data, timestamp FROM response_cache WHERE endpoint = ? AND params = ?",
        )
        .bind(endpoint)
        .bind(normalize_params(params))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stored_at = parse_timestamp(&row.try_get::<String, _>("timestamp")?)?;
        let ttl = chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64);
        let fresh = match stored_at.checked_add_signed(ttl) {
            Some(expires_at) => now < expires_at,
            None => true,
        };

        if fresh {
            Ok(Some(row.try_get("data")?))
        } else {
            Ok(None)
        }
    }

    /// Upsert `data` for `(endpoint, params)`, stamped now.
    pub async fn put(
        &self,
        endpoint: &str,
        data: &str,
        params: &Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.put_at(endpoint, data, params, ttl, Utc::now()).await
    }

    pub async fn put_at(
        &self,
        endpoint: &str,
        data: &str,
        params: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO response_cache (endpoint, params, data, timestamp, ttl)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (endpoint, params) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp,
                ttl = excluded.ttl",
        )
        .bind(endpoint)
        .bind(normalize_params(params))
        .bind(data)
        .bind(format_timestamp(now))
        .bind(ttl.as_secs().min(i64::MAX as u64) as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a history row. Returns the new row id.
    pub async fn record_history(&self, fields: &HistoryFields, payload: &str) -> Result<i64, CacheError> {
        self.record_history_at(fields, payload, Utc::now()).await
    }

    pub async fn record_history_at(
        &self,
        fields: &HistoryFields,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, CacheError> {
        let timestamp = format_timestamp(now);

        let query = match fields {
            HistoryFields::NetworkStatus { status } => sqlx::query(
                "INSERT INTO network_status_history (status, timestamp, data) VALUES (?, ?, ?)",
            )
            .bind(status),
            HistoryFields::MintAnalytics {
                blocks_param,
                new_mints_count,
                pump_tokens_count,
            } => sqlx::query(
                "INSERT INTO mint_analytics_history
                 (blocks_param, new_mints_count, pump_tokens_count, timestamp, data)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(blocks_param)
            .bind(new_mints_count)
            .bind(pump_tokens_count),
            HistoryFields::PumpTrending {
                timeframe,
                sort_metric,
                tokens_count,
            } => sqlx::query(
                "INSERT INTO pump_trending_history
                 (timeframe, sort_metric, tokens_count, timestamp, data)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(timeframe)
            .bind(sort_metric)
            .bind(tokens_count),
            HistoryFields::RpcNodes { total_nodes } => sqlx::query(
                "INSERT INTO rpc_nodes_history (total_nodes, timestamp, data) VALUES (?, ?, ?)",
            )
            .bind(total_nodes),
            HistoryFields::Performance { max_tps, avg_tps } => sqlx::query(
                "INSERT INTO performance_history (max_tps, avg_tps, timestamp, data)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(max_tps)
            .bind(avg_tps),
        };

        let result = query
            .bind(timestamp)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Up to `limit` rows from the last `hours_back` hours, newest first.
    /// `limit` is clamped to `1..=MAX_HISTORY_LIMIT`.
    pub async fn query_history(
        &self,
        domain: HistoryDomain,
        limit: i64,
        hours_back: i64,
    ) -> Result<Vec<HistoryRecord>, CacheError> {
        self.query_history_at(domain, limit, hours_back, Utc::now()).await
    }

    pub async fn query_history_at(
        &self,
        domain: HistoryDomain,
        limit: i64,
        hours_back: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, CacheError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let since = format_timestamp(window_start(now, TimeDelta::try_hours(hours_back.max(0))));

        let sql = format!(
            "SELECT * FROM {} WHERE timestamp >= ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            domain.table()
        );
        let rows = sqlx::query(&sql)
            .bind(&since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .filter_map(|row| match decode_history_row(domain, row) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!("Skipping unreadable {} history row: {}", domain, err);
                    None
                }
            })
            .collect();

        Ok(records)
    }

    /// Delete cache rows that have expired or predate the retention cutoff,
    /// delete history rows older than the cutoff, and reclaim space.
    pub async fn cleanup(&self, retention_days: i64) -> Result<CleanupReport, CacheError> {
        self.cleanup_at(retention_days, Utc::now()).await
    }

    pub async fn cleanup_at(
        &self,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, CacheError> {
        let now_str = format_timestamp(now);
        let cutoff = format_timestamp(window_start(now, TimeDelta::try_days(retention_days.max(0))));

        let cache_rows_deleted = sqlx::query(
            "DELETE FROM response_cache
             WHERE timestamp < ?
                OR (julianday(?) - julianday(timestamp)) * 86400.0 >= ttl",
        )
        .bind(&cutoff)
        .bind(&now_str)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let mut history_rows_deleted = 0;
        for domain in HistoryDomain::ALL {
            let sql = format!("DELETE FROM {} WHERE timestamp < ?", domain.table());
            history_rows_deleted += sqlx::query(&sql)
                .bind(&cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }

        let report = CleanupReport {
            cache_rows_deleted,
            history_rows_deleted,
        };

        if report.total() > 0 {
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }

        tracing::info!(
            cache_rows = report.cache_rows_deleted,
            history_rows = report.history_rows_deleted,
            retention_days,
            "cache cleanup complete"
        );
        Ok(report)
    }

    pub async fn export_stats(&self) -> Result<StoreStats, CacheError> {
        let cache_entries: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM response_cache")
            .fetch_one(&self.pool)
            .await?
            .try_get("cnt")?;

        let mut history_rows = BTreeMap::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for domain in HistoryDomain::ALL {
            let sql = format!(
                "SELECT COUNT(*) AS cnt, MIN(timestamp) AS first, MAX(timestamp) AS last FROM {}",
                domain.table()
            );
            let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
            history_rows.insert(domain.as_str().to_string(), row.try_get::<i64, _>("cnt")?);

            if let Some(first) = row.try_get::<Option<String>, _>("first")? {
                let first = parse_timestamp(&first)?;
                earliest = Some(earliest.map_or(first, |e| e.min(first)));
            }
            if let Some(last) = row.try_get::<Option<String>, _>("last")? {
                let last = parse_timestamp(&last)?;
                latest = Some(latest.map_or(last, |l| l.max(last)));
            }
        }

        let total_size_bytes: i64 = sqlx::query(
            "SELECT page_count * page_size AS size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("size")?;

        Ok(StoreStats {
            cache_entries,
            history_rows,
            total_size_bytes,
            earliest_history: earliest,
            latest_history: latest,
        })
    }
}

fn decode_history_row(domain: HistoryDomain, row: &SqliteRow) -> Result<HistoryRecord, CacheError> {
    let fields = match domain {
        HistoryDomain::NetworkStatus => HistoryFields::NetworkStatus {
            status: row.try_get("status")?,
        },
        HistoryDomain::MintAnalytics => HistoryFields::MintAnalytics {
            blocks_param: row.try_get("blocks_param")?,
            new_mints_count: row.try_get("new_mints_count")?,
            pump_tokens_count: row.try_get("pump_tokens_count")?,
        },
        HistoryDomain::PumpTrending => HistoryFields::PumpTrending {
            timeframe: row.try_get("timeframe")?,
            sort_metric: row.try_get("sort_metric")?,
            tokens_count: row.try_get("tokens_count")?,
        },
        HistoryDomain::RpcNodes => HistoryFields::RpcNodes {
            total_nodes: row.try_get("total_nodes")?,
        },
        HistoryDomain::Performance => HistoryFields::Performance {
            max_tps: row.try_get("max_tps")?,
            avg_tps: row.try_get("avg_tps")?,
        },
    };

    let raw: String = row.try_get("data")?;
    // Payloads that are not JSON are still returned, as a string.
    let data = serde_json::from_str(&raw).unwrap_or(Value::String(raw));

    Ok(HistoryRecord {
        id: row.try_get("id")?,
        domain,
        fields,
        timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?)?,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use crate::db::create_pool;

    async fn make_store() -> CacheStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        CacheStore::new(pool)
    }

    fn status(label: &str) -> HistoryFields {
        HistoryFields::NetworkStatus {
            status: label.to_string(),
        }
    }

    #[test]
    fn normalize_sorts_keys_at_every_level() {
        let a = json!({ "b": 1, "a": { "y": [2, { "d": 1, "c": 0 }], "x": null } });
        let b = json!({ "a": { "x": null, "y": [2, { "c": 0, "d": 1 }] }, "b": 1 });
        assert_eq!(normalize_params(&a), normalize_params(&b));
        assert_eq!(
            normalize_params(&a),
            r#"{"a":{"x":null,"y":[2,{"c":0,"d":1}]},"b":1}"#
        );
        assert_eq!(normalize_params(&Value::Null), "{}");
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_payload() {
        let store = make_store().await;
        let payload = r#"{"status":"healthy","slot":  250000000}"#;

        store
            .put("/network/status", payload, &json!({ "b": "2", "a": "1" }), Duration::from_secs(30))
            .await
            .unwrap();

        let hit = store
            .get("/network/status", &json!({ "a": "1", "b": "2" }), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some(payload));
    }

    #[tokio::test]
    async fn ttl_boundary_decides_hit_or_miss() {
        let store = make_store().await;
        let t0 = Utc::now();
        let ttl = Duration::from_secs(5);
        let params = json!({});

        store.put_at("/k", "\"v\"", &params, ttl, t0).await.unwrap();

        let at_4s = store
            .get_at("/k", &params, ttl, t0 + ChronoDuration::seconds(4))
            .await
            .unwrap();
        assert_eq!(at_4s.as_deref(), Some("\"v\""));

        let at_6s = store
            .get_at("/k", &params, ttl, t0 + ChronoDuration::seconds(6))
            .await
            .unwrap();
        assert!(at_6s.is_none());

        // A miss is a pure read: the row is still there.
        assert_eq!(store.export_stats().await.unwrap().cache_entries, 1);
    }

    #[tokio::test]
    async fn different_params_are_different_entries() {
        let store = make_store().await;
        let ttl = Duration::from_secs(60);

        store.put("/pump/trending", "1", &json!({ "timeframe": "1h" }), ttl).await.unwrap();
        store.put("/pump/trending", "2", &json!({ "timeframe": "24h" }), ttl).await.unwrap();
        store.put("/pump/trending", "3", &json!({ "timeframe": "1h" }), ttl).await.unwrap();

        let one_hour = store.get("/pump/trending", &json!({ "timeframe": "1h" }), ttl).await.unwrap();
        assert_eq!(one_hour.as_deref(), Some("3"));
        assert_eq!(store.export_stats().await.unwrap().cache_entries, 2);
    }

    #[tokio::test]
    async fn query_history_is_newest_first_within_window() {
        let store = make_store().await;
        let now = Utc::now();

        store
            .record_history_at(&status("old"), "{}", now - ChronoDuration::hours(30))
            .await
            .unwrap();
        store
            .record_history_at(&status("older"), "{}", now - ChronoDuration::hours(2))
            .await
            .unwrap();
        store
            .record_history_at(&status("newest"), r#"{"status":"newest"}"#, now - ChronoDuration::minutes(1))
            .await
            .unwrap();

        let rows = store
            .query_history_at(HistoryDomain::NetworkStatus, 10, 24, now)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields, status("newest"));
        assert_eq!(rows[0].data, json!({ "status": "newest" }));
        assert_eq!(rows[1].fields, status("older"));

        let limited = store
            .query_history_at(HistoryDomain::NetworkStatus, 1, 24, now)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn every_domain_round_trips_its_fields() {
        let store = make_store().await;
        let samples = vec![
            status("healthy"),
            HistoryFields::MintAnalytics {
                blocks_param: 10,
                new_mints_count: 4,
                pump_tokens_count: 2,
            },
            HistoryFields::PumpTrending {
                timeframe: "1h".into(),
                sort_metric: "volume".into(),
                tokens_count: 25,
            },
            HistoryFields::RpcNodes { total_nodes: 3100 },
            HistoryFields::Performance {
                max_tps: 4200.0,
                avg_tps: 3100.5,
            },
        ];

        for fields in &samples {
            let id = store.record_history(fields, "{}").await.unwrap();
            assert!(id > 0);
        }

        for fields in &samples {
            let rows = store.query_history(fields.domain(), 10, 1).await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(&rows[0].fields, fields);
        }
    }

    #[tokio::test]
    async fn cleanup_removes_expired_and_old_rows_and_is_idempotent() {
        let store = make_store().await;
        let now = Utc::now();
        let params = json!({});

        // expired by ttl
        store
            .put_at("/a", "1", &params, Duration::from_secs(60), now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        // still fresh
        store
            .put_at("/b", "2", &params, Duration::from_secs(3600), now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        // history beyond retention and within it
        store
            .record_history_at(&status("ancient"), "{}", now - ChronoDuration::days(8))
            .await
            .unwrap();
        store
            .record_history_at(&status("recent"), "{}", now - ChronoDuration::days(1))
            .await
            .unwrap();

        let first = store.cleanup_at(7, now).await.unwrap();
        assert_eq!(
            first,
            CleanupReport {
                cache_rows_deleted: 1,
                history_rows_deleted: 1,
            }
        );

        let second = store.cleanup_at(7, now).await.unwrap();
        assert_eq!(second.total(), 0);

        let fresh = store.get_at("/b", &params, Duration::from_secs(3600), now).await.unwrap();
        assert_eq!(fresh.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn oversized_history_window_returns_everything() {
        let store = make_store().await;
        let now = Utc::now();
        store
            .record_history_at(&status("last-year"), "{}", now - ChronoDuration::days(365))
            .await
            .unwrap();

        for hours in [1_000_000_000_000, i64::MAX] {
            let rows = store
                .query_history_at(HistoryDomain::NetworkStatus, 10, hours, now)
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
        }
    }

    #[tokio::test]
    async fn oversized_retention_keeps_history_but_drops_expired_cache() {
        let store = make_store().await;
        let now = Utc::now();
        store
            .put_at("/a", "1", &json!({}), Duration::from_secs(60), now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        store
            .record_history_at(&status("ancient"), "{}", now - ChronoDuration::days(3650))
            .await
            .unwrap();

        let report = store.cleanup_at(100_000_000, now).await.unwrap();
        assert_eq!(report.cache_rows_deleted, 1);
        assert_eq!(report.history_rows_deleted, 0);

        let report = store.cleanup_at(i64::MAX, now).await.unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn window_start_floors_at_epoch() {
        let now = Utc::now();
        assert_eq!(window_start(now, None), DateTime::UNIX_EPOCH);
        assert_eq!(
            window_start(now, TimeDelta::try_days(100_000)),
            DateTime::UNIX_EPOCH
        );
        assert_eq!(
            window_start(now, TimeDelta::try_hours(2)),
            now - ChronoDuration::hours(2)
        );
    }

    #[tokio::test]
    async fn export_stats_counts_rows_and_time_span() {
        let store = make_store().await;
        let now = Utc::now();

        store.put("/a", "1", &json!({}), Duration::from_secs(60)).await.unwrap();
        store
            .record_history_at(&status("a"), "{}", now - ChronoDuration::hours(3))
            .await
            .unwrap();
        store
            .record_history_at(&HistoryFields::RpcNodes { total_nodes: 5 }, "{}", now)
            .await
            .unwrap();

        let stats = store.export_stats().await.unwrap();
        assert_eq!(stats.cache_entries, 1);
        assert_eq!(stats.history_rows["network_status"], 1);
        assert_eq!(stats.history_rows["rpc_nodes"], 1);
        assert_eq!(stats.history_rows["performance"], 0);
        assert!(stats.total_size_bytes > 0);

        let earliest = stats.earliest_history.unwrap();
        let latest = stats.latest_history.unwrap();
        assert!(latest - earliest >= ChronoDuration::hours(3) - ChronoDuration::seconds(1));
    }

    #[tokio::test]
    async fn empty_store_has_no_history_span() {
        let store = make_store().await;
        let stats = store.export_stats().await.unwrap();
        assert!(stats.earliest_history.is_none());
        assert!(stats.latest_history.is_none());
    }
}
