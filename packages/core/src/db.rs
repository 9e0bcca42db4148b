//! SQLite connection pool and schema.
//!
//! The schema is applied on every start with `IF NOT EXISTS`, so opening
//! an existing database is a no-op. In-memory databases are limited to a
//! single connection; otherwise each pooled connection would see its own
//! empty database.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS response_cache (
        endpoint  TEXT NOT NULL,
        params    TEXT NOT NULL,
        data      TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        ttl       INTEGER NOT NULL,
        PRIMARY KEY (endpoint, params)
    )",
    "CREATE INDEX IF NOT EXISTS idx_response_cache_timestamp ON response_cache (timestamp)",
    "CREATE TABLE IF NOT EXISTS network_status_history (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        status    TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        data      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_network_status_history_timestamp
        ON network_status_history (timestamp)",
    "CREATE TABLE IF NOT EXISTS mint_analytics_history (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        blocks_param      INTEGER NOT NULL,
        new_mints_count   INTEGER NOT NULL,
        pump_tokens_count INTEGER NOT NULL,
        timestamp         TEXT NOT NULL,
        data              TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_mint_analytics_history_timestamp
        ON mint_analytics_history (timestamp)",
    "CREATE TABLE IF NOT EXISTS pump_trending_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        timeframe    TEXT NOT NULL,
        sort_metric  TEXT NOT NULL,
        tokens_count INTEGER NOT NULL,
        timestamp    TEXT NOT NULL,
        data         TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_pump_trending_history_timestamp
        ON pump_trending_history (timestamp)",
    "CREATE TABLE IF NOT EXISTS rpc_nodes_history (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        total_nodes INTEGER NOT NULL,
        timestamp   TEXT NOT NULL,
        data        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_rpc_nodes_history_timestamp
        ON rpc_nodes_history (timestamp)",
    "CREATE TABLE IF NOT EXISTS performance_history (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        max_tps   REAL NOT NULL,
        avg_tps   REAL NOT NULL,
        timestamp TEXT NOT NULL,
        data      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_performance_history_timestamp
        ON performance_history (timestamp)",
];

/// Open (creating if missing) the database at `url` and apply the schema.
pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    let pool_options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = pool_options.connect_with(options).await?;

    apply_schema(&pool).await?;
    tracing::debug!("Database ready at {}", url);
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn schema_creates_all_tables() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let mut names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "mint_analytics_history",
                "network_status_history",
                "performance_history",
                "pump_trending_history",
                "response_cache",
                "rpc_nodes_history",
            ]
        );
    }

    #[tokio::test]
    async fn applying_schema_twice_is_harmless() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(apply_schema(&pool).await.is_ok());
    }
}
