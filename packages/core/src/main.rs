use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use serde::Serialize;
use tokio::signal;
use tokio::sync::watch;

use solana_rpc_gateway::api::{self, AppState};
use solana_rpc_gateway::cache::CacheStore;
use solana_rpc_gateway::cli::{Cli, Command};
use solana_rpc_gateway::config::Config;
use solana_rpc_gateway::db;
use solana_rpc_gateway::error::AppError;
use solana_rpc_gateway::logging::init_logging;
use solana_rpc_gateway::metrics::AppMetrics;
use solana_rpc_gateway::rpc::{
    ConnectionPool, DiscoveryMode, EndpointDiscovery, HttpTransport, PoolMaintenance, RateLimiter,
    RpcTransport,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging("info");

    if let Err(err) = run(cli).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let endpoints = cli.endpoints.clone();
    let mut config = Config::from_lookup(|key| match (key, &endpoints) {
        ("RPC_ENDPOINTS", Some(list)) => Some(list.clone()),
        _ => std::env::var(key).ok(),
    })
    .map_err(AppError::Config)?;

    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value).map_err(|err| AppError::Parse(err.to_string()))?;
    println!("{}", out);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = load_config(&cli)?;
    let command = cli.command();
    tracing::debug!(?command, "starting with config: {:?}", config);

    let cache = Arc::new(CacheStore::new(db::create_pool(&config.database_url).await?));

    match command {
        Command::Cleanup { retention_days } => {
            let report = cache
                .cleanup(retention_days.unwrap_or(config.retention_days))
                .await?;
            return print_json(&report);
        }
        Command::ExportStats => {
            let stats = cache.export_stats().await?;
            return print_json(&stats);
        }
        _ => {}
    }

    let metrics = Arc::new(AppMetrics::new().map_err(|err| AppError::Unknown(err.to_string()))?);
    let transport: Arc<dyn RpcTransport> =
        Arc::new(HttpTransport::new().map_err(|err| AppError::Config(err.to_string()))?);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter_config()));

    let pool = Arc::new(
        ConnectionPool::initialize(
            config.endpoints.clone(),
            config.pool_config(),
            rate_limiter,
            Arc::clone(&transport),
        )
        .map_err(|err| AppError::Config(err.to_string()))?
        .with_metrics(Arc::clone(&metrics)),
    );

    let maintenance = Arc::new(
        PoolMaintenance::new(
            Arc::clone(&pool),
            EndpointDiscovery::new(transport, config.discovery_config()),
            config.maintenance_config(),
        )
        .with_metrics(Arc::clone(&metrics)),
    );

    match command {
        Command::ResetPool => {
            pool.reset(config.endpoints.clone()).await?;
            if let Err(err) = maintenance.update_pool(DiscoveryMode::Full).await {
                tracing::warn!("Discovery found no usable endpoints, keeping configured list: {}", err);
            }
            let endpoints = pool.endpoints().await;
            print_json(&*endpoints)
        }
        Command::CheckHealth => {
            pool.check_all_endpoints_health().await;
            pool.sort_endpoints_by_performance().await;
            print_json(&pool.endpoint_summaries().await)
        }
        _ => serve(config, pool, maintenance, cache, metrics).await,
    }
}

async fn serve(
    config: Config,
    pool: Arc<ConnectionPool>,
    maintenance: Arc<PoolMaintenance>,
    cache: Arc<CacheStore>,
    metrics: Arc<AppMetrics>,
) -> Result<(), AppError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = maintenance.spawn(shutdown_rx);

    let app = api::create_router(
        AppState {
            pool: Arc::clone(&pool),
            cache,
            metrics,
        },
        Arc::new(config.cache_config()),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .map_err(|err| AppError::Network(format!("failed to bind port {}: {}", config.api_port, err)))?;
    tracing::info!("RPC gateway listening on port {}", config.api_port);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Network(err.to_string()));

    // Stop the maintenance loops before tearing the pool down.
    let _ = shutdown_tx.send(true);
    for handle in loops {
        if let Err(err) = handle.await {
            tracing::error!("maintenance task panicked: {}", err);
        }
    }
    pool.close();
    tracing::info!("Shutdown complete");

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
