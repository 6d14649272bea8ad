//! Meridian Executor - pending-transaction pipeline across chains
//!
//! Polls the remote queue for transactions the agent backend has staged,
//! drives the user's wallet through network adaptation and signing one
//! record at a time, and tracks on-chain finality until every record
//! settles.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod pipeline;
mod queue;
mod records;
mod wallet;

use chain::ChainRegistry;
use config::Settings;
use metrics::MetricsServer;
use pipeline::{DependencyResolver, PipelineEngine, StatusReconciler, TransactionExecutor};
use queue::{PgStore, QueueClient, QueueStore};
use records::Ledger;
use wallet::{SigningGate, WalletBridge, WalletProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Meridian Executor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let instance_id = settings.instance_id();
    info!(
        instance_id = %instance_id,
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Remote store the agent backend writes into
    let pg_store = Arc::new(PgStore::new(&settings.database).await?);
    info!("Store connection established");

    pg_store.run_migrations().await?;
    let store: Arc<dyn QueueStore> = pg_store;

    // Chain registry with one RPC pool per enabled chain
    let registry = Arc::new(ChainRegistry::new(&settings)?);
    info!("Chain registry initialized");

    // Wallet bridge
    let wallet: Arc<dyn WalletProvider> = Arc::new(WalletBridge::new(&settings.wallet.url)?);
    info!("Wallet bridge configured for {}", settings.wallet.url);

    // Shared ledger and pipeline components
    let ledger = Arc::new(Ledger::new());
    let gate = SigningGate::new();

    let queue_client = Arc::new(QueueClient::new(
        store.clone(),
        ledger.clone(),
        registry.clone(),
        settings.executor.history_limit,
    ));
    let executor = Arc::new(TransactionExecutor::new(
        wallet,
        registry.clone(),
        ledger.clone(),
        store.clone(),
        gate,
        Duration::from_millis(settings.executor.settle_delay_ms),
    ));
    let resolver = Arc::new(DependencyResolver::new(ledger.clone(), store.clone()));
    let reconciler = Arc::new(StatusReconciler::new(
        registry.clone(),
        ledger.clone(),
        store.clone(),
        Duration::from_secs(settings.executor.stale_after_secs),
    ));

    let engine = Arc::new(PipelineEngine::new(
        queue_client.clone(),
        executor,
        resolver,
        reconciler.clone(),
        store.clone(),
        settings.executor.clone(),
    ));
    info!("Pipeline engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            instance_id: instance_id.clone(),
            ledger: ledger.clone(),
            registry: registry.clone(),
            store: store.clone(),
            queue: queue_client.clone(),
            reconciler: reconciler.clone(),
        };
        let api_config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Independently scheduled pipeline loops
    let queue_handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_queue_loop().await }
    });
    let execution_handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_execution_loop().await }
    });
    let reconcile_handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_reconcile_loop().await }
    });
    let cleanup_handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_cleanup_loop().await }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let registry = registry.clone();
        let store = store.clone();
        let interval = settings.executor.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let health = registry.health_check().await;
                for (chain_id, healthy) in health {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                }

                metrics::record_health_check();
            }
        }
    });

    info!("Meridian Executor is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    engine.stop().await;

    // Abort background tasks
    api_handle.abort();
    queue_handle.abort();
    execution_handle.abort();
    reconcile_handle.abort();
    cleanup_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Meridian Executor stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,meridian_executor=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod ztmp_repro;
