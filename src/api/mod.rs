//! HTTP API for health checks, status, and monitoring
//!
//! Read-only surface for ops dashboards: nothing here mutates a record.

use crate::chain::ChainRegistry;
use crate::config::ApiConfig;
use crate::error::ExecutorResult;
use crate::pipeline::StatusReconciler;
use crate::queue::{QueueClient, QueueStore};
use crate::records::{Ledger, LedgerStats, PendingTransaction};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub instance_id: String,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<ChainRegistry>,
    pub store: Arc<dyn QueueStore>,
    pub queue: Arc<QueueClient>,
    pub reconciler: Arc<StatusReconciler>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> ExecutorResult<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/queue", get(get_queue))
        .route("/history", get(get_history))
        .route("/stuck", get(get_stuck))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::ExecutorError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::ExecutorError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store and chain RPC connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();

    let chain_health = state.registry.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let response = ReadinessResponse {
        ready: store_ok && chains_ok,
        store: store_ok,
        chains: chains_ok,
        details: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
    };

    let code = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

/// Executor status and queue statistics
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.clone(),
        chains: state.registry.chain_ids(),
        default_chain_id: state.registry.default_chain_id(),
        stats: state.ledger.stats().await,
    })
}

/// Active (non-terminal) records
async fn get_queue(State(state): State<AppState>) -> impl IntoResponse {
    let mut active = state.ledger.active().await;
    active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(QueueResponse {
        count: active.len(),
        records: active,
    })
}

/// Settled records from the bounded history bucket
async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.queue.history().await;
    Json(QueueResponse {
        count: records.len(),
        records,
    })
}

/// Records needing manual intervention: stale submissions and adaptation
/// failures awaiting user action in the wallet
async fn get_stuck(State(state): State<AppState>) -> impl IntoResponse {
    Json(StuckResponse {
        stale: state.reconciler.stale_ids().await,
        action_required: state.ledger.action_required().await,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance_id: String,
    chains: Vec<u64>,
    default_chain_id: u64,
    stats: LedgerStats,
}

#[derive(Serialize)]
struct QueueResponse {
    count: usize,
    records: Vec<PendingTransaction>,
}

#[derive(Serialize)]
struct StuckResponse {
    stale: Vec<String>,
    action_required: HashMap<String, String>,
}
