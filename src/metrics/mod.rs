//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Queue depth by status
//! - Submission outcomes
//! - Approval releases and chain switches
//! - Store and RPC health

use crate::records::{PendingTransaction, TxStatus};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};
use tracing::info;

lazy_static! {
    // Queue metrics
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "meridian_queue_depth",
        "Records in the queue by status",
        &["status"]
    ).unwrap();

    // Submission metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "meridian_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "meridian_transactions_confirmed_total",
        "Total transactions confirmed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "meridian_transactions_failed_total",
        "Total transactions failed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "meridian_transactions_rejected_total",
        "Total signature requests rejected by the user",
        &["chain_id"]
    ).unwrap();

    // Pipeline metrics
    pub static ref APPROVALS_RELEASED: Counter = register_counter!(
        "meridian_approvals_released_total",
        "Total dependent transactions released by a confirmed approval"
    ).unwrap();

    pub static ref CHAIN_SWITCHES: CounterVec = register_counter_vec!(
        "meridian_chain_switches_total",
        "Total wallet network switches",
        &["chain_id"]
    ).unwrap();

    pub static ref STALE_SUBMISSIONS: Gauge = register_gauge!(
        "meridian_stale_submissions",
        "Submitted transactions without a receipt past the stale threshold"
    ).unwrap();

    // Dependency health
    pub static ref STORE_ERRORS: CounterVec = register_counter_vec!(
        "meridian_store_errors_total",
        "Total store operation failures",
        &["operation"]
    ).unwrap();

    pub static ref CHAIN_RPC_HEALTHY: GaugeVec = register_gauge_vec!(
        "meridian_chain_rpc_healthy",
        "Chain RPC health (1=healthy, 0=unhealthy)",
        &["chain_id"]
    ).unwrap();

    pub static ref HEALTH_CHECKS: Counter = register_counter!(
        "meridian_health_checks_total",
        "Total health check passes"
    ).unwrap();
}

pub fn record_queue_depth(records: &[PendingTransaction]) {
    for status in [
        TxStatus::Pending,
        TxStatus::ApprovalPending,
        TxStatus::Submitted,
        TxStatus::Confirmed,
        TxStatus::Failed,
        TxStatus::Rejected,
    ] {
        let count = records.iter().filter(|r| r.status == status).count();
        QUEUE_DEPTH
            .with_label_values(&[status.as_str()])
            .set(count as f64);
    }
}

pub fn record_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_failed(chain_id: u64) {
    TX_FAILED.with_label_values(&[&chain_id.to_string()]).inc();
}

pub fn record_rejected(chain_id: u64) {
    TX_REJECTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_approval_released() {
    APPROVALS_RELEASED.inc();
}

pub fn record_chain_switch(chain_id: u64) {
    CHAIN_SWITCHES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_stale_count(count: usize) {
    STALE_SUBMISSIONS.set(count as f64);
}

pub fn record_store_error(operation: &str) {
    STORE_ERRORS.with_label_values(&[operation]).inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_RPC_HEALTHY
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_check() {
    HEALTH_CHECKS.inc();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = format!("0.0.0.0:{}", self.port);
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
