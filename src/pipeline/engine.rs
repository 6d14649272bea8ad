//! Pipeline engine: independently scheduled task loops
//!
//! Queue polling, execution (resolver then executor), reconciliation, and
//! retention cleanup each run on their own period with jitter, so the
//! loops never hit the store or the chain RPC endpoints in lockstep. They
//! communicate only through the shared ledger, the store, and the queue
//! event channel.

use super::executor::TransactionExecutor;
use super::reconciler::StatusReconciler;
use super::resolver::DependencyResolver;
use crate::config::ExecutorConfig;
use crate::queue::{QueueClient, QueueStore};

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

pub struct PipelineEngine {
    queue: Arc<QueueClient>,
    executor: Arc<TransactionExecutor>,
    resolver: Arc<DependencyResolver>,
    reconciler: Arc<StatusReconciler>,
    store: Arc<dyn QueueStore>,
    config: ExecutorConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl PipelineEngine {
    pub fn new(
        queue: Arc<QueueClient>,
        executor: Arc<TransactionExecutor>,
        resolver: Arc<DependencyResolver>,
        reconciler: Arc<StatusReconciler>,
        store: Arc<dyn QueueStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            resolver,
            reconciler,
            store,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Queue polling loop: fetch the store, compute deltas
    pub async fn run_queue_loop(&self) {
        info!(
            period_ms = self.config.queue_poll_interval_ms,
            "queue poll loop started"
        );
        loop {
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.queue.poll_once().await {
                // Transient store trouble: log and retry next poll
                error!("queue poll failed: {}", e);
            }
            tokio::time::sleep(jittered(
                self.config.queue_poll_interval_ms,
                self.config.poll_jitter_ms,
            ))
            .await;
        }
        info!("queue poll loop stopped");
    }

    /// Execution loop: one resolver pass, then at most one submission.
    /// The resolver runs on this cadence so a newly confirmed approval is
    /// released within one reconcile interval.
    pub async fn run_execution_loop(&self) {
        info!(
            period_ms = self.config.execute_interval_ms,
            "execution loop started"
        );
        loop {
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.resolver.run_once().await {
                error!("dependency resolution failed: {}", e);
            }
            match self.executor.run_once().await {
                Ok(_) => {}
                Err(e) => error!("execution cycle failed: {}", e),
            }
            tokio::time::sleep(Duration::from_millis(self.config.execute_interval_ms)).await;
        }
        info!("execution loop stopped");
    }

    /// Reconcile loop: poll receipts for submitted transactions
    pub async fn run_reconcile_loop(&self) {
        info!(
            period_ms = self.config.reconcile_interval_ms,
            "reconcile loop started"
        );
        loop {
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.reconciler.run_once().await {
                error!("reconcile cycle failed: {}", e);
            }
            tokio::time::sleep(jittered(
                self.config.reconcile_interval_ms,
                self.config.poll_jitter_ms,
            ))
            .await;
        }
        info!("reconcile loop stopped");
    }

    /// Retention loop: clear settled store rows past the window
    pub async fn run_cleanup_loop(&self) {
        let period = Duration::from_secs(300);
        loop {
            if *self.shutdown.read().await {
                break;
            }
            tokio::time::sleep(period).await;

            let cutoff =
                Utc::now() - chrono::Duration::seconds(self.config.settled_retention_secs as i64);
            if let Err(e) = self.store.clear_settled_before(cutoff).await {
                error!("retention cleanup failed: {}", e);
            }
        }
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("pipeline engine shutdown initiated");
    }
}

/// Period plus a uniform random spread
fn jittered(period_ms: u64, jitter_ms: u64) -> Duration {
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    Duration::from_millis(period_ms + jitter)
}
