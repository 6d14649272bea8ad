//! Status reconciler: poll chains for receipts of submitted transactions
//!
//! Receipt lookups for independent transactions run concurrently; status
//! writes stay serialized through the ledger. A submitted transaction with
//! no receipt keeps its status and is retried next cycle; past the stale
//! threshold it is surfaced for manual intervention without touching the
//! state machine.

use crate::chain::ReceiptLookup;
use crate::error::ExecutorResult;
use crate::queue::QueueStore;
use crate::records::{Ledger, PendingTransaction, TxStatus};

use dashmap::DashMap;
use ethers::types::TransactionReceipt;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct StatusReconciler {
    lookup: Arc<dyn ReceiptLookup>,
    ledger: Arc<Ledger>,
    store: Arc<dyn QueueStore>,
    /// When each submitted hash was first seen by the reconciler
    first_seen: DashMap<String, Instant>,
    stale_after: Duration,
    /// Ids currently past the stale threshold, surfaced via the API
    stale: RwLock<HashSet<String>>,
}

impl StatusReconciler {
    pub fn new(
        lookup: Arc<dyn ReceiptLookup>,
        ledger: Arc<Ledger>,
        store: Arc<dyn QueueStore>,
        stale_after: Duration,
    ) -> Self {
        Self {
            lookup,
            ledger,
            store,
            first_seen: DashMap::new(),
            stale_after,
            stale: RwLock::new(HashSet::new()),
        }
    }

    /// One reconcile cycle. Returns the number of records settled.
    pub async fn run_once(&self) -> ExecutorResult<usize> {
        let submitted = self.ledger.submitted().await;
        if submitted.is_empty() {
            return Ok(0);
        }

        // Read-only receipt polling fans out; classification and writes
        // happen sequentially afterwards.
        let lookups = submitted.iter().filter_map(|tx| {
            let hash = tx.tx_hash?;
            let chain_id = tx.chain_id.unwrap_or_default();
            Some(async move { (tx, self.lookup.transaction_receipt(chain_id, hash).await) })
        });

        let mut settled = 0;
        for (tx, result) in join_all(lookups).await {
            match result {
                Ok(Some(receipt)) => {
                    if let Some(outcome) = classify_receipt(&receipt) {
                        self.settle(tx, outcome).await;
                        settled += 1;
                    } else {
                        debug!(id = %tx.id, "receipt without status field, retrying next cycle");
                    }
                }
                Ok(None) => self.check_stale(tx).await,
                Err(e) => {
                    warn!(id = %tx.id, "receipt poll failed, retrying next cycle: {}", e);
                }
            }
        }

        Ok(settled)
    }

    async fn settle(&self, tx: &PendingTransaction, outcome: TxStatus) {
        info!(
            id = %tx.id,
            hash = ?tx.tx_hash,
            outcome = %outcome,
            "receipt classified"
        );

        if let Err(e) = self.ledger.apply_status(&tx.id, outcome, None).await {
            warn!(id = %tx.id, "ledger settle refused: {}", e);
            return;
        }
        if let Err(e) = self.store.update_status(&tx.id, outcome, None).await {
            crate::metrics::record_store_error("update");
            warn!(id = %tx.id, "settle writeback failed, will retry next poll: {}", e);
        }

        let chain_id = tx.chain_id.unwrap_or_default();
        match outcome {
            TxStatus::Confirmed => crate::metrics::record_confirmed(chain_id),
            TxStatus::Failed => {
                crate::metrics::record_failed(chain_id);
                if let Some(hash) = tx.tx_hash {
                    let revert = crate::error::ExecutorError::Reverted {
                        chain_id,
                        tx_hash: format!("{:?}", hash),
                    };
                    warn!(id = %tx.id, "{}", revert);
                }
            }
            _ => {}
        }

        self.first_seen.remove(&tx.id);
        self.stale.write().await.remove(&tx.id);
        crate::metrics::record_stale_count(self.stale.read().await.len());
    }

    /// No receipt yet: start or check the stale clock
    async fn check_stale(&self, tx: &PendingTransaction) {
        let first = *self
            .first_seen
            .entry(tx.id.clone())
            .or_insert_with(Instant::now);

        if first.elapsed() >= self.stale_after {
            let newly_stale = self.stale.write().await.insert(tx.id.clone());
            if newly_stale {
                // Probe the mempool to tell a slow chain from a dropped tx
                let known = match (tx.tx_hash, tx.chain_id) {
                    (Some(hash), Some(chain_id)) => self
                        .lookup
                        .transaction_by_hash(chain_id, hash)
                        .await
                        .ok()
                        .flatten()
                        .is_some(),
                    _ => false,
                };
                warn!(
                    id = %tx.id,
                    hash = ?tx.tx_hash,
                    elapsed_secs = first.elapsed().as_secs(),
                    known_to_chain = known,
                    "submitted transaction has no receipt past the stale threshold, needs manual intervention"
                );
                crate::metrics::record_stale_count(self.stale.read().await.len());
            }
        }
    }

    /// Ids past the stale threshold, for the status API
    pub async fn stale_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.stale.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Map a receipt onto the state machine
fn classify_receipt(receipt: &TransactionReceipt) -> Option<TxStatus> {
    match receipt.status.map(|s| s.as_u64()) {
        Some(1) => Some(TxStatus::Confirmed),
        Some(_) => Some(TxStatus::Failed),
        None => None,
    }
}
