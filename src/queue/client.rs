//! Queue client: polls the remote store and computes deltas
//!
//! Each poll is diffed against the previous snapshot to spot new arrivals
//! (pre-resolve their target chain, signal visibility) and records that
//! settled since last time (moved to a bounded history bucket). Store-fetch
//! failures are logged and retried on the next poll; they never interrupt
//! the pipeline.

use super::QueueStore;
use crate::chain::ChainRegistry;
use crate::error::ExecutorResult;
use crate::records::{Ledger, PendingTransaction, TxStatus};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Visibility signals emitted on queue deltas
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A record appeared that was not in the previous poll
    Arrived { id: String, chain_id: u64 },
    /// A record crossed from active to terminal
    Settled { id: String, status: TxStatus },
}

/// Outcome of one poll
#[derive(Debug, Default)]
pub struct QueueDelta {
    pub arrived: Vec<String>,
    pub settled: Vec<(String, TxStatus)>,
}

pub struct QueueClient {
    store: Arc<dyn QueueStore>,
    ledger: Arc<Ledger>,
    registry: Arc<ChainRegistry>,
    events: broadcast::Sender<QueueEvent>,
    /// id -> status as of the previous poll
    previous: RwLock<HashMap<String, TxStatus>>,
    /// Settled records, newest last, bounded
    history: RwLock<VecDeque<PendingTransaction>>,
    history_limit: usize,
}

impl QueueClient {
    pub fn new(
        store: Arc<dyn QueueStore>,
        ledger: Arc<Ledger>,
        registry: Arc<ChainRegistry>,
        history_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store,
            ledger,
            registry,
            events,
            previous: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_limit,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// One poll cycle: fetch, diff, merge into the ledger, push local
    /// progress the store missed.
    pub async fn poll_once(&self) -> ExecutorResult<QueueDelta> {
        let fetched = match self.store.fetch_pending().await {
            Ok(fetched) => fetched,
            Err(e) => {
                crate::metrics::record_store_error("fetch");
                return Err(e);
            }
        };

        crate::metrics::record_queue_depth(&fetched);

        let mut delta = QueueDelta::default();
        {
            let previous = self.previous.read().await;
            for record in &fetched {
                match previous.get(&record.id) {
                    None => delta.arrived.push(record.id.clone()),
                    Some(old) if !old.is_terminal() && record.status.is_terminal() => {
                        delta.settled.push((record.id.clone(), record.status));
                    }
                    Some(_) => {}
                }
            }
        }

        // Settled records go to the bounded history bucket
        if !delta.settled.is_empty() {
            let by_id: HashMap<_, _> = fetched.iter().map(|r| (r.id.clone(), r)).collect();
            let mut history = self.history.write().await;
            for (id, status) in &delta.settled {
                info!(id = %id, status = %status, "record settled");
                if let Some(record) = by_id.get(id) {
                    history.push_back((*record).clone());
                    while history.len() > self.history_limit {
                        history.pop_front();
                    }
                }
                let _ = self.events.send(QueueEvent::Settled {
                    id: id.clone(),
                    status: *status,
                });
            }
        }

        // New arrivals: pre-resolve the target chain and signal visibility
        for id in &delta.arrived {
            if let Some(record) = fetched.iter().find(|r| &r.id == id) {
                match self.registry.resolve_target(record) {
                    Ok(chain_id) => {
                        debug!(id = %id, chain_id, "new arrival, target chain resolved");
                        let _ = self.events.send(QueueEvent::Arrived {
                            id: id.clone(),
                            chain_id,
                        });
                    }
                    Err(e) => {
                        warn!(id = %id, "new arrival with unresolvable chain: {}", e);
                    }
                }
            }
        }

        let snapshot: HashMap<String, TxStatus> =
            fetched.iter().map(|r| (r.id.clone(), r.status)).collect();
        let live_ids: HashSet<String> = snapshot.keys().cloned().collect();

        // Merge into the ledger; records the ledger has progressed further
        // than the store get written back (the §7 retry path).
        let ahead = self.ledger.sync(fetched).await;
        for record in ahead {
            if let Err(e) = self
                .store
                .update_status(&record.id, record.status, record.tx_hash)
                .await
            {
                crate::metrics::record_store_error("update");
                warn!(id = %record.id, "store writeback failed, will retry next poll: {}", e);
            }
        }

        // Fix arrival chains after the merge so the pin lands on the ledger copy
        for id in &delta.arrived {
            if let Some(record) = self.ledger.get(id).await {
                if record.chain_id.is_none() {
                    if let Ok(chain_id) = self.registry.resolve_target(&record) {
                        self.ledger.fix_chain(id, chain_id).await;
                    }
                }
            }
        }

        self.ledger.retain_ids(&live_ids).await;
        *self.previous.write().await = snapshot;

        Ok(delta)
    }

    /// Settled records, oldest first
    pub async fn history(&self) -> Vec<PendingTransaction> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryStore;
    use crate::records::testutil::record;

    fn registry() -> Arc<ChainRegistry> {
        Arc::new(ChainRegistry::new(&crate::chain::testutil::settings()).unwrap())
    }

    async fn client_with(
        records: Vec<PendingTransaction>,
    ) -> (QueueClient, Arc<MemoryStore>, Arc<Ledger>) {
        let store = Arc::new(MemoryStore::new());
        for r in records {
            store.insert(r).await;
        }
        let ledger = Arc::new(Ledger::new());
        let client = QueueClient::new(store.clone(), ledger.clone(), registry(), 3);
        (client, store, ledger)
    }

    #[tokio::test]
    async fn first_poll_reports_every_record_as_arrived() {
        let (client, _store, ledger) = client_with(vec![
            record("tx-1", TxStatus::Pending),
            record("tx-2", TxStatus::ApprovalPending),
        ])
        .await;

        let delta = client.poll_once().await.unwrap();
        assert_eq!(delta.arrived.len(), 2);
        assert!(delta.settled.is_empty());
        assert!(ledger.get("tx-1").await.is_some());
        // Arrival pre-check pinned the fallback chain
        assert_eq!(ledger.get("tx-1").await.unwrap().chain_id, Some(1));
    }

    #[tokio::test]
    async fn terminal_transition_lands_in_history() {
        let (client, store, _ledger) =
            client_with(vec![record("tx-1", TxStatus::Submitted)]).await;
        client.poll_once().await.unwrap();

        // Store-side transition to terminal between polls
        store
            .update_status("tx-1", TxStatus::Confirmed, None)
            .await
            .unwrap();

        let delta = client.poll_once().await.unwrap();
        assert_eq!(delta.settled, vec![("tx-1".to_string(), TxStatus::Confirmed)]);
        let history = client.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "tx-1");

        // No re-reporting on the next poll
        let delta = client.poll_once().await.unwrap();
        assert!(delta.settled.is_empty());
    }

    #[tokio::test]
    async fn history_bucket_is_bounded() {
        let (client, store, _ledger) = client_with(vec![
            record("tx-1", TxStatus::Pending),
            record("tx-2", TxStatus::Pending),
            record("tx-3", TxStatus::Pending),
            record("tx-4", TxStatus::Pending),
        ])
        .await;
        client.poll_once().await.unwrap();

        for id in ["tx-1", "tx-2", "tx-3", "tx-4"] {
            store.update_status(id, TxStatus::Failed, None).await.unwrap();
        }
        client.poll_once().await.unwrap();

        // history_limit is 3
        let history = client.history().await;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.status == TxStatus::Failed));
    }

    #[tokio::test]
    async fn ledger_progress_is_written_back_to_a_lagging_store() {
        let (client, store, ledger) =
            client_with(vec![record("tx-1", TxStatus::Pending)]).await;
        client.poll_once().await.unwrap();

        // Local progress the store has not seen yet
        ledger
            .apply_status("tx-1", TxStatus::Submitted, Some(ethers::types::H256::repeat_byte(9)))
            .await
            .unwrap();

        client.poll_once().await.unwrap();
        assert_eq!(store.get("tx-1").await.unwrap().status, TxStatus::Submitted);
    }

    #[tokio::test]
    async fn arrival_events_are_broadcast() {
        let (client, _store, _ledger) =
            client_with(vec![record("tx-1", TxStatus::Pending)]).await;
        let mut rx = client.subscribe();

        client.poll_once().await.unwrap();

        match rx.try_recv().unwrap() {
            QueueEvent::Arrived { id, chain_id } => {
                assert_eq!(id, "tx-1");
                assert_eq!(chain_id, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
