//! Transaction executor: one signature at a time
//!
//! Picks exactly one pending record per cycle under the signing gate,
//! aligns the wallet's network, optionally estimates gas, and requests the
//! signed broadcast. Every record picked up reaches exactly one of
//! submitted/rejected/failed, or stays pending when the attempt could not
//! run at all (no accounts, chain adaptation refused) and is retried on a
//! later cycle.

use crate::chain::{ChainAdapter, ChainRegistry};
use crate::error::{ExecutorError, ExecutorResult};
use crate::queue::QueueStore;
use crate::records::{Ledger, PendingTransaction, TxStatus};
use crate::wallet::{SigningGate, TransferRequest, WalletError, WalletProvider};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to the record picked this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Submitted { id: String, tx_hash: H256 },
    Rejected { id: String },
    Failed { id: String, reason: String },
    /// The attempt could not run; the record stays pending for a retry
    Deferred { id: String, reason: String },
}

pub struct TransactionExecutor {
    wallet: Arc<dyn WalletProvider>,
    registry: Arc<ChainRegistry>,
    ledger: Arc<Ledger>,
    store: Arc<dyn QueueStore>,
    gate: SigningGate,
    settle_delay: Duration,
}

impl TransactionExecutor {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        registry: Arc<ChainRegistry>,
        ledger: Arc<Ledger>,
        store: Arc<dyn QueueStore>,
        gate: SigningGate,
        settle_delay: Duration,
    ) -> Self {
        Self {
            wallet,
            registry,
            ledger,
            store,
            gate,
            settle_delay,
        }
    }

    /// One executor cycle: at most one record, under the signing gate.
    pub async fn run_once(&self) -> ExecutorResult<Option<ExecutionOutcome>> {
        eprintln!("DBG run_once: ENTER");
        // The permit spans the whole attempt and releases on every exit
        // path by drop.
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("signature request already in flight, skipping cycle");
            eprintln!("DBG run_once: gate busy, skipping");
            return Ok(None);
        };
        eprintln!("DBG run_once: got gate");

        let Some(tx) = self.ledger.pending_candidates().await.into_iter().next() else {
            eprintln!("DBG run_once: no candidates");
            return Ok(None);
        };
        eprintln!("DBG run_once: picked {}", tx.id);

        let outcome = self.execute(&tx).await;
        if let ExecutionOutcome::Deferred { id, reason } = &outcome {
            warn!(id = %id, "execution deferred: {}", reason);
            self.ledger.note_action_required(id, reason.clone()).await;
        }
        Ok(Some(outcome))
    }

    async fn execute(&self, tx: &PendingTransaction) -> ExecutionOutcome {
        // Resolve and pin the target chain
        let chain_id = match self.registry.resolve_target(tx) {
            Ok(chain_id) => chain_id,
            Err(e) => {
                return self.terminalize(tx, TxStatus::Failed, None, e.to_string()).await;
            }
        };
        self.ledger.fix_chain(&tx.id, chain_id).await;

        let target = match self.registry.target(chain_id) {
            Ok(target) => target.clone(),
            Err(e) => {
                return self.terminalize(tx, TxStatus::Failed, None, e.to_string()).await;
            }
        };

        // Align the wallet's network; failures here need user action and
        // leave the record pending.
        match ChainAdapter::ensure_chain(self.wallet.as_ref(), &target).await {
            Ok(outcome) => {
                debug!(id = %tx.id, chain_id, ?outcome, "chain adaptation complete");
            }
            Err(e) => {
                return ExecutionOutcome::Deferred {
                    id: tx.id.clone(),
                    reason: e.to_string(),
                };
            }
        }

        // No accounts means no signing capability; retry later.
        let from = match self.wallet.accounts().await {
            Ok(accounts) => match accounts.first().copied() {
                Some(from) => from,
                None => {
                    return ExecutionOutcome::Deferred {
                        id: tx.id.clone(),
                        reason: ExecutorError::from(WalletError::NoAccounts).to_string(),
                    };
                }
            },
            Err(e) => {
                return ExecutionOutcome::Deferred {
                    id: tx.id.clone(),
                    reason: format!("account query failed: {}", e),
                };
            }
        };

        // A malformed amount can never submit; terminal, not deferred.
        let value = match U256::from_dec_str(&tx.value) {
            Ok(value) => value,
            Err(e) => {
                return self
                    .terminalize(
                        tx,
                        TxStatus::Failed,
                        None,
                        format!("malformed value {:?}: {}", tx.value, e),
                    )
                    .await;
            }
        };

        let data = tx.data.clone().map(Bytes::from);
        let gas = if std::env::var("ZSKIP_RPC").is_ok() { None } else { self.estimate_gas(chain_id, from, tx, value, data.clone()).await };
        if std::env::var("ZSKIP_RPC").is_err() { self.precheck_balance(chain_id, from, value).await; }

        // Settle delay: give the wallet UI a beat between the network
        // switch and the signature prompt.
        tokio::time::sleep(self.settle_delay).await;
        eprintln!("DBG about to send_transfer for {}", tx.id);

        let request = TransferRequest {
            from,
            to: tx.to,
            value,
            data,
            gas,
        };

        info!(
            id = %tx.id,
            chain_id,
            to = ?tx.to,
            value = %tx.value,
            description = tx.metadata.description.as_deref().unwrap_or(""),
            "requesting wallet signature"
        );

        match self.wallet.send_transfer(&request).await {
            Ok(tx_hash) => {
                info!(
                    id = %tx.id,
                    hash = ?tx_hash,
                    explorer = %target.explorer_link(&format!("{:?}", tx_hash)),
                    "transaction submitted"
                );
                crate::metrics::record_submitted(chain_id);
                self.record_transition(tx, TxStatus::Submitted, Some(tx_hash)).await;
                ExecutionOutcome::Submitted {
                    id: tx.id.clone(),
                    tx_hash,
                }
            }
            Err(e) => match ExecutorError::from(e) {
                ExecutorError::UserRejected(_) => {
                    info!(id = %tx.id, "user rejected the signature request");
                    crate::metrics::record_rejected(chain_id);
                    self.record_transition(tx, TxStatus::Rejected, None).await;
                    ExecutionOutcome::Rejected { id: tx.id.clone() }
                }
                err => {
                    error!(id = %tx.id, "submission failed: {}", err);
                    self.terminalize(tx, TxStatus::Failed, None, err.to_string()).await
                }
            },
        }
    }

    /// Gas estimation is a hint; failures are logged and dropped.
    async fn estimate_gas(
        &self,
        chain_id: u64,
        from: Address,
        tx: &PendingTransaction,
        value: U256,
        data: Option<Bytes>,
    ) -> Option<U256> {
        let rpc = match self.registry.rpc(chain_id) {
            Ok(rpc) => rpc,
            Err(_) => return None,
        };

        let mut request = TransactionRequest::new().from(from).to(tx.to).value(value);
        if let Some(data) = data {
            request = request.data(data);
        }
        let typed: TypedTransaction = request.into();

        match rpc.estimate_gas(&typed).await {
            Ok(gas) => {
                debug!(id = %tx.id, gas = %gas, "gas estimated");
                Some(gas)
            }
            Err(e) => {
                warn!(id = %tx.id, "gas estimation failed, proceeding without a hint: {}", e);
                None
            }
        }
    }

    /// Warn when the sender balance cannot cover the value. The wallet is
    /// the authority; this never blocks submission.
    async fn precheck_balance(&self, chain_id: u64, from: Address, value: U256) {
        if value.is_zero() {
            return;
        }
        if let Ok(rpc) = self.registry.rpc(chain_id) {
            match rpc.native_balance(from).await {
                Ok(balance) if balance < value => {
                    warn!(
                        chain_id,
                        balance = %balance,
                        value = %value,
                        "sender balance below transfer value, wallet will likely refuse"
                    );
                }
                Ok(_) => {}
                Err(e) => debug!(chain_id, "balance pre-check skipped: {}", e),
            }
        }
    }

    async fn terminalize(
        &self,
        tx: &PendingTransaction,
        status: TxStatus,
        tx_hash: Option<H256>,
        reason: String,
    ) -> ExecutionOutcome {
        error!(id = %tx.id, status = %status, "terminalizing: {}", reason);
        crate::metrics::record_failed(tx.chain_id.unwrap_or_default());
        self.record_transition(tx, status, tx_hash).await;
        ExecutionOutcome::Failed {
            id: tx.id.clone(),
            reason,
        }
    }

    /// Apply the transition locally, then push it to the store. A store
    /// failure is retried by the queue client's writeback on the next poll.
    async fn record_transition(
        &self,
        tx: &PendingTransaction,
        status: TxStatus,
        tx_hash: Option<H256>,
    ) {
        if let Err(e) = self.ledger.apply_status(&tx.id, status, tx_hash).await {
            error!(id = %tx.id, "ledger refused transition: {}", e);
            return;
        }
        if let Err(e) = self.store.update_status(&tx.id, status, tx_hash).await {
            crate::metrics::record_store_error("update");
            warn!(id = %tx.id, "store writeback failed, will retry next poll: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testutil::settings;
    use crate::queue::memory::MemoryStore;
    use crate::records::testutil::record;
    use crate::wallet::MockWalletProvider;

    const BASE: u64 = 8453;

    fn executor_parts(
        wallet: MockWalletProvider,
    ) -> (TransactionExecutor, Arc<Ledger>, Arc<MemoryStore>, SigningGate) {
        let registry = Arc::new(ChainRegistry::new(&settings()).unwrap());
        let ledger = Arc::new(Ledger::new());
        let store = Arc::new(MemoryStore::new());
        let gate = SigningGate::new();
        let executor = TransactionExecutor::new(
            Arc::new(wallet),
            registry,
            ledger.clone(),
            store.clone(),
            gate.clone(),
            Duration::ZERO,
        );
        (executor, ledger, store, gate)
    }

    /// Wallet already on Base, one account, no estimation traffic expected
    /// (the fixture RPC endpoints are unreachable, so estimation and the
    /// balance pre-check fail soft and the hint is dropped).
    fn aligned_wallet() -> MockWalletProvider {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_chain_id().returning(|| Ok(BASE));
        wallet.expect_switch_chain().times(0);
        wallet.expect_add_chain().times(0);
        wallet
            .expect_accounts()
            .returning(|| Ok(vec!["0x1111111111111111111111111111111111111111".parse().unwrap()]));
        wallet
    }

    fn base_pending(id: &str) -> PendingTransaction {
        let mut tx = record(id, TxStatus::Pending);
        tx.chain_id = Some(BASE);
        tx
    }

    async fn seed(
        ledger: &Ledger,
        store: &MemoryStore,
        records: Vec<PendingTransaction>,
    ) {
        for r in &records {
            store.insert(r.clone()).await;
        }
        ledger.sync(records).await;
    }

    #[tokio::test]
    async fn successful_signature_submits_with_hash() {
        let mut wallet = aligned_wallet();
        wallet
            .expect_send_transfer()
            .times(1)
            .withf(|req| {
                req.to == "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap()
                    && req.value == U256::from_dec_str("1000000000000000000").unwrap()
                    && req.data.is_none()
            })
            .returning(|_| Ok(H256::repeat_byte(7)));

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Submitted {
                id: "tx-1".to_string(),
                tx_hash: H256::repeat_byte(7),
            }
        );

        let local = ledger.get("tx-1").await.unwrap();
        assert_eq!(local.status, TxStatus::Submitted);
        assert_eq!(local.tx_hash, Some(H256::repeat_byte(7)));
        assert_eq!(store.get("tx-1").await.unwrap().status, TxStatus::Submitted);
    }

    #[tokio::test]
    async fn user_rejection_terminates_without_hash() {
        let mut wallet = aligned_wallet();
        wallet.expect_send_transfer().times(1).returning(|_| {
            Err(WalletError::Rejected {
                message: "User rejected the request".to_string(),
            })
        });

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert_eq!(outcome, ExecutionOutcome::Rejected { id: "tx-1".to_string() });

        let local = ledger.get("tx-1").await.unwrap();
        assert_eq!(local.status, TxStatus::Rejected);
        assert_eq!(local.tx_hash, None);
        assert_eq!(store.get("tx-1").await.unwrap().status, TxStatus::Rejected);
    }

    #[tokio::test]
    async fn submission_error_terminates_as_failed() {
        let mut wallet = aligned_wallet();
        wallet.expect_send_transfer().times(1).returning(|_| {
            Err(WalletError::Transport("insufficient funds for gas".to_string()))
        });

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Failed);
        assert_eq!(store.get("tx-1").await.unwrap().status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn no_accounts_defers_and_leaves_pending() {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_chain_id().returning(|| Ok(BASE));
        wallet.expect_accounts().returning(|| Ok(vec![]));
        wallet.expect_send_transfer().times(0);

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Deferred { .. }));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Pending);
        assert!(ledger.action_required().await.contains_key("tx-1"));
    }

    #[tokio::test]
    async fn adaptation_refusal_defers_and_leaves_pending() {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_chain_id().returning(|| Ok(1));
        wallet.expect_switch_chain().times(1).returning(|_| {
            Err(WalletError::Rejected {
                message: "User rejected the request".to_string(),
            })
        });
        wallet.expect_accounts().times(0);
        wallet.expect_send_transfer().times(0);

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Deferred { .. }));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn malformed_value_terminates_as_failed_without_wallet_traffic() {
        let mut wallet = aligned_wallet();
        wallet.expect_send_transfer().times(0);

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        let mut tx = base_pending("tx-1");
        tx.value = "one ether".to_string();
        seed(&ledger, &store, vec![tx]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn busy_gate_skips_the_cycle() {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_chain_id().times(0);
        wallet.expect_send_transfer().times(0);

        let (executor, ledger, store, gate) = executor_parts(wallet);
        seed(&ledger, &store, vec![base_pending("tx-1")]).await;

        let _held = gate.try_acquire().unwrap();
        let outcome = executor.run_once().await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn picks_exactly_one_candidate_per_cycle() {
        let mut wallet = aligned_wallet();
        wallet
            .expect_send_transfer()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(1)));

        let (executor, ledger, store, _gate) = executor_parts(wallet);
        let mut first = base_pending("tx-1");
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        seed(&ledger, &store, vec![first, base_pending("tx-2")]).await;

        let outcome = executor.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Submitted { ref id, .. } if id == "tx-1"));
        assert_eq!(ledger.get("tx-2").await.unwrap().status, TxStatus::Pending);
    }
}
