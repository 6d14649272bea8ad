#[cfg(test)]
mod ztests {
    use std::sync::Arc;
    use std::time::Duration;
    use crate::chain::testutil::settings;
    use crate::chain::ChainRegistry;
    use crate::queue::memory::MemoryStore;
    use crate::records::testutil::record;
    use crate::records::{Ledger, PendingTransaction, TxStatus};
    use crate::wallet::{MockWalletProvider, SigningGate};
    use crate::pipeline::executor::TransactionExecutor;
    use ethers::types::H256;
    const BASE: u64 = 8453;
    fn base_pending(id: &str) -> PendingTransaction {
        let mut tx = record(id, TxStatus::Pending); tx.chain_id = Some(BASE); tx
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repro() {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_chain_id().returning(|| Ok(BASE));
        wallet.expect_accounts().returning(|| Ok(vec!["0x1111111111111111111111111111111111111111".parse().unwrap()]));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = std::sync::Mutex::new(Some(release_rx));
        wallet.expect_send_transfer().times(1).returning(move |_| {
            let rx = release_rx.lock().unwrap().take();
            eprintln!("ZB: entering block_on");
            futures::executor::block_on(async { if let Some(rx) = rx { let _ = rx.await; } });
            Ok(H256::repeat_byte(1))
        });
        let registry = Arc::new(ChainRegistry::new(&settings()).unwrap());
        let ledger = Arc::new(Ledger::new());
        let store = Arc::new(MemoryStore::new());
        let gate = SigningGate::new();
        let executor = Arc::new(TransactionExecutor::new(Arc::new(wallet), registry, ledger.clone(), store.clone(), gate, Duration::ZERO));
        store.insert(base_pending("tx-1")).await;
        ledger.sync(vec![base_pending("tx-1")]).await;
        let first = tokio::spawn({ let e = executor.clone(); async move { e.run_once().await } });
        tokio::time::sleep(Duration::from_millis(50)).await;
        eprintln!("ZB: after sleep");
        let second = executor.run_once().await.unwrap();
        eprintln!("ZB: second none={}", second.is_none());
        release_tx.send(()).unwrap();
        let f = first.await.unwrap().unwrap();
        eprintln!("ZB: first some={}", f.is_some());
    }
}
