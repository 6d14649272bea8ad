//! Dependency resolver: release transactions blocked on a confirmed approval
//!
//! A dependent record carries a typed `approval_id` reference attached at
//! creation time. When that linkage is absent the resolver falls back to
//! destination-contract equality. At most one release per cycle, so the
//! user never faces a burst of signature prompts.

use crate::error::ExecutorResult;
use crate::queue::QueueStore;
use crate::records::{Ledger, PendingTransaction, TxStatus};

use std::sync::Arc;
use tracing::{info, warn};

pub struct DependencyResolver {
    ledger: Arc<Ledger>,
    store: Arc<dyn QueueStore>,
}

impl DependencyResolver {
    pub fn new(ledger: Arc<Ledger>, store: Arc<dyn QueueStore>) -> Self {
        Self { ledger, store }
    }

    /// One resolver cycle. Returns the released record id, if any.
    pub async fn run_once(&self) -> ExecutorResult<Option<String>> {
        let approvals = self.ledger.confirmed_approvals().await;
        if approvals.is_empty() {
            return Ok(None);
        }

        let blocked = self.ledger.blocked().await;
        let Some((release, approval)) = blocked.iter().find_map(|candidate| {
            approvals
                .iter()
                .find(|a| matches(candidate, a))
                .map(|a| (candidate, a))
        }) else {
            return Ok(None);
        };

        info!(
            id = %release.id,
            approval = %approval.id,
            "approval confirmed, releasing dependent transaction"
        );

        self.ledger
            .apply_status(&release.id, TxStatus::Pending, None)
            .await?;

        if let Err(e) = self
            .store
            .update_status(&release.id, TxStatus::Pending, None)
            .await
        {
            crate::metrics::record_store_error("update");
            warn!(id = %release.id, "release writeback failed, will retry next poll: {}", e);
        }

        crate::metrics::record_approval_released();
        Ok(Some(release.id.clone()))
    }
}

/// Does `approval` unblock `candidate`?
fn matches(candidate: &PendingTransaction, approval: &PendingTransaction) -> bool {
    match &candidate.metadata.approval_id {
        Some(approval_id) => approval_id == &approval.id,
        // No typed linkage: same destination contract
        None => candidate.to == approval.to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryStore;
    use crate::records::testutil::record;

    fn approval(id: &str) -> PendingTransaction {
        let mut tx = record(id, TxStatus::Confirmed);
        tx.metadata.is_approval = true;
        tx
    }

    fn blocked_on(id: &str, approval_id: &str) -> PendingTransaction {
        let mut tx = record(id, TxStatus::ApprovalPending);
        tx.metadata.approval_id = Some(approval_id.to_string());
        tx
    }

    async fn resolver_with(
        records: Vec<PendingTransaction>,
    ) -> (DependencyResolver, Arc<Ledger>, Arc<MemoryStore>) {
        let ledger = Arc::new(Ledger::new());
        let store = Arc::new(MemoryStore::new());
        for r in &records {
            store.insert(r.clone()).await;
        }
        ledger.sync(records).await;
        (
            DependencyResolver::new(ledger.clone(), store.clone()),
            ledger,
            store,
        )
    }

    #[tokio::test]
    async fn confirmed_approval_releases_its_dependent() {
        let (resolver, ledger, store) =
            resolver_with(vec![approval("appr-1"), blocked_on("tx-1", "appr-1")]).await;

        let released = resolver.run_once().await.unwrap();
        assert_eq!(released, Some("tx-1".to_string()));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Pending);
        assert_eq!(store.get("tx-1").await.unwrap().status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn unconfirmed_approval_releases_nothing() {
        let mut pending_approval = record("appr-1", TxStatus::Submitted);
        pending_approval.metadata.is_approval = true;
        let (resolver, ledger, _store) =
            resolver_with(vec![pending_approval, blocked_on("tx-1", "appr-1")]).await;

        assert_eq!(resolver.run_once().await.unwrap(), None);
        assert_eq!(
            ledger.get("tx-1").await.unwrap().status,
            TxStatus::ApprovalPending
        );
    }

    #[tokio::test]
    async fn only_one_release_per_cycle() {
        let (resolver, ledger, _store) = resolver_with(vec![
            approval("appr-1"),
            blocked_on("tx-1", "appr-1"),
            blocked_on("tx-2", "appr-1"),
        ])
        .await;

        let first = resolver.run_once().await.unwrap().unwrap();
        let blocked = ledger.blocked().await;
        assert_eq!(blocked.len(), 1, "second dependent stays blocked this cycle");

        let second = resolver.run_once().await.unwrap().unwrap();
        assert_ne!(first, second);
        assert!(ledger.blocked().await.is_empty());
    }

    #[tokio::test]
    async fn destination_fallback_matches_without_id_linkage() {
        let mut unlinked = record("tx-1", TxStatus::ApprovalPending);
        unlinked.metadata.approval_id = None;
        // Same destination as the approval fixture
        let (resolver, ledger, _store) =
            resolver_with(vec![approval("appr-1"), unlinked]).await;

        assert_eq!(resolver.run_once().await.unwrap(), Some("tx-1".to_string()));
        assert_eq!(ledger.get("tx-1").await.unwrap().status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn unmatched_blocked_record_stays_blocked() {
        let (resolver, ledger, _store) =
            resolver_with(vec![approval("appr-1"), blocked_on("tx-1", "appr-other")]).await;

        assert_eq!(resolver.run_once().await.unwrap(), None);
        assert_eq!(
            ledger.get("tx-1").await.unwrap().status,
            TxStatus::ApprovalPending
        );
    }
}
