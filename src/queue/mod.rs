//! Remote store access and queue polling
//!
//! The store is an external collaborator: the agent backend inserts rows,
//! this service only moves their status forward and clears settled rows
//! past retention.

pub mod client;
pub mod store;

pub use client::{QueueClient, QueueDelta, QueueEvent};
pub use store::PgStore;

use crate::error::ExecutorResult;
use crate::records::{PendingTransaction, TxStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::H256;

#[cfg(test)]
use mockall::automock;

/// Remote store surface
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Current transaction list
    async fn fetch_pending(&self) -> ExecutorResult<Vec<PendingTransaction>>;

    /// Move a record's status forward; terminal rows are never overwritten
    async fn update_status(
        &self,
        id: &str,
        status: TxStatus,
        tx_hash: Option<H256>,
    ) -> ExecutorResult<PendingTransaction>;

    /// Remove records by id set
    async fn remove(&self, ids: &[String]) -> ExecutorResult<u64>;

    /// Clear settled records older than the cutoff
    async fn clear_settled_before(&self, cutoff: DateTime<Utc>) -> ExecutorResult<u64>;

    /// Cheap liveness probe for readiness checks
    async fn health_check(&self) -> ExecutorResult<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory store used by component tests

    use super::*;
    use crate::error::ExecutorError;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryStore {
        records: RwLock<HashMap<String, PendingTransaction>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, tx: PendingTransaction) {
            self.records.write().await.insert(tx.id.clone(), tx);
        }

        pub async fn get(&self, id: &str) -> Option<PendingTransaction> {
            self.records.read().await.get(id).cloned()
        }
    }

    #[async_trait]
    impl QueueStore for MemoryStore {
        async fn fetch_pending(&self) -> ExecutorResult<Vec<PendingTransaction>> {
            let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(records)
        }

        async fn update_status(
            &self,
            id: &str,
            status: TxStatus,
            tx_hash: Option<H256>,
        ) -> ExecutorResult<PendingTransaction> {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(id)
                .ok_or_else(|| ExecutorError::TransactionNotFound { tx_id: id.to_string() })?;

            if !record.status.can_transition(status) {
                return Err(ExecutorError::InvalidStateTransition {
                    from: record.status.to_string(),
                    to: status.to_string(),
                });
            }

            record.status = status;
            if let Some(hash) = tx_hash {
                record.tx_hash = Some(hash);
            }
            record.updated_at = Utc::now();
            Ok(record.clone())
        }

        async fn remove(&self, ids: &[String]) -> ExecutorResult<u64> {
            let mut records = self.records.write().await;
            let before = records.len();
            for id in ids {
                records.remove(id);
            }
            Ok((before - records.len()) as u64)
        }

        async fn clear_settled_before(&self, cutoff: DateTime<Utc>) -> ExecutorResult<u64> {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, r| !(r.is_settled() && r.updated_at < cutoff));
            Ok((before - records.len()) as u64)
        }

        async fn health_check(&self) -> ExecutorResult<()> {
            Ok(())
        }
    }
}
