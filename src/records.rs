//! Pending-transaction records and the shared in-memory ledger
//!
//! Records are created by the external agent and live in the remote store;
//! the ledger is this process's working view. All mutation goes through
//! explicit status updates, validated against the state machine:
//!
//! `PENDING -> SUBMITTED -> CONFIRMED | FAILED`
//! `PENDING -> REJECTED | FAILED`
//! `APPROVAL_PENDING -> PENDING`
//!
//! Terminal states are never re-entered.

use crate::error::{ExecutorError, ExecutorResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Awaiting the wallet signature
    Pending,
    /// Blocked on a prior approval; excluded from the executor candidate set
    ApprovalPending,
    /// Broadcast with a known hash, awaiting a receipt
    Submitted,
    /// Receipt indicates success
    Confirmed,
    /// Submission error or on-chain revert
    Failed,
    /// User declined the signature request
    Rejected,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::Rejected)
    }

    /// Legal edges of the state machine
    pub fn can_transition(self, to: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, to),
            (ApprovalPending, Pending)
                | (Pending, Submitted)
                | (Pending, Rejected)
                | (Pending, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::ApprovalPending => "approval_pending",
            TxStatus::Submitted => "submitted",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<TxStatus> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "approval_pending" => Some(TxStatus::ApprovalPending),
            "submitted" => Some(TxStatus::Submitted),
            "confirmed" => Some(TxStatus::Confirmed),
            "failed" => Some(TxStatus::Failed),
            "rejected" => Some(TxStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached by the external agent at creation time
#[derive(Debug, Clone, Default, Serialize)]
pub struct TxMetadata {
    /// Human description shown alongside the signature prompt
    pub description: Option<String>,
    /// Typed reference to the approval transaction this record waits on
    pub approval_id: Option<String>,
    /// Source context (which agent action queued this record)
    pub source: Option<String>,
    /// Whether this record needs a wallet signature at all
    pub requires_signature: bool,
    /// Marks the record itself as an approval others may wait on
    pub is_approval: bool,
    pub token_symbol: Option<String>,
    pub token_amount: Option<String>,
}

/// A transaction queued for signature and submission
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    /// Opaque id, stable across polls
    pub id: String,
    pub to: Address,
    /// Amount in the smallest unit, kept as a decimal string until submission
    pub value: String,
    pub data: Option<Vec<u8>>,
    pub status: TxStatus,
    /// Fixed for the record's lifetime once resolved
    pub chain_id: Option<u64>,
    pub tx_hash: Option<H256>,
    pub metadata: TxMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Counts by status, for the status API and logs
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub approval_pending: u64,
    pub submitted: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub rejected: u64,
}

/// Shared in-memory view of the transaction records
///
/// A single write lock serializes all mutation, so updates for the same id
/// never interleave. Regressions out of a terminal state are rejected here
/// independently of the store-level guard.
pub struct Ledger {
    records: RwLock<HashMap<String, PendingTransaction>>,
    /// Transient adaptation failures surfaced for a user retry, by id
    action_required: RwLock<HashMap<String, String>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            action_required: RwLock::new(HashMap::new()),
        }
    }

    /// Merge a store snapshot into the local view.
    ///
    /// Local records that have progressed further than the store copy are
    /// kept and returned so the caller can push the update back to the
    /// store; anything else takes the store's version.
    pub async fn sync(&self, fetched: Vec<PendingTransaction>) -> Vec<PendingTransaction> {
        enum Merge {
            TakeIncoming,
            /// Local copy has progressed further than the store's
            KeepLocal(PendingTransaction),
            /// Store would regress a terminal record
            KeepTerminal(TxStatus),
            /// Same status; keep the locally resolved chain
            Refresh(Option<u64>),
        }

        let mut records = self.records.write().await;
        let mut ahead = Vec::new();

        for incoming in fetched {
            let merge = match records.get(&incoming.id) {
                Some(local) if local.status != incoming.status => {
                    if incoming.status.can_transition(local.status) {
                        Merge::KeepLocal(local.clone())
                    } else if local.status.is_terminal() {
                        Merge::KeepTerminal(local.status)
                    } else {
                        Merge::TakeIncoming
                    }
                }
                Some(local) => Merge::Refresh(local.chain_id),
                None => Merge::TakeIncoming,
            };

            match merge {
                Merge::TakeIncoming => {
                    records.insert(incoming.id.clone(), incoming);
                }
                Merge::KeepLocal(local) => {
                    // Store writeback is behind; keep local and report it
                    ahead.push(local);
                }
                Merge::KeepTerminal(local_status) => {
                    warn!(
                        id = %incoming.id,
                        local = %local_status,
                        store = %incoming.status,
                        "store snapshot would regress a terminal record, keeping local"
                    );
                }
                Merge::Refresh(chain_id) => {
                    let mut merged = incoming;
                    merged.chain_id = merged.chain_id.or(chain_id);
                    records.insert(merged.id.clone(), merged);
                }
            }
        }

        ahead
    }

    /// Apply a status transition, enforcing the state machine
    pub async fn apply_status(
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
        debug!(id, status = %status, "ledger transition applied");

        let updated = record.clone();
        drop(records);

        if status.is_terminal() || status == TxStatus::Submitted {
            self.action_required.write().await.remove(id);
        }

        Ok(updated)
    }

    /// Pin the resolved target chain; a no-op once set
    pub async fn fix_chain(&self, id: &str, chain_id: u64) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            if record.chain_id.is_none() {
                record.chain_id = Some(chain_id);
            }
        }
    }

    /// Record an adaptation failure that needs user action inside the wallet
    pub async fn note_action_required(&self, id: &str, message: String) {
        self.action_required
            .write()
            .await
            .insert(id.to_string(), message);
    }

    pub async fn action_required(&self) -> HashMap<String, String> {
        self.action_required.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<PendingTransaction> {
        self.records.read().await.get(id).cloned()
    }

    /// Executor candidates: pending, signature-bearing, oldest first
    pub async fn pending_candidates(&self) -> Vec<PendingTransaction> {
        let mut candidates: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == TxStatus::Pending && r.metadata.requires_signature)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        candidates
    }

    /// Submitted records carrying a hash, for the reconciler
    pub async fn submitted(&self) -> Vec<PendingTransaction> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == TxStatus::Submitted && r.tx_hash.is_some())
            .cloned()
            .collect()
    }

    /// Confirmed records flagged as approvals
    pub async fn confirmed_approvals(&self) -> Vec<PendingTransaction> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == TxStatus::Confirmed && r.metadata.is_approval)
            .cloned()
            .collect()
    }

    /// Records blocked on an approval, oldest first
    pub async fn blocked(&self) -> Vec<PendingTransaction> {
        let mut blocked: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == TxStatus::ApprovalPending)
            .cloned()
            .collect();
        blocked.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        blocked
    }

    /// All active (non-terminal) records
    pub async fn active(&self) -> Vec<PendingTransaction> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.is_settled())
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> LedgerStats {
        let records = self.records.read().await;
        let mut stats = LedgerStats::default();
        for record in records.values() {
            match record.status {
                TxStatus::Pending => stats.pending += 1,
                TxStatus::ApprovalPending => stats.approval_pending += 1,
                TxStatus::Submitted => stats.submitted += 1,
                TxStatus::Confirmed => stats.confirmed += 1,
                TxStatus::Failed => stats.failed += 1,
                TxStatus::Rejected => stats.rejected += 1,
            }
        }
        stats
    }

    /// Drop records the store no longer returns (archived by retention)
    pub async fn retain_ids(&self, ids: &std::collections::HashSet<String>) {
        let mut records = self.records.write().await;
        records.retain(|id, _| ids.contains(id));
        self.action_required
            .write()
            .await
            .retain(|id, _| ids.contains(id));
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Record builder for tests
    pub fn record(id: &str, status: TxStatus) -> PendingTransaction {
        PendingTransaction {
            id: id.to_string(),
            to: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap(),
            value: "1000000000000000000".to_string(),
            data: None,
            status,
            chain_id: None,
            tx_hash: None,
            metadata: TxMetadata {
                requires_signature: true,
                ..Default::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
