//! PostgreSQL queue store
//!
//! The agent backend inserts queued transactions; this service reads them,
//! moves status forward, and clears settled rows past retention. The
//! status-update path is guarded twice: a legality check against the row's
//! current status, and a compare-and-set in the UPDATE itself so concurrent
//! writers cannot interleave.

use super::QueueStore;
use crate::config::DatabaseConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::records::{PendingTransaction, TxMetadata, TxStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(config: &DatabaseConfig) -> ExecutorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(ExecutorError::Database)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_transactions (
                id VARCHAR(64) PRIMARY KEY,
                destination VARCHAR(42) NOT NULL,
                value_base_units TEXT NOT NULL,
                call_data BYTEA,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                chain_id BIGINT,
                tx_hash VARCHAR(66),
                description TEXT,
                approval_id VARCHAR(64),
                source TEXT,
                requires_signature BOOLEAN NOT NULL DEFAULT TRUE,
                is_approval BOOLEAN NOT NULL DEFAULT FALSE,
                token_symbol VARCHAR(16),
                token_amount TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queued_status
            ON queued_transactions (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queued_updated_at
            ON queued_transactions (updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Option<PendingTransaction> {
        let id: String = row.get("id");

        let destination: String = row.get("destination");
        let to: Address = match destination.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(
                    id = %id,
                    destination = %destination,
                    "skipping record with malformed destination: {}",
                    e
                );
                return None;
            }
        };

        let status_str: String = row.get("status");
        let status = match TxStatus::parse(&status_str) {
            Some(status) => status,
            None => {
                warn!(id = %id, status = %status_str, "skipping record with unknown status");
                return None;
            }
        };

        // A malformed hash means the record is not reconcilable; keep the
        // record but drop the hash.
        let tx_hash: Option<H256> = row
            .get::<Option<String>, _>("tx_hash")
            .and_then(|h| match h.parse() {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(id = %id, hash = %h, "ignoring malformed transaction hash: {}", e);
                    None
                }
            });

        Some(PendingTransaction {
            id,
            to,
            value: row.get("value_base_units"),
            data: row.get::<Option<Vec<u8>>, _>("call_data"),
            status,
            chain_id: row.get::<Option<i64>, _>("chain_id").map(|c| c as u64),
            tx_hash,
            metadata: TxMetadata {
                description: row.get("description"),
                approval_id: row.get("approval_id"),
                source: row.get("source"),
                requires_signature: row.get("requires_signature"),
                is_approval: row.get("is_approval"),
                token_symbol: row.get("token_symbol"),
                token_amount: row.get("token_amount"),
            },
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn fetch_pending(&self) -> ExecutorResult<Vec<PendingTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, destination, value_base_units, call_data, status, chain_id,
                   tx_hash, description, approval_id, source, requires_signature,
                   is_approval, token_symbol, token_amount, created_at, updated_at
            FROM queued_transactions
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExecutorError::StoreFetch(e.to_string()))?;

        Ok(rows.iter().filter_map(Self::row_to_record).collect())
    }

    async fn update_status(
        &self,
        id: &str,
        status: TxStatus,
        tx_hash: Option<H256>,
    ) -> ExecutorResult<PendingTransaction> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM queued_transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let current = current.ok_or_else(|| ExecutorError::TransactionNotFound {
            tx_id: id.to_string(),
        })?;
        let current = TxStatus::parse(&current).ok_or_else(|| ExecutorError::StoreUpdate {
            tx_id: id.to_string(),
            message: format!("unknown stored status {}", current),
        })?;

        if !current.can_transition(status) {
            return Err(ExecutorError::InvalidStateTransition {
                from: current.to_string(),
                to: status.to_string(),
            });
        }

        // Compare-and-set on the status read above; a concurrent writer
        // makes this a no-row update rather than a lost transition.
        let row = sqlx::query(
            r#"
            UPDATE queued_transactions
            SET status = $2, tx_hash = COALESCE($3, tx_hash), updated_at = NOW()
            WHERE id = $1 AND status = $4
            RETURNING id, destination, value_base_units, call_data, status, chain_id,
                      tx_hash, description, approval_id, source, requires_signature,
                      is_approval, token_symbol, token_amount, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tx_hash.map(|h| format!("{:?}", h)))
        .bind(current.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| ExecutorError::StoreUpdate {
            tx_id: id.to_string(),
            message: "concurrent update lost the compare-and-set".to_string(),
        })?;

        debug!(id, status = %status, "store transition applied");

        Self::row_to_record(&row).ok_or_else(|| ExecutorError::StoreUpdate {
            tx_id: id.to_string(),
            message: "updated row failed to decode".to_string(),
        })
    }

    async fn remove(&self, ids: &[String]) -> ExecutorResult<u64> {
        let result = sqlx::query("DELETE FROM queued_transactions WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_settled_before(&self, cutoff: DateTime<Utc>) -> ExecutorResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM queued_transactions
            WHERE status IN ('confirmed', 'failed', 'rejected') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Cleared {} settled records past retention", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> ExecutorResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(ExecutorError::Database)?;
        Ok(())
    }
}
