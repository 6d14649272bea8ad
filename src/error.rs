//! Error types for the Meridian Executor

use thiserror::Error;

/// Main error type for the executor
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store fetch error: {0}")]
    StoreFetch(String),

    #[error("Store update error for transaction {tx_id}: {message}")]
    StoreUpdate { tx_id: String, message: String },

    #[error("Failed to add chain {chain_id} to wallet: {message}")]
    ChainAddFailed { chain_id: u64, message: String },

    #[error("Failed to switch wallet to chain {chain_id}: {message}")]
    NetworkSwitchFailed { chain_id: u64, message: String },

    #[error("Connection error for chain {chain_id}: {message}")]
    ConnectionFailed { chain_id: u64, message: String },

    #[error("Chain {chain_id} is not configured")]
    UnsupportedChain { chain_id: u64 },

    #[error("Wallet has no signing capability: {0}")]
    NoSigner(String),

    #[error("Wallet does not support {method}")]
    MissingProviderMethod { method: String },

    #[error("User rejected the signature request: {0}")]
    UserRejected(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Transaction {tx_hash} reverted on chain {chain_id}")]
    Reverted { chain_id: u64, tx_hash: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Check if error is transient and safe to retry on a later cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Database(_)
                | ExecutorError::StoreFetch(_)
                | ExecutorError::StoreUpdate { .. }
                | ExecutorError::ConnectionFailed { .. }
        )
    }

    /// Check if error requires the user to act inside the wallet before a
    /// retry can succeed
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            ExecutorError::ChainAddFailed { .. }
                | ExecutorError::NetworkSwitchFailed { .. }
                | ExecutorError::NoSigner(_)
                | ExecutorError::MissingProviderMethod { .. }
        )
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
