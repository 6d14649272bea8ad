//! Per-chain JSON-RPC access with ordered-fallback failover
//!
//! Each configured chain gets a pool over its ordered RPC endpoint list.
//! A failing endpoint rotates the pool to the next one; an operation only
//! errors once the whole list has been exhausted.

use crate::config::ChainTarget;
use crate::error::{ExecutorError, ExecutorResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

pub struct RpcPool {
    target: ChainTarget,
    providers: Vec<Provider<Http>>,
    current: AtomicUsize,
}

impl RpcPool {
    pub fn new(target: &ChainTarget) -> ExecutorResult<Self> {
        let mut providers = Vec::new();

        for url in &target.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    providers.push(provider);
                    debug!("Added RPC endpoint for chain {}: {}", target.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(ExecutorError::ConnectionFailed {
                chain_id: target.chain_id,
                message: "No valid RPC endpoints".to_string(),
            });
        }

        Ok(Self {
            target: target.clone(),
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// The active endpoint
    fn active(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Rotate to the next endpoint in the ordered list
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!(
            "Chain {} failover to RPC endpoint {}",
            self.target.chain_id, next
        );
    }

    fn exhausted(&self, operation: &str) -> ExecutorError {
        ExecutorError::ConnectionFailed {
            chain_id: self.target.chain_id,
            message: format!("All RPC endpoints failed for {}", operation),
        }
    }

    /// Receipt-by-hash lookup
    pub async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> ExecutorResult<Option<TransactionReceipt>> {
        for _ in 0..self.providers.len() {
            match self.active().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Receipt lookup failed on chain {}: {}",
                        self.target.chain_id, e
                    );
                    self.failover();
                }
            }
        }
        Err(self.exhausted("get_transaction_receipt"))
    }

    /// Transaction-by-hash lookup
    pub async fn transaction_by_hash(
        &self,
        tx_hash: H256,
    ) -> ExecutorResult<Option<Transaction>> {
        for _ in 0..self.providers.len() {
            match self.active().get_transaction(tx_hash).await {
                Ok(tx) => return Ok(tx),
                Err(e) => {
                    warn!(
                        "Transaction lookup failed on chain {}: {}",
                        self.target.chain_id, e
                    );
                    self.failover();
                }
            }
        }
        Err(self.exhausted("get_transaction"))
    }

    /// Native balance query
    pub async fn native_balance(&self, address: Address) -> ExecutorResult<U256> {
        for _ in 0..self.providers.len() {
            match self.active().get_balance(address, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        "Balance query failed on chain {}: {}",
                        self.target.chain_id, e
                    );
                    self.failover();
                }
            }
        }
        Err(self.exhausted("get_balance"))
    }

    /// Read-only contract call
    pub async fn call(&self, tx: &TypedTransaction) -> ExecutorResult<Bytes> {
        self.active()
            .call(tx, None)
            .await
            .map_err(|e| ExecutorError::ConnectionFailed {
                chain_id: self.target.chain_id,
                message: e.to_string(),
            })
    }

    /// Gas estimation; failures here are hints, not transport faults
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> ExecutorResult<U256> {
        self.active()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ExecutorError::GasEstimation(e.to_string()))
    }

    /// Health check via a block-number probe
    pub async fn health_check(&self) -> bool {
        for _ in 0..self.providers.len() {
            match self.active().get_block_number().await {
                Ok(_) => return true,
                Err(e) => {
                    error!(
                        "Health check failed for chain {}: {}",
                        self.target.chain_id, e
                    );
                    self.failover();
                }
            }
        }
        false
    }

    pub fn chain_id(&self) -> u64 {
        self.target.chain_id
    }

    pub fn endpoint_count(&self) -> usize {
        self.providers.len()
    }
}
