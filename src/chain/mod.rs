//! Chain module - network targets, RPC pools, and wallet adaptation
//!
//! This module provides:
//! - The registry of configured chain targets and their RPC pools
//! - Deterministic target-chain resolution for queued records
//! - The wallet-facing chain adapter

pub mod adapter;
pub mod rpc;

pub use adapter::{AdapterOutcome, ChainAdapter};
pub use rpc::RpcPool;

use crate::config::{ChainTarget, Settings};
use crate::error::{ExecutorError, ExecutorResult};
use crate::records::PendingTransaction;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, Transaction, TransactionReceipt, H256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// Receipt access seam used by the status reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReceiptLookup: Send + Sync {
    async fn transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> ExecutorResult<Option<TransactionReceipt>>;

    /// Mempool probe for submissions that have gone receiptless
    async fn transaction_by_hash(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> ExecutorResult<Option<Transaction>>;
}

/// Registry of supported chains
///
/// Holds the static chain targets, one RPC pool per chain, and the explicit
/// token-address index used for target-chain inference.
pub struct ChainRegistry {
    targets: HashMap<u64, ChainTarget>,
    pools: DashMap<u64, Arc<RpcPool>>,
    /// Known token contract address -> home chain id
    token_index: HashMap<Address, u64>,
    /// Known token symbol -> home chain id
    symbol_index: HashMap<String, u64>,
    default_chain_id: u64,
}

impl ChainRegistry {
    pub fn new(settings: &Settings) -> ExecutorResult<Self> {
        let mut targets = HashMap::new();
        let pools = DashMap::new();
        let mut token_index = HashMap::new();
        let mut symbol_index = HashMap::new();

        // BTreeMap iteration keeps index construction deterministic when a
        // token appears on more than one chain: lowest-named chain wins.
        for (name, target) in settings.enabled_chains() {
            info!("Initializing chain {} (ID: {})", target.name, target.chain_id);

            let pool = RpcPool::new(target)?;
            pools.insert(target.chain_id, Arc::new(pool));

            for (symbol, address) in &target.tokens {
                let address: Address = address
                    .parse()
                    .map_err(|e| ExecutorError::Config(format!("bad token address on {}: {}", name, e)))?;
                token_index.entry(address).or_insert(target.chain_id);
                symbol_index
                    .entry(symbol.to_uppercase())
                    .or_insert(target.chain_id);
            }

            targets.insert(target.chain_id, target.clone());
        }

        if !targets.contains_key(&settings.executor.default_chain_id) {
            return Err(ExecutorError::UnsupportedChain {
                chain_id: settings.executor.default_chain_id,
            });
        }

        Ok(Self {
            targets,
            pools,
            token_index,
            symbol_index,
            default_chain_id: settings.executor.default_chain_id,
        })
    }

    pub fn target(&self, chain_id: u64) -> ExecutorResult<&ChainTarget> {
        self.targets
            .get(&chain_id)
            .ok_or(ExecutorError::UnsupportedChain { chain_id })
    }

    pub fn rpc(&self, chain_id: u64) -> ExecutorResult<Arc<RpcPool>> {
        self.pools
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(ExecutorError::UnsupportedChain { chain_id })
    }

    /// Resolve the target chain for a record. Deterministic: an explicit
    /// chain id wins, then the token-address index, then the token-symbol
    /// index, then the configured default chain.
    pub fn resolve_target(&self, tx: &PendingTransaction) -> ExecutorResult<u64> {
        if let Some(chain_id) = tx.chain_id {
            self.target(chain_id)?;
            return Ok(chain_id);
        }

        if let Some(&chain_id) = self.token_index.get(&tx.to) {
            return Ok(chain_id);
        }

        if let Some(symbol) = &tx.metadata.token_symbol {
            if let Some(&chain_id) = self.symbol_index.get(&symbol.to_uppercase()) {
                return Ok(chain_id);
            }
        }

        Ok(self.default_chain_id)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.pools.iter().map(|e| *e.key()).collect()
    }

    pub fn default_chain_id(&self) -> u64 {
        self.default_chain_id
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let mut results = Vec::new();

        for entry in self.pools.iter() {
            let chain_id = *entry.key();
            let healthy = entry.value().health_check().await;
            results.push((chain_id, healthy));

            crate::metrics::record_chain_health(chain_id, healthy);
        }

        results
    }
}

#[async_trait]
impl ReceiptLookup for ChainRegistry {
    async fn transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> ExecutorResult<Option<TransactionReceipt>> {
        self.rpc(chain_id)?.transaction_receipt(tx_hash).await
    }

    async fn transaction_by_hash(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> ExecutorResult<Option<Transaction>> {
        self.rpc(chain_id)?.transaction_by_hash(tx_hash).await
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::settings;
    use super::*;
    use crate::records::testutil::record;
    use crate::records::TxStatus;

    #[test]
    fn explicit_chain_id_wins() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let mut tx = record("tx-1", TxStatus::Pending);
        tx.chain_id = Some(8453);
        assert_eq!(registry.resolve_target(&tx).unwrap(), 8453);
    }

    #[test]
    fn unknown_explicit_chain_id_is_an_error() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let mut tx = record("tx-1", TxStatus::Pending);
        tx.chain_id = Some(999);
        assert!(matches!(
            registry.resolve_target(&tx),
            Err(ExecutorError::UnsupportedChain { chain_id: 999 })
        ));
    }

    #[test]
    fn token_address_maps_to_its_home_chain() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let mut tx = record("tx-1", TxStatus::Pending);
        tx.to = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".parse().unwrap();
        assert_eq!(registry.resolve_target(&tx).unwrap(), 8453);
    }

    #[test]
    fn token_symbol_maps_when_address_is_unknown() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let mut tx = record("tx-1", TxStatus::Pending);
        tx.metadata.token_symbol = Some("usdc".to_string());
        assert_eq!(registry.resolve_target(&tx).unwrap(), 8453);
    }

    #[test]
    fn unresolved_records_fall_back_to_the_default_chain() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let tx = record("tx-1", TxStatus::Pending);
        assert_eq!(registry.resolve_target(&tx).unwrap(), 1);
    }

    #[test]
    fn resolution_is_deterministic_across_invocations() {
        let registry = ChainRegistry::new(&settings()).unwrap();
        let mut tx = record("tx-1", TxStatus::Pending);
        tx.metadata.token_symbol = Some("USDC".to_string());
        let first = registry.resolve_target(&tx).unwrap();
        for _ in 0..10 {
            assert_eq!(registry.resolve_target(&tx).unwrap(), first);
        }
    }
}
