//! Wallet provider abstraction
//!
//! The wallet is an external collaborator: it owns the keys, the nonce, and
//! the broadcast. This module defines the trait the pipeline drives, the
//! typed errors it signals, and the single-flight gate around the signature
//! request. The production implementation is the JSON-RPC bridge in
//! [`bridge`].

pub mod bridge;
pub mod gate;

pub use bridge::WalletBridge;
pub use gate::{SigningGate, SigningPermit};

use crate::config::{ChainTarget, NativeCurrency};

use async_trait::async_trait;
use ethers::providers::{ProviderError, RpcError};
use ethers::types::{Address, Bytes, H256, U256};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// EIP-1193: user rejected the request
pub const CODE_USER_REJECTED: i64 = 4001;
/// EIP-3085/3326: the requested chain is not known to the wallet
pub const CODE_UNRECOGNIZED_CHAIN: i64 = 4902;
/// JSON-RPC: method not found
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

lazy_static! {
    /// Some wallets signal rejection only through the message text
    static ref REJECTION_PATTERN: Regex =
        Regex::new(r"(?i)user (rejected|denied|cancel?led)").unwrap();
}

/// Typed wallet-side failures
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("user rejected the request: {message}")]
    Rejected { message: String },

    #[error("chain {chain_id} is not known to the wallet")]
    UnknownChain { chain_id: u64 },

    #[error("wallet does not support {method}")]
    MissingMethod { method: String },

    #[error("wallet exposes no accounts")]
    NoAccounts,

    #[error("wallet transport error: {0}")]
    Transport(String),
}

/// Submission-context mapping onto the executor taxonomy
impl From<WalletError> for crate::error::ExecutorError {
    fn from(err: WalletError) -> Self {
        use crate::error::ExecutorError;
        match err {
            WalletError::Rejected { message } => ExecutorError::UserRejected(message),
            WalletError::UnknownChain { chain_id } => ExecutorError::UnsupportedChain { chain_id },
            WalletError::MissingMethod { method } => {
                ExecutorError::MissingProviderMethod { method }
            }
            WalletError::NoAccounts => {
                ExecutorError::NoSigner("wallet exposes no accounts".to_string())
            }
            WalletError::Transport(message) => ExecutorError::Submission(message),
        }
    }
}

/// Network descriptor for `wallet_addEthereumChain` (EIP-3085)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl ChainDescriptor {
    /// Build the wallet-facing descriptor from a configured chain target
    pub fn from_target(target: &ChainTarget) -> Self {
        // Wallets want the explorer origin, not the tx template
        let explorer_base = target
            .explorer_url
            .split("/tx/")
            .next()
            .unwrap_or(&target.explorer_url)
            .to_string();

        Self {
            chain_id: target.hex_id(),
            chain_name: target.name.clone(),
            native_currency: target.native_currency.clone(),
            rpc_urls: target.rpc_urls.clone(),
            block_explorer_urls: vec![explorer_base],
        }
    }
}

/// A value/data transfer to be signed and broadcast by the wallet
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Option<Bytes>,
    /// Optional gas hint from estimation; the wallet may override it
    pub gas: Option<U256>,
}

/// External wallet capability surface
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Currently active chain id
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Ask the wallet to switch its active network
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// Ask the wallet to add a network it does not know yet
    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<(), WalletError>;

    /// Addresses the wallet is willing to sign with
    async fn accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Request a signed, broadcast transfer; returns the transaction hash
    async fn send_transfer(&self, request: &TransferRequest) -> Result<H256, WalletError>;
}

/// Map a provider transport error onto the typed wallet error surface
pub(crate) fn classify_provider_error(
    method: &str,
    chain_hint: Option<u64>,
    err: ProviderError,
) -> WalletError {
    if let ProviderError::JsonRpcClientError(inner) = &err {
        if let Some(resp) = inner.as_error_response() {
            match resp.code {
                CODE_USER_REJECTED => {
                    return WalletError::Rejected {
                        message: resp.message.clone(),
                    }
                }
                CODE_UNRECOGNIZED_CHAIN => {
                    return WalletError::UnknownChain {
                        chain_id: chain_hint.unwrap_or_default(),
                    };
                }
                CODE_METHOD_NOT_FOUND => {
                    return WalletError::MissingMethod {
                        method: method.to_string(),
                    }
                }
                _ => {}
            }
            if REJECTION_PATTERN.is_match(&resp.message) {
                return WalletError::Rejected {
                    message: resp.message.clone(),
                };
            }
        }
    }
    WalletError::Transport(err.to_string())
}
