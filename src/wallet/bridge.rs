//! JSON-RPC wallet bridge
//!
//! Speaks the EIP-1193 method set over HTTP to a wallet endpoint. The
//! bridge holds no keys and no state; every call is a plain JSON-RPC
//! request and every failure is classified onto [`WalletError`].

use super::{classify_provider_error, ChainDescriptor, TransferRequest, WalletError, WalletProvider};

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, H256};
use serde_json::json;
use tracing::debug;

pub struct WalletBridge {
    provider: Provider<Http>,
    endpoint: String,
}

impl WalletBridge {
    pub fn new(url: &str) -> Result<Self, WalletError> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| WalletError::Transport(format!("invalid wallet endpoint {}: {}", url, e)))?;
        Ok(Self {
            provider,
            endpoint: url.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WalletProvider for WalletBridge {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        let hex: String = self
            .provider
            .request("eth_chainId", ())
            .await
            .map_err(|e| classify_provider_error("eth_chainId", None, e))?;
        parse_hex_quantity(&hex)
            .ok_or_else(|| WalletError::Transport(format!("malformed chain id: {}", hex)))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        debug!(chain_id, "requesting wallet network switch");
        let params = json!([{ "chainId": format!("0x{:x}", chain_id) }]);
        let _: Option<serde_json::Value> = self
            .provider
            .request("wallet_switchEthereumChain", params)
            .await
            .map_err(|e| {
                classify_provider_error("wallet_switchEthereumChain", Some(chain_id), e)
            })?;
        Ok(())
    }

    async fn add_chain(&self, descriptor: &ChainDescriptor) -> Result<(), WalletError> {
        debug!(chain_id = %descriptor.chain_id, "requesting wallet network add");
        let _: Option<serde_json::Value> = self
            .provider
            .request("wallet_addEthereumChain", json!([descriptor]))
            .await
            .map_err(|e| classify_provider_error("wallet_addEthereumChain", None, e))?;
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        self.provider
            .request("eth_accounts", ())
            .await
            .map_err(|e| classify_provider_error("eth_accounts", None, e))
    }

    async fn send_transfer(&self, request: &TransferRequest) -> Result<H256, WalletError> {
        let mut call = json!({
            "from": request.from,
            "to": request.to,
            "value": format!("0x{:x}", request.value),
        });
        if let Some(data) = &request.data {
            call["data"] = json!(format!("0x{}", hex::encode(data)));
        }
        if let Some(gas) = request.gas {
            call["gas"] = json!(format!("0x{:x}", gas));
        }

        self.provider
            .request("eth_sendTransaction", json!([call]))
            .await
            .map_err(|e| classify_provider_error("eth_sendTransaction", None, e))
    }
}

fn parse_hex_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}
