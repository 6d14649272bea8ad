//! Configuration management for the Meridian Executor
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub executor: ExecutorConfig,
    pub database: DatabaseConfig,
    pub wallet: WalletBridgeConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: BTreeMap<String, ChainTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    pub instance_id: Option<String>,
    /// Chain used when a record resolves to nothing else
    pub default_chain_id: u64,
    pub queue_poll_interval_ms: u64,
    pub execute_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Random spread added to each poll period so the loops do not hit the
    /// store and RPC endpoints in lockstep
    pub poll_jitter_ms: u64,
    /// Settle delay between chain adaptation and the signature request
    pub settle_delay_ms: u64,
    /// A submitted transaction without a receipt for this long is surfaced
    /// as stale for manual intervention
    pub stale_after_secs: u64,
    /// Bound on the in-memory history bucket of settled records
    pub history_limit: usize,
    /// Settled store rows older than this are cleared
    pub settled_retention_secs: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletBridgeConfig {
    /// JSON-RPC endpoint of the wallet bridge
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Static description of a supported network
#[derive(Debug, Clone, Deserialize)]
pub struct ChainTarget {
    pub chain_id: u64,
    pub name: String,
    pub native_currency: NativeCurrency,
    /// Ordered fallback list; the first reachable endpoint wins
    pub rpc_urls: Vec<String>,
    /// Explorer URL template with a `{hash}` placeholder
    pub explorer_url: String,
    /// Known token contracts on this chain: symbol -> address
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

fn default_true() -> bool {
    true
}

impl ChainTarget {
    /// Hex chain id as wallets expect it, derived from the numeric id
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }

    /// Explorer link for a transaction hash
    pub fn explorer_link(&self, tx_hash: &str) -> String {
        self.explorer_url.replace("{hash}", tx_hash)
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("MERIDIAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                for (symbol, address) in &chain.tokens {
                    if address.parse::<ethers::types::Address>().is_err() {
                        anyhow::bail!(
                            "Chain {} token {} has an invalid address: {}",
                            name,
                            symbol,
                            address
                        );
                    }
                }
            }
        }

        if self
            .enabled_chains()
            .iter()
            .all(|(_, c)| c.chain_id != self.executor.default_chain_id)
        {
            anyhow::bail!(
                "Default chain {} is not among the enabled chains",
                self.executor.default_chain_id
            );
        }

        // The resolver runs on the execution cadence; it must see a newly
        // confirmed approval within one reconcile interval.
        if self.executor.execute_interval_ms > self.executor.reconcile_interval_ms {
            tracing::warn!(
                "execute_interval_ms ({}) exceeds reconcile_interval_ms ({}) - approval releases will lag",
                self.executor.execute_interval_ms,
                self.executor.reconcile_interval_ms
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainTarget)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain target by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainTarget> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    /// Instance id, generated when the config leaves it unset
    pub fn instance_id(&self) -> String {
        self.executor
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("meridian-{}", uuid::Uuid::new_v4()))
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_hex_id_derivation() {
        let target = ChainTarget {
            chain_id: 8453,
            name: "Base".to_string(),
            native_currency: NativeCurrency {
                name: "Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://mainnet.base.org".to_string()],
            explorer_url: "https://basescan.org/tx/{hash}".to_string(),
            tokens: BTreeMap::new(),
            enabled: true,
        };
        assert_eq!(target.hex_id(), "0x2105");
        assert_eq!(
            target.explorer_link("0xabc"),
            "https://basescan.org/tx/0xabc"
        );
    }
}
