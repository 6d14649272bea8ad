//! Chain adapter: align the wallet's active network with a target chain
//!
//! Stateless and safely repeatable; nothing is retained between calls, so a
//! failed adaptation can simply be retried.

use crate::config::ChainTarget;
use crate::error::{ExecutorError, ExecutorResult};
use crate::wallet::{ChainDescriptor, WalletError, WalletProvider};

use tracing::{debug, info};

/// What the adapter had to do to reach the target chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterOutcome {
    /// Wallet was already on the target chain; zero wallet-facing calls made
    AlreadyAligned,
    /// A network switch sufficed
    Switched,
    /// The network had to be added to the wallet first
    AddedAndSwitched,
}

pub struct ChainAdapter;

impl ChainAdapter {
    /// Make the wallet's active network equal `target` before any
    /// submission that uses it.
    pub async fn ensure_chain(
        wallet: &dyn WalletProvider,
        target: &ChainTarget,
    ) -> ExecutorResult<AdapterOutcome> {
        let active = wallet
            .chain_id()
            .await
            .map_err(|e| ExecutorError::ConnectionFailed {
                chain_id: target.chain_id,
                message: e.to_string(),
            })?;

        if active == target.chain_id {
            debug!(chain_id = target.chain_id, "wallet already on target chain");
            return Ok(AdapterOutcome::AlreadyAligned);
        }

        match wallet.switch_chain(target.chain_id).await {
            Ok(()) => {
                info!(from = active, to = target.chain_id, "wallet network switched");
                crate::metrics::record_chain_switch(target.chain_id);
                Ok(AdapterOutcome::Switched)
            }
            Err(WalletError::UnknownChain { .. }) => {
                Self::add_then_switch(wallet, target, active).await
            }
            Err(WalletError::Rejected { message }) => Err(ExecutorError::NetworkSwitchFailed {
                chain_id: target.chain_id,
                message,
            }),
            Err(WalletError::MissingMethod { method }) => {
                Err(ExecutorError::MissingProviderMethod { method })
            }
            Err(e) => Err(ExecutorError::NetworkSwitchFailed {
                chain_id: target.chain_id,
                message: e.to_string(),
            }),
        }
    }

    /// The wallet does not know the chain: add the full network definition,
    /// then retry the switch once.
    async fn add_then_switch(
        wallet: &dyn WalletProvider,
        target: &ChainTarget,
        active: u64,
    ) -> ExecutorResult<AdapterOutcome> {
        info!(
            chain_id = target.chain_id,
            name = %target.name,
            "chain unknown to wallet, requesting network add"
        );

        let descriptor = ChainDescriptor::from_target(target);
        wallet
            .add_chain(&descriptor)
            .await
            .map_err(|e| ExecutorError::ChainAddFailed {
                chain_id: target.chain_id,
                message: e.to_string(),
            })?;

        wallet
            .switch_chain(target.chain_id)
            .await
            .map_err(|e| ExecutorError::NetworkSwitchFailed {
                chain_id: target.chain_id,
                message: e.to_string(),
            })?;

        info!(from = active, to = target.chain_id, "wallet network added and switched");
        crate::metrics::record_chain_switch(target.chain_id);
        Ok(AdapterOutcome::AddedAndSwitched)
    }
}
