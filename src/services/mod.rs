//! # Services Module
//!
//! External service integrations for the staking client.
//!
//! ## Components
//!
//! - **Staking API**: indexer REST client for parameters and delegations
//! - **Explorer Client**: Esplora-style block explorer for UTXOs, fees and proofs
//! - **RPC Client**: Bitcoin Core RPC client
//! - **Babylon**: BBN chain message types and Cosmos transaction helpers

pub mod babylon;
pub mod explorer_client;
pub mod rpc_client;
pub mod staking_api;

pub use explorer_client::ExplorerClient;
pub use rpc_client::NodeClient;
pub use staking_api::{DelegationApi, DelegationPage, HealthStatus, StakingApiClient};

use crate::config::Settings;
use crate::delegations::MempoolLookup;
use crate::error::{StakingError, StakingResult};
use crate::staking::Utxo;
use crate::wallet::NetworkFees;
use bitcoin::Address;

/// Where the software wallet reads chain state and pushes transactions
#[derive(Debug, Clone)]
pub enum ChainBackend {
    Explorer(ExplorerClient),
    Node(NodeClient),
}

impl ChainBackend {
    /// Select the backend named by `BTC_CHAIN_BACKEND` (`explorer` or `node`)
    pub fn from_settings(settings: &Settings) -> StakingResult<Self> {
        match settings.btc_chain_backend.as_str() {
            "explorer" => Ok(Self::Explorer(ExplorerClient::new(&settings.explorer_api_url)?)),
            "node" => Ok(Self::Node(NodeClient::new(&settings.rpc)?)),
            other => Err(StakingError::config(format!("Unknown chain backend: {}", other))),
        }
    }

    pub async fn utxos(&self, address: &Address) -> StakingResult<Vec<Utxo>> {
        match self {
            Self::Explorer(explorer) => explorer.get_utxos(address).await,
            Self::Node(node) => node.scan_utxos(address).await,
        }
    }

    pub async fn network_fees(&self) -> StakingResult<NetworkFees> {
        match self {
            Self::Explorer(explorer) => explorer.get_fee_estimates().await,
            Self::Node(node) => node.get_network_fees().await,
        }
    }

    pub async fn tip_height(&self) -> StakingResult<u32> {
        match self {
            Self::Explorer(explorer) => explorer.get_tip_height().await,
            Self::Node(node) => node.get_tip_height().await,
        }
    }

    pub async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
        match self {
            Self::Explorer(explorer) => explorer.push_tx(tx_hex).await,
            Self::Node(node) => node.push_tx(tx_hex).await,
        }
    }
}

impl MempoolLookup for ChainBackend {
    async fn is_in_mempool(&self, txid: &str) -> StakingResult<bool> {
        match self {
            Self::Explorer(explorer) => explorer.is_in_mempool(txid).await,
            Self::Node(node) => node.is_in_mempool(txid).await,
        }
    }
}
