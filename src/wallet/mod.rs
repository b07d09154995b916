//! # Wallet Capabilities
//!
//! The interfaces the staking flows consume from the two wallets a staker
//! holds, and the closed set of connectors that implement them. A connector
//! is chosen by name at connect time from [`BTC_CONNECTORS`] /
//! [`BABYLON_CONNECTORS`]; before that the `Disconnected` variant answers
//! every call with a not-connected error.

pub mod babylon;
pub mod local;

pub use babylon::LocalBabylonWallet;
pub use local::{AddressKind, LocalWallet};

use crate::config::Settings;
use crate::error::{StakingError, StakingResult};
use crate::services::babylon::proto::Any;
use crate::services::ChainBackend;
use crate::staking::Utxo;
use serde::{Deserialize, Serialize};

/// Fee rates in sat/vB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFees {
    pub fastest: u64,
    pub half_hour: u64,
    pub hour: u64,
    pub economy: u64,
}

/// Message signature scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Legacy Bitcoin signed message, base64
    Ecdsa,
    /// BIP340 Schnorr over the signed-message hash, base64
    Bip340,
}

/// Bitcoin wallet capability
#[allow(async_fn_in_trait)]
pub trait BtcWallet {
    fn connector_name(&self) -> &'static str;
    fn is_connected(&self) -> bool;
    async fn get_address(&self) -> StakingResult<String>;
    async fn get_public_key_hex(&self) -> StakingResult<String>;
    async fn sign_psbt(&self, psbt_hex: &str) -> StakingResult<String>;

    async fn sign_psbts(&self, psbts_hex: &[String]) -> StakingResult<Vec<String>> {
        let mut signed = Vec::with_capacity(psbts_hex.len());
        for psbt in psbts_hex {
            signed.push(self.sign_psbt(psbt).await?);
        }
        Ok(signed)
    }

    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> StakingResult<String>;
    async fn push_tx(&self, tx_hex: &str) -> StakingResult<String>;
    async fn get_utxos(&self, address: &str, min_amount: Option<u64>) -> StakingResult<Vec<Utxo>>;
    async fn get_network_fees(&self) -> StakingResult<NetworkFees>;
    async fn get_btc_tip_height(&self) -> StakingResult<u32>;
}

/// BBN chain wallet capability
#[allow(async_fn_in_trait)]
pub trait BabylonWallet {
    fn is_connected(&self) -> bool;
    async fn address(&self) -> StakingResult<String>;
    /// Sign a transaction carrying `messages`; returns encoded `TxRaw` bytes
    async fn sign_messages(&self, messages: Vec<Any>) -> StakingResult<Vec<u8>>;
    /// Broadcast signed transaction bytes; returns the chain tx hash
    async fn broadcast(&self, tx_bytes: &[u8]) -> StakingResult<String>;
}

pub const BTC_CONNECTORS: &[&str] = &["local"];
pub const BABYLON_CONNECTORS: &[&str] = &["local"];

/// Connected (or not) Bitcoin wallet
#[derive(Debug, Default)]
pub enum BtcConnector {
    #[default]
    Disconnected,
    Local(LocalWallet),
}

/// Connected (or not) BBN wallet
#[derive(Debug, Default)]
pub enum BabylonConnector {
    #[default]
    Disconnected,
    Local(LocalBabylonWallet),
}

fn not_connected(chain: &str) -> StakingError {
    StakingError::WalletNotConnected {
        chain: chain.to_string(),
    }
}

/// Connect the Bitcoin wallet registered under `name`
pub fn connect_btc(name: &str, settings: &Settings) -> StakingResult<BtcConnector> {
    match name {
        "local" => {
            let secret = settings
                .btc_secret_key
                .as_deref()
                .ok_or_else(|| StakingError::config("BTC_SECRET_KEY is not set"))?;
            let kind = settings.btc_address_type.parse()?;
            let chain = ChainBackend::from_settings(settings)?;
            Ok(BtcConnector::Local(LocalWallet::new(secret, kind, settings.network, chain)?))
        }
        _ => Err(StakingError::UnknownConnector {
            name: name.to_string(),
        }),
    }
}

/// Connect the BBN wallet registered under `name`
pub fn connect_babylon(name: &str, settings: &Settings) -> StakingResult<BabylonConnector> {
    match name {
        "local" => {
            let secret = settings
                .bbn_secret_key
                .as_deref()
                .ok_or_else(|| StakingError::config("BBN_SECRET_KEY is not set"))?;
            Ok(BabylonConnector::Local(LocalBabylonWallet::new(
                secret,
                &settings.bbn_lcd_url,
                &settings.bbn_chain_id,
                settings.bbn_gas_price,
            )?))
        }
        _ => Err(StakingError::UnknownConnector {
            name: name.to_string(),
        }),
    }
}

impl BtcWallet for BtcConnector {
    fn connector_name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Local(wallet) => wallet.connector_name(),
        }
    }

    fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    async fn get_address(&self) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.get_address().await,
        }
    }

    async fn get_public_key_hex(&self) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.get_public_key_hex().await,
        }
    }

    async fn sign_psbt(&self, psbt_hex: &str) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.sign_psbt(psbt_hex).await,
        }
    }

    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.sign_message(message, scheme).await,
        }
    }

    async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.push_tx(tx_hex).await,
        }
    }

    async fn get_utxos(&self, address: &str, min_amount: Option<u64>) -> StakingResult<Vec<Utxo>> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.get_utxos(address, min_amount).await,
        }
    }

    async fn get_network_fees(&self) -> StakingResult<NetworkFees> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.get_network_fees().await,
        }
    }

    async fn get_btc_tip_height(&self) -> StakingResult<u32> {
        match self {
            Self::Disconnected => Err(not_connected("BTC")),
            Self::Local(wallet) => wallet.get_btc_tip_height().await,
        }
    }
}

impl BabylonWallet for BabylonConnector {
    fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    async fn address(&self) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BBN")),
            Self::Local(wallet) => wallet.address().await,
        }
    }

    async fn sign_messages(&self, messages: Vec<Any>) -> StakingResult<Vec<u8>> {
        match self {
            Self::Disconnected => Err(not_connected("BBN")),
            Self::Local(wallet) => wallet.sign_messages(messages).await,
        }
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> StakingResult<String> {
        match self {
            Self::Disconnected => Err(not_connected("BBN")),
            Self::Local(wallet) => wallet.broadcast(tx_bytes).await,
        }
    }
}
