//! # Configuration
//!
//! Constants used across the staking client, and the runtime [`Settings`]
//! loaded from the environment (optionally through a `.env` file).

use crate::error::{StakingError, StakingResult};
use bitcoin::Network;
use std::{path::PathBuf, str::FromStr};

/// Network and RPC configuration
pub mod network {
    use std::time::Duration;

    /// Default bitcoind RPC host
    pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";

    /// Default bitcoind RPC port (signet)
    pub const DEFAULT_RPC_PORT: &str = "38332";

    /// Default RPC username
    pub const DEFAULT_RPC_USER: &str = "user";

    /// Default RPC password
    pub const DEFAULT_RPC_PASSWORD: &str = "password";

    /// Default staking API base URL
    pub const DEFAULT_STAKING_API_BASE: &str = "https://staking-api.testnet.babylonlabs.io";

    /// Default Esplora-compatible explorer API base URL
    pub const DEFAULT_EXPLORER_API_BASE: &str = "https://mempool.space/signet/api";

    /// Default secondary chain LCD endpoint
    pub const DEFAULT_BBN_LCD_URL: &str = "https://babylon-testnet-api.nodes.guru";

    /// Default secondary chain id
    pub const DEFAULT_BBN_CHAIN_ID: &str = "bbn-test-5";

    /// Request timeout for network operations
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Attempts made for retryable network operations
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;

    /// Base delay between retries, doubled per attempt
    pub const RETRY_DELAY: Duration = Duration::from_millis(500);

    /// HTTP status the staking API uses for geo-blocked clients
    pub const GEO_BLOCKED_STATUS: u16 = 451;
}

/// Staking protocol constants
///
/// These values are client-side policy. Everything consensus-relevant
/// (covenant keys, timelocks, fees) comes from the versioned parameters.
pub mod staking {
    use std::time::Duration;

    /// Tolerance factor of the fee safety check.
    ///
    /// A signed transaction's fee must lie within
    /// `[expected / FEE_TOLERANCE, expected * FEE_TOLERANCE]`.
    pub const FEE_TOLERANCE: u64 = 2;

    /// How long a local intermediate delegation may stay unconfirmed before
    /// it becomes eligible for removal (if it is also gone from the mempool).
    pub const MAX_PENDING_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

    /// Interval between delegation verification polls
    pub const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Outputs below this value are not created; the amount goes to fees
    pub const DUST_THRESHOLD_SAT: u64 = 546;

    /// UTXOs below this value are never offered as staking inputs
    pub const LOW_VALUE_UTXO_THRESHOLD: u64 = 10_000;

    /// Default number of finality providers a delegation may restake to
    pub const DEFAULT_MAX_FINALITY_PROVIDERS: u32 = 1;

    /// Gas limit used for delegation-creation messages
    pub const BBN_GAS_LIMIT: u64 = 600_000;

    /// Default gas price in ubbn
    pub const DEFAULT_BBN_GAS_PRICE: f64 = 0.002;

    /// Fee denomination on the secondary chain
    pub const BBN_DENOM: &str = "ubbn";

    /// Bech32 prefix of secondary chain addresses
    pub const BBN_ADDRESS_PREFIX: &str = "bbn";
}

/// Transaction size estimates in virtual bytes
pub mod vsize {
    /// Version, locktime, segwit marker and the input/output counts
    pub const TX_OVERHEAD: u64 = 11;

    /// P2TR key-path input (outpoint, sequence, 64-byte signature)
    pub const P2TR_INPUT: u64 = 58;

    /// P2WPKH input (outpoint, sequence, ECDSA signature and pubkey)
    pub const P2WPKH_INPUT: u64 = 68;

    /// Outpoint, empty scriptSig length and sequence of any input
    pub const INPUT_BASE: u64 = 41;

    /// Value and script length prefix of any output
    pub const OUTPUT_BASE: u64 = 9;
}

/// File paths and names
pub mod files {
    /// Directory under the user's data dir holding intermediate delegations
    pub const STORE_DIR_NAME: &str = "btc-staking-client";

    /// Suffix of per-staker delegation files
    pub const DELEGATIONS_FILE_SUFFIX: &str = "delegations.json";
}

/// Environment variable names
pub mod env {
    /// bitcoind RPC host override
    pub const RPC_URL: &str = "RPC_URL";

    /// bitcoind RPC port override
    pub const RPC_PORT: &str = "RPC_PORT";

    /// bitcoind RPC username override
    pub const RPC_USER: &str = "RPC_USER";

    /// bitcoind RPC password override
    pub const RPC_PASSWORD: &str = "RPC_PASSWORD";

    /// Staking API base URL
    pub const STAKING_API_URL: &str = "STAKING_API_URL";

    /// Explorer API base URL
    pub const EXPLORER_API_URL: &str = "EXPLORER_API_URL";

    /// Bitcoin network name (bitcoin, testnet, signet, regtest)
    pub const BTC_NETWORK: &str = "BTC_NETWORK";

    /// Hex secret key of the local Bitcoin signer
    pub const BTC_SECRET_KEY: &str = "BTC_SECRET_KEY";

    /// Address type of the local Bitcoin signer (p2tr or p2wpkh)
    pub const BTC_ADDRESS_TYPE: &str = "BTC_ADDRESS_TYPE";

    /// Chain backend for the local Bitcoin signer (explorer or node)
    pub const BTC_CHAIN_BACKEND: &str = "BTC_CHAIN_BACKEND";

    /// Secondary chain LCD endpoint
    pub const BBN_LCD_URL: &str = "BBN_LCD_URL";

    /// Secondary chain id
    pub const BBN_CHAIN_ID: &str = "BBN_CHAIN_ID";

    /// Hex secret key of the local secondary chain signer
    pub const BBN_SECRET_KEY: &str = "BBN_SECRET_KEY";

    /// Gas price in ubbn
    pub const BBN_GAS_PRICE: &str = "BBN_GAS_PRICE";

    /// Override for the intermediate delegation store directory
    pub const STORE_DIR: &str = "STORE_DIR";
}

/// Connection settings of the bitcoind RPC backend
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

/// Runtime settings resolved from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub network: Network,
    pub staking_api_url: String,
    pub explorer_api_url: String,
    pub rpc: RpcSettings,
    pub btc_secret_key: Option<String>,
    pub btc_address_type: String,
    pub btc_chain_backend: String,
    pub bbn_lcd_url: String,
    pub bbn_chain_id: String,
    pub bbn_secret_key: Option<String>,
    pub bbn_gas_price: f64,
    pub store_dir: PathBuf,
}

impl Settings {
    /// Load settings from the environment, reading `.env` first if present.
    pub fn from_env() -> StakingResult<Self> {
        dotenv::dotenv().ok();

        let btc_network = match std::env::var(env::BTC_NETWORK) {
            Ok(name) => Network::from_str(&name)
                .map_err(|_| StakingError::config(format!("Unknown BTC network: {}", name)))?,
            Err(_) => Network::Signet,
        };

        let bbn_gas_price = match std::env::var(env::BBN_GAS_PRICE) {
            Ok(raw) => raw
                .parse::<f64>()
                .map_err(|_| StakingError::config(format!("Invalid gas price: {}", raw)))?,
            Err(_) => staking::DEFAULT_BBN_GAS_PRICE,
        };

        let store_dir = match std::env::var(env::STORE_DIR) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(files::STORE_DIR_NAME),
        };

        Ok(Self {
            network: btc_network,
            staking_api_url: var_or(env::STAKING_API_URL, network::DEFAULT_STAKING_API_BASE),
            explorer_api_url: var_or(env::EXPLORER_API_URL, network::DEFAULT_EXPLORER_API_BASE),
            rpc: RpcSettings {
                host: var_or(env::RPC_URL, network::DEFAULT_RPC_HOST),
                port: var_or(env::RPC_PORT, network::DEFAULT_RPC_PORT),
                user: var_or(env::RPC_USER, network::DEFAULT_RPC_USER),
                password: var_or(env::RPC_PASSWORD, network::DEFAULT_RPC_PASSWORD),
            },
            btc_secret_key: std::env::var(env::BTC_SECRET_KEY).ok(),
            btc_address_type: var_or(env::BTC_ADDRESS_TYPE, "p2tr"),
            btc_chain_backend: var_or(env::BTC_CHAIN_BACKEND, "explorer"),
            bbn_lcd_url: var_or(env::BBN_LCD_URL, network::DEFAULT_BBN_LCD_URL),
            bbn_chain_id: var_or(env::BBN_CHAIN_ID, network::DEFAULT_BBN_CHAIN_ID),
            bbn_secret_key: std::env::var(env::BBN_SECRET_KEY).ok(),
            bbn_gas_price,
            store_dir,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
