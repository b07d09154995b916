//! # Error Types for the Staking Client
//!
//! Every failure surfaced by the library is a [`StakingError`]. Variants are
//! grouped by how the caller is expected to react:
//!
//! - **Validation**: bad amount, timelock, fee rate or UTXO set. Raised before
//!   any I/O and corrected by the caller, never retried.
//! - **Wallet**: rejection, disconnection or a missing signature. Retryable by
//!   re-invoking the same step.
//! - **Network**: HTTP, RPC and transport failures. Eligible for bounded
//!   automatic retry, except geo-blocking which is terminal.
//! - **Consistency**: txid mismatch after signing, inconsistent parameters,
//!   missing genesis parameters. Always fatal to the current flow.
//! - **Fee safety**: the signed fee is outside the tolerated band. Fatal.

use thiserror::Error;

/// Main error type for all staking operations
#[derive(Debug, Error)]
pub enum StakingError {
    /// Amount or timelock outside the parameter bounds
    #[error("Invalid staking data: {message}")]
    InvalidStakingData { message: String },

    /// Fee rate of zero
    #[error("Invalid fee rate: {fee_rate} sat/vB")]
    InvalidFeeRate { fee_rate: u64 },

    /// The usable UTXO set cannot fund the transaction
    #[error("Not enough usable balance: required {required} sats, available {available} sats")]
    InsufficientBalance { required: u64, available: u64 },

    /// Malformed caller input (keys, addresses, hex)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A signing step was attempted without a connected wallet
    #[error("{chain} wallet is not connected")]
    WalletNotConnected { chain: String },

    /// The wallet refused or failed a request
    #[error("Wallet request failed: {message}")]
    WalletRejected { message: String },

    /// Signature extraction yielded nothing
    #[error("No signature found: {context}")]
    NoSignature { context: String },

    /// No connector is registered under the requested name
    #[error("Unknown wallet connector: {name}")]
    UnknownConnector { name: String },

    /// Non-success HTTP status from a remote endpoint
    #[error("HTTP {status} from {endpoint}: {message}")]
    Http {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The staking API refuses service in this region
    #[error("Service unavailable in your region")]
    GeoBlocked,

    /// Transport-level request failures
    #[error("Network request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// bitcoind RPC communication failures
    #[error("RPC communication failed: {source}")]
    Rpc {
        #[from]
        source: bitcoincore_rpc::Error,
    },

    /// Parameter set, genesis or other invariants violated
    #[error("Consistency error: {message}")]
    Consistency { message: String },

    /// The signed transaction is not the one that was registered
    #[error("Staking transaction hash mismatch: expected {expected}, got {actual}")]
    TxidMismatch { expected: String, actual: String },

    /// Signed fee above the tolerated band
    #[error("Estimated fee is too high: {actual} sats, expected at most {max} sats")]
    FeeTooHigh { actual: u64, max: u64 },

    /// Signed fee below the tolerated band
    #[error("Estimated fee is too low: {actual} sats, expected at least {min} sats")]
    FeeTooLow { actual: u64, min: u64 },

    /// Script or taproot tree construction failed
    #[error("Script error: {message}")]
    Script { message: String },

    /// Transaction, PSBT, protobuf or key (de)serialization failed
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// File I/O operations
    #[error("File operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON processing error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The secondary chain rejected a transaction
    #[error("BBN transaction failed with code {code}: {log}")]
    ChainRejected { code: u32, log: String },

    /// Generic operation failures
    #[error("Operation failed: {operation} - {message}")]
    Operation { operation: String, message: String },
}

/// Result type alias for staking operations
pub type StakingResult<T> = Result<T, StakingError>;

impl StakingError {
    /// Create an operation error
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid staking data error
    pub fn invalid_staking(message: impl Into<String>) -> Self {
        Self::InvalidStakingData {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a consistency error
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Create a script construction error
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create a wallet rejection error
    pub fn wallet(message: impl Into<String>) -> Self {
        Self::WalletRejected {
            message: message.into(),
        }
    }

    /// Check if this error is retryable (network/temporary issues)
    ///
    /// Geo-blocking and client-side (4xx) statuses are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StakingError::Network { .. } | StakingError::Rpc { .. } => true,
            StakingError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if this error is a caller-correctable validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StakingError::InvalidStakingData { .. }
                | StakingError::InvalidFeeRate { .. }
                | StakingError::InsufficientBalance { .. }
                | StakingError::InvalidInput { .. }
        )
    }

    /// Check if this error must abort the current flow without retry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StakingError::Consistency { .. }
                | StakingError::TxidMismatch { .. }
                | StakingError::FeeTooHigh { .. }
                | StakingError::FeeTooLow { .. }
                | StakingError::GeoBlocked
        )
    }
}

impl From<bitcoin::consensus::encode::Error> for StakingError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        StakingError::encoding(err.to_string())
    }
}

impl From<bitcoin::psbt::Error> for StakingError {
    fn from(err: bitcoin::psbt::Error) -> Self {
        StakingError::encoding(format!("PSBT: {}", err))
    }
}

impl From<hex::FromHexError> for StakingError {
    fn from(err: hex::FromHexError) -> Self {
        StakingError::invalid_input(format!("Invalid hex: {}", err))
    }
}

impl From<bitcoin::hex::HexToBytesError> for StakingError {
    fn from(err: bitcoin::hex::HexToBytesError) -> Self {
        StakingError::invalid_input(format!("Invalid hex: {}", err))
    }
}

impl From<bitcoin::secp256k1::Error> for StakingError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        StakingError::invalid_input(format!("Invalid key or signature: {}", err))
    }
}
