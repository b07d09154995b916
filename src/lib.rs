//! # BTC Staking Client
//!
//! Client-side library for staking bitcoin to a proof-of-stake chain: builds
//! the staking, unbonding, slashing and withdrawal transactions, registers
//! delegations on the BBN chain and tracks their lifecycle across the
//! staking API and local records.

pub mod config;
pub mod delegations;
pub mod error;
pub mod flow;
pub mod params;
pub mod services;
pub mod staking;
pub mod utils;
pub mod wallet;

// Re-export commonly used types
pub use delegations::{Delegation, DelegationState, DelegationTracker};
pub use error::{StakingError, StakingResult};
pub use flow::{submit_unbonding, submit_withdrawal, SigningStep, StakingFlow};
pub use params::{ParameterVersion, ParamsSet};
pub use services::{ExplorerClient, StakingApiClient};
pub use wallet::{BabylonWallet, BtcWallet};
