//! # Delegations
//!
//! The collapsed view of a delegation as served by the staking API (both the
//! V1 and V2 generations), the locally persisted intermediate records, and the
//! logic that merges the two.
//!
//! ## Components
//!
//! - **Reconcile**: pure two-source merge with a mempool-membership lookup
//! - **Store**: per-staker persistence of intermediate records
//! - **Tracker**: store + API + mempool glued together for callers

pub mod reconcile;
pub mod store;
pub mod tracker;

pub use reconcile::{reconcile, MempoolLookup, Reconciliation};
pub use store::{JsonFileStore, LocalStore, MemoryStore};
pub use tracker::DelegationTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API generation a delegation record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationSchema {
    V1,
    V2,
}

/// Lifecycle state of a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationState {
    Pending,
    Verified,
    Active,
    TimelockUnbonding,
    EarlyUnbonding,
    TimelockWithdrawable,
    EarlyUnbondingWithdrawable,
    TimelockSlashingWithdrawable,
    EarlyUnbondingSlashingWithdrawable,
    TimelockWithdrawn,
    EarlyUnbondingWithdrawn,
    TimelockSlashingWithdrawn,
    EarlyUnbondingSlashingWithdrawn,
    Slashed,
    // V1 only
    UnbondingRequested,
    Unbonding,
    Unbonded,
    Withdrawn,
    Overflow,
    Expired,
    // Local only
    IntermediatePendingVerification,
    IntermediatePendingBtcConfirmation,
    IntermediateUnbondingSubmitted,
    IntermediateWithdrawalSubmitted,
    #[serde(other)]
    Unknown,
}

impl DelegationState {
    /// Parse an API state string; unrecognised values map to `Unknown`
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(raw.to_ascii_uppercase()))
            .unwrap_or(DelegationState::Unknown)
    }

    /// No further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelegationState::TimelockWithdrawn
                | DelegationState::EarlyUnbondingWithdrawn
                | DelegationState::TimelockSlashingWithdrawn
                | DelegationState::EarlyUnbondingSlashingWithdrawn
                | DelegationState::Withdrawn
                | DelegationState::Expired
        )
    }

    /// Funds can be withdrawn back to the staker
    pub fn is_withdrawable(&self) -> bool {
        matches!(
            self,
            DelegationState::TimelockWithdrawable
                | DelegationState::EarlyUnbondingWithdrawable
                | DelegationState::TimelockSlashingWithdrawable
                | DelegationState::EarlyUnbondingSlashingWithdrawable
                | DelegationState::Unbonded
        )
    }

    /// State only ever set locally while an action is in flight
    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            DelegationState::IntermediatePendingVerification
                | DelegationState::IntermediatePendingBtcConfirmation
                | DelegationState::IntermediateUnbondingSubmitted
                | DelegationState::IntermediateWithdrawalSubmitted
        )
    }

    /// The staker may request early unbonding
    pub fn can_unbond(&self) -> bool {
        matches!(self, DelegationState::Active)
    }

    /// Whether an API record in `api_state` replaces a local record in this
    /// state. Submitted unbondings and withdrawals wait for the API to move
    /// past the state the action was taken from; every other local record
    /// goes as soon as the API knows the hash.
    pub fn superseded_by(&self, api_state: DelegationState) -> bool {
        match self {
            DelegationState::IntermediateUnbondingSubmitted => !api_state.can_unbond(),
            DelegationState::IntermediateWithdrawalSubmitted => !api_state.is_withdrawable(),
            _ => true,
        }
    }
}

impl fmt::Display for DelegationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Covenant committee signature over an unbonding transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovenantSignature {
    pub covenant_pk_hex: String,
    pub signature_hex: String,
}

/// A delegation as seen by the client, independent of API generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub staking_tx_hash_hex: String,
    pub staker_pk_hex: String,
    pub finality_provider_pks_hex: Vec<String>,
    pub amount_sat: u64,
    pub timelock: u16,
    pub start_height: u32,
    pub end_height: u32,
    pub staking_tx_hex: Option<String>,
    pub unbonding_tx_hex: Option<String>,
    pub covenant_unbonding_signatures: Vec<CovenantSignature>,
    pub slashing_tx_hex: Option<String>,
    pub unbonding_slashing_tx_hex: Option<String>,
    pub state: DelegationState,
    /// Parameter version for V2 records; V1 records resolve by start height
    pub params_version: Option<u32>,
    pub schema: DelegationSchema,
}

/// Which output a withdrawal spends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalPath {
    /// Expired staking output, timelock leaf
    StakingTimelock,
    /// Settled unbonding output, unbonding-timelock leaf
    EarlyUnbonding,
    /// Change output of the slashing tx of the staking output
    StakingSlashingChange,
    /// Change output of the slashing tx of the unbonding output
    UnbondingSlashingChange,
}

impl Delegation {
    /// Withdrawal path implied by the delegation's state
    pub fn withdrawal_path(&self) -> Option<WithdrawalPath> {
        match self.state {
            DelegationState::TimelockWithdrawable => Some(WithdrawalPath::StakingTimelock),
            DelegationState::EarlyUnbondingWithdrawable => Some(WithdrawalPath::EarlyUnbonding),
            DelegationState::TimelockSlashingWithdrawable => {
                Some(WithdrawalPath::StakingSlashingChange)
            }
            DelegationState::EarlyUnbondingSlashingWithdrawable => {
                Some(WithdrawalPath::UnbondingSlashingChange)
            }
            DelegationState::Unbonded => {
                if self.unbonding_tx_hex.is_some() {
                    Some(WithdrawalPath::EarlyUnbonding)
                } else {
                    Some(WithdrawalPath::StakingTimelock)
                }
            }
            _ => None,
        }
    }
}

/// Locally persisted record of an in-flight action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateDelegation {
    pub staking_tx_hash_hex: String,
    pub staker_pk_hex: String,
    #[serde(default)]
    pub finality_provider_pks_hex: Vec<String>,
    pub amount_sat: u64,
    pub timelock: u16,
    pub state: DelegationState,
    pub start_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub staking_tx_hex: Option<String>,
    #[serde(default)]
    pub params_version: Option<u32>,
}

impl IntermediateDelegation {
    pub fn to_delegation(&self) -> Delegation {
        Delegation {
            staking_tx_hash_hex: self.staking_tx_hash_hex.clone(),
            staker_pk_hex: self.staker_pk_hex.clone(),
            finality_provider_pks_hex: self.finality_provider_pks_hex.clone(),
            amount_sat: self.amount_sat,
            timelock: self.timelock,
            start_height: 0,
            end_height: 0,
            staking_tx_hex: self.staking_tx_hex.clone(),
            unbonding_tx_hex: None,
            covenant_unbonding_signatures: Vec::new(),
            slashing_tx_hex: None,
            unbonding_slashing_tx_hex: None,
            state: self.state,
            params_version: self.params_version,
            schema: DelegationSchema::V2,
        }
    }

    /// Intermediate record for an action taken on an indexed delegation
    pub fn from_delegation(
        delegation: &Delegation,
        state: DelegationState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            staking_tx_hash_hex: delegation.staking_tx_hash_hex.clone(),
            staker_pk_hex: delegation.staker_pk_hex.clone(),
            finality_provider_pks_hex: delegation.finality_provider_pks_hex.clone(),
            amount_sat: delegation.amount_sat,
            timelock: delegation.timelock,
            state,
            start_timestamp: now,
            staking_tx_hex: delegation.staking_tx_hex.clone(),
            params_version: delegation.params_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!(DelegationState::parse("ACTIVE"), DelegationState::Active);
        assert_eq!(DelegationState::parse("active"), DelegationState::Active);
        assert_eq!(
            DelegationState::parse("EARLY_UNBONDING_SLASHING_WITHDRAWABLE"),
            DelegationState::EarlyUnbondingSlashingWithdrawable
        );
        assert_eq!(
            DelegationState::parse("INTERMEDIATE_PENDING_VERIFICATION"),
            DelegationState::IntermediatePendingVerification
        );
        assert_eq!(DelegationState::parse("SOMETHING_NEW"), DelegationState::Unknown);
        assert_eq!(DelegationState::Verified.to_string(), "VERIFIED");
    }

    #[test]
    fn test_state_helpers() {
        assert!(DelegationState::TimelockWithdrawn.is_terminal());
        assert!(DelegationState::Unbonded.is_withdrawable());
        assert!(!DelegationState::Active.is_withdrawable());
        assert!(DelegationState::IntermediateUnbondingSubmitted.is_intermediate());
        assert!(!DelegationState::Pending.is_intermediate());
    }

    #[test]
    fn test_submitted_actions_wait_for_api_transition() {
        let unbonding = DelegationState::IntermediateUnbondingSubmitted;
        assert!(!unbonding.superseded_by(DelegationState::Active));
        assert!(unbonding.superseded_by(DelegationState::EarlyUnbonding));

        let withdrawal = DelegationState::IntermediateWithdrawalSubmitted;
        assert!(!withdrawal.superseded_by(DelegationState::TimelockWithdrawable));
        assert!(withdrawal.superseded_by(DelegationState::TimelockWithdrawn));

        assert!(DelegationState::IntermediatePendingVerification.superseded_by(DelegationState::Pending));
    }

    #[test]
    fn test_intermediate_tolerates_missing_optionals() {
        let json = r#"{
            "staking_tx_hash_hex": "aa",
            "staker_pk_hex": "bb",
            "amount_sat": 100000,
            "timelock": 150,
            "state": "INTERMEDIATE_PENDING_VERIFICATION",
            "start_timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let record: IntermediateDelegation = serde_json::from_str(json).unwrap();
        assert!(record.staking_tx_hex.is_none());
        assert!(record.finality_provider_pks_hex.is_empty());
        assert_eq!(record.to_delegation().state, DelegationState::IntermediatePendingVerification);
    }
}
