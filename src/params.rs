//! # Versioned Staking Parameters
//!
//! The protocol publishes an ordered list of parameter versions, each active
//! from a Bitcoin activation height onwards. Covenant keys, quorum, timelocks
//! and slashing terms can change between versions, so every script that is
//! rebuilt for an existing delegation must use the version that was active
//! when that delegation was created.
//!
//! [`ParamsSet`] is validated once at load time and is immutable afterwards.
//! A refetch produces a new set that replaces the old one wholesale.

use crate::delegations::Delegation;
use crate::error::{StakingError, StakingResult};
use bitcoin::{ScriptBuf, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fraction of a staked amount sent to the slashing script when slashed.
///
/// Kept as an exact decimal (`numerator / denominator`) so that the slashed
/// amount is always `floor(value * rate)` without floating point drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashingRate {
    numerator: u64,
    denominator: u64,
}

impl SlashingRate {
    /// Slashed portion of `value`, rounded down
    pub fn apply(&self, value: u64) -> u64 {
        ((value as u128 * self.numerator as u128) / self.denominator as u128) as u64
    }
}

impl FromStr for SlashingRate {
    type Err = StakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StakingError::invalid_input(format!("Invalid slashing rate: {}", s));
        let trimmed = s.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
            || fraction.len() > 18
        {
            return Err(invalid());
        }

        let denominator = 10u64.pow(fraction.len() as u32);
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let fraction: u64 = if fraction.is_empty() { 0 } else { fraction.parse().map_err(|_| invalid())? };
        let numerator = whole
            .checked_mul(denominator)
            .and_then(|n| n.checked_add(fraction))
            .ok_or_else(invalid)?;

        if numerator == 0 || numerator >= denominator {
            return Err(StakingError::invalid_input(format!(
                "Slashing rate must be within (0, 1): {}",
                s
            )));
        }

        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl fmt::Display for SlashingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decimals = self.denominator.to_string().len() - 1;
        write!(f, "0.{:0width$}", self.numerator, width = decimals)
    }
}

impl Serialize for SlashingRate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SlashingRate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One versioned parameter set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterVersion {
    pub version: u32,
    pub btc_activation_height: u32,
    pub covenant_pks: Vec<XOnlyPublicKey>,
    pub covenant_quorum: u32,
    pub unbonding_time_blocks: u16,
    pub unbonding_fee_sat: u64,
    pub min_staking_value_sat: u64,
    pub max_staking_value_sat: u64,
    pub min_staking_time_blocks: u16,
    pub max_staking_time_blocks: u16,
    pub slashing_pk_script: ScriptBuf,
    pub slashing_rate: SlashingRate,
    pub min_slashing_tx_fee_sat: u64,
    pub max_finality_providers: u32,
    #[serde(default)]
    pub allow_list_expiration_height: Option<u32>,
}

impl ParameterVersion {
    /// Whether the staking term is fixed (callers cannot choose a timelock)
    pub fn is_fixed_term(&self) -> bool {
        self.min_staking_time_blocks == self.max_staking_time_blocks
    }
}

/// Validated, immutable list of parameter versions
///
/// Entries are kept sorted by version descending, which by construction is
/// also activation-height descending.
#[derive(Debug, Clone)]
pub struct ParamsSet {
    versions: Vec<ParameterVersion>,
}

impl ParamsSet {
    /// Validate and build a parameter set.
    ///
    /// Fails with a consistency error when the version order and the
    /// activation-height order disagree, when a version number repeats, or
    /// when the genesis entry (version 0) is missing.
    pub fn new(mut versions: Vec<ParameterVersion>) -> StakingResult<Self> {
        versions.sort_by(|a, b| b.version.cmp(&a.version));

        for pair in versions.windows(2) {
            let (newer, older) = (&pair[0], &pair[1]);
            if newer.version == older.version {
                return Err(StakingError::consistency(format!(
                    "Duplicate parameter version {}",
                    newer.version
                )));
            }
            if newer.btc_activation_height < older.btc_activation_height {
                return Err(StakingError::consistency(format!(
                    "Parameter version {} activates at {} before version {} at {}",
                    newer.version,
                    newer.btc_activation_height,
                    older.version,
                    older.btc_activation_height
                )));
            }
        }

        if !versions.iter().any(|v| v.version == 0) {
            return Err(StakingError::consistency("Genesis parameters (version 0) not found"));
        }

        log::debug!("Loaded {} parameter versions", versions.len());
        Ok(Self { versions })
    }

    /// The version active at `height`: greatest activation height `<= height`
    pub fn resolve_by_height(&self, height: u32) -> Option<&ParameterVersion> {
        self.versions
            .iter()
            .find(|v| v.btc_activation_height <= height)
    }

    /// Exact match on the version number
    pub fn resolve_by_version(&self, version: u32) -> Option<&ParameterVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// The genesis (version 0) parameters
    pub fn genesis(&self) -> &ParameterVersion {
        // Existence is checked in `new`
        &self.versions[self.versions.len() - 1]
    }

    /// The most recent parameter version
    pub fn latest(&self) -> &ParameterVersion {
        &self.versions[0]
    }

    /// Parameters an existing delegation was created under.
    ///
    /// Uses the stored version when present, otherwise the delegation's
    /// staking start height.
    pub fn resolve_for_delegation(&self, delegation: &Delegation) -> StakingResult<&ParameterVersion> {
        let resolved = match delegation.params_version {
            Some(version) => self.resolve_by_version(version),
            None => self.resolve_by_height(delegation.start_height),
        };
        resolved.ok_or_else(|| {
            StakingError::consistency(format!(
                "No parameters found for delegation {} (version {:?}, height {})",
                delegation.staking_tx_hash_hex, delegation.params_version, delegation.start_height
            ))
        })
    }

    pub fn versions(&self) -> &[ParameterVersion] {
        &self.versions
    }
}
