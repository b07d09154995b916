//! # Staking Transactions
//!
//! Deterministic construction of everything a delegation needs on Bitcoin:
//! leaf scripts and taproot trees ([`scripts`]), unsigned PSBTs for the
//! staking, unbonding, slashing and withdrawal transactions
//! ([`transactions`]), UTXO selection ([`utxo`]), the fee safety check
//! ([`fee`]) and signature handling ([`signatures`]).
//!
//! All builders are pure: given the same parameter version, keys, UTXOs and
//! fee rate they produce byte-identical transactions. The staking flow relies
//! on this to rebuild the staking transaction after verification and compare
//! its txid with the one registered on the secondary chain.

pub mod fee;
pub mod scripts;
pub mod signatures;
pub mod transactions;
pub mod utxo;

pub use fee::{check_fee, estimate_vsize, InputKind};
pub use scripts::StakingScripts;
pub use transactions::{
    build_slashing_psbt, build_staking_psbt, build_unbonding_psbt, build_withdrawal_psbt,
    SlashingSource, StakingTxBuild, WithdrawalSource,
};
pub use utxo::Utxo;

use crate::error::{StakingError, StakingResult};
use crate::params::ParameterVersion;
use bitcoin::{Address, Network, PublicKey, XOnlyPublicKey};
use std::str::FromStr;

/// The staker's Bitcoin identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakerInfo {
    pub address: Address,
    pub public_key: XOnlyPublicKey,
}

impl StakerInfo {
    /// Parse a wallet-reported address and public key.
    ///
    /// Accepts both compressed (33-byte) and x-only (32-byte) key hex.
    pub fn new(address: &str, public_key_hex: &str, network: Network) -> StakingResult<Self> {
        let address = crate::utils::address::validate_and_parse(address, network)?;
        let public_key = parse_x_only(public_key_hex)?;
        Ok(Self {
            address,
            public_key,
        })
    }

    /// Input type used for size estimates of this staker's UTXOs
    pub fn input_kind(&self) -> StakingResult<InputKind> {
        let script = self.address.script_pubkey();
        if script.is_p2tr() {
            Ok(InputKind::P2tr)
        } else if script.is_p2wpkh() {
            Ok(InputKind::P2wpkh)
        } else {
            Err(StakingError::invalid_input(format!(
                "Unsupported staker address type: {}",
                self.address
            )))
        }
    }

    pub fn is_taproot(&self) -> bool {
        self.address.script_pubkey().is_p2tr()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }
}

/// Parse a compressed or x-only public key into its x-only form
pub fn parse_x_only(public_key_hex: &str) -> StakingResult<XOnlyPublicKey> {
    match public_key_hex.len() {
        64 => Ok(XOnlyPublicKey::from_str(public_key_hex)?),
        66 => {
            let pk = PublicKey::from_str(public_key_hex)
                .map_err(|e| StakingError::invalid_input(format!("Invalid public key: {}", e)))?;
            Ok(pk.inner.x_only_public_key().0)
        }
        n => Err(StakingError::invalid_input(format!(
            "Public key must be 32 or 33 bytes of hex, got {} characters",
            n
        ))),
    }
}

/// Everything one staking flow needs; lives only for that flow
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub staker: StakerInfo,
    pub utxos: Vec<Utxo>,
    pub fee_rate: u64,
    pub params: ParameterVersion,
    pub finality_provider_pks: Vec<XOnlyPublicKey>,
    pub network: Network,
    pub bbn_address: String,
}

impl SigningContext {
    pub fn scripts(&self, timelock: u16) -> StakingResult<StakingScripts> {
        StakingScripts::new(
            &self.params,
            &self.staker.public_key,
            &self.finality_provider_pks,
            timelock,
        )
    }
}

/// Validate caller input against a parameter version.
///
/// Returns the effective timelock: for fixed-term parameters the fixed value
/// replaces whatever the caller asked for.
pub fn validate_staking_input(
    params: &ParameterVersion,
    amount_sat: u64,
    requested_timelock: u16,
    fee_rate: u64,
    finality_provider_count: usize,
    utxos: &[Utxo],
) -> StakingResult<u16> {
    if amount_sat < params.min_staking_value_sat || amount_sat > params.max_staking_value_sat {
        return Err(StakingError::invalid_staking(format!(
            "Staking amount {} sats must be between {} and {} sats",
            amount_sat, params.min_staking_value_sat, params.max_staking_value_sat
        )));
    }

    let timelock = if params.is_fixed_term() {
        params.min_staking_time_blocks
    } else {
        if requested_timelock < params.min_staking_time_blocks
            || requested_timelock > params.max_staking_time_blocks
        {
            return Err(StakingError::invalid_staking(format!(
                "Staking term {} blocks must be between {} and {} blocks",
                requested_timelock, params.min_staking_time_blocks, params.max_staking_time_blocks
            )));
        }
        requested_timelock
    };

    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeRate { fee_rate });
    }

    let max_fps = params.max_finality_providers.max(1) as usize;
    if finality_provider_count == 0 || finality_provider_count > max_fps {
        return Err(StakingError::invalid_staking(format!(
            "Expected between 1 and {} finality providers, got {}",
            max_fps, finality_provider_count
        )));
    }

    if utxos.is_empty() {
        return Err(StakingError::InsufficientBalance {
            required: amount_sat,
            available: 0,
        });
    }

    Ok(timelock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::sample_version;
    use bitcoin::ScriptBuf;

    fn some_utxos() -> Vec<Utxo> {
        vec![utxo::tests::utxo(1, 200_000, &ScriptBuf::new())]
    }

    #[test]
    fn test_fixed_term_overrides_requested_timelock() {
        let mut params = sample_version(0, 100);
        params.min_staking_time_blocks = 1_000;
        params.max_staking_time_blocks = 1_000;

        let timelock = validate_staking_input(&params, 100_000, 500, 2, 1, &some_utxos()).unwrap();
        assert_eq!(timelock, 1_000);
    }

    #[test]
    fn test_amount_below_minimum_rejected() {
        let params = sample_version(0, 100);
        let err = validate_staking_input(
            &params,
            params.min_staking_value_sat - 1,
            150,
            2,
            1,
            &some_utxos(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid staking data"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_other_validation_failures() {
        let params = sample_version(0, 100);

        let err = validate_staking_input(&params, 100_000, 99, 2, 1, &some_utxos()).unwrap_err();
        assert!(matches!(err, StakingError::InvalidStakingData { .. }));

        let err = validate_staking_input(&params, 100_000, 150, 0, 1, &some_utxos()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid fee rate"));

        let err = validate_staking_input(&params, 100_000, 150, 2, 2, &some_utxos()).unwrap_err();
        assert!(matches!(err, StakingError::InvalidStakingData { .. }));

        let err = validate_staking_input(&params, 100_000, 150, 2, 1, &[]).unwrap_err();
        assert!(err.to_string().starts_with("Not enough usable balance"));
    }

    #[test]
    fn test_parse_x_only_forms() {
        let compressed = "0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
        let x_only = &compressed[2..];
        assert_eq!(parse_x_only(compressed).unwrap(), parse_x_only(x_only).unwrap());
        assert!(parse_x_only("abcd").is_err());
    }
}
