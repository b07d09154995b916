//! # Staking Scripts
//!
//! Tapscript templates of the staking protocol and the taproot trees built
//! from them. All outputs use the BIP-341 NUMS point as internal key, so the
//! key path is unspendable and every spend goes through a script leaf.
//!
//! ```text
//! timelock:   <Staker_PK> OP_CHECKSIGVERIFY <T> OP_CHECKSEQUENCEVERIFY
//! unbonding:  <Staker_PK> OP_CHECKSIGVERIFY
//!             <Cov_PK1> OP_CHECKSIG ... <Cov_PKN> OP_CHECKSIGADD M OP_NUMEQUAL
//! slashing:   <Staker_PK> OP_CHECKSIGVERIFY
//!             <FP_PK> OP_CHECKSIGVERIFY | <FP_PK1> OP_CHECKSIG ... 1 OP_NUMEQUALVERIFY
//!             <Cov_PK1> OP_CHECKSIG ... <Cov_PKN> OP_CHECKSIGADD M OP_NUMEQUAL
//! ```
//!
//! Trees:
//! - staking output: slashing at depth 1, unbonding and timelock at depth 2
//! - unbonding output: slashing and unbonding-timelock at depth 1
//! - slashing change output: unbonding-timelock only

use crate::error::{StakingError, StakingResult};
use crate::params::ParameterVersion;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY, OP_CSV, OP_NUMEQUAL, OP_NUMEQUALVERIFY,
};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{ScriptBuf, XOnlyPublicKey};
use std::str::FromStr;

/// x-coordinate of the BIP-341 "nothing up my sleeve" point
pub const UNSPENDABLE_KEY: &str = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

/// Internal key of every staking-protocol taproot output
pub fn unspendable_internal_key() -> StakingResult<XOnlyPublicKey> {
    XOnlyPublicKey::from_str(UNSPENDABLE_KEY)
        .map_err(|e| StakingError::script(format!("Invalid NUMS key: {}", e)))
}

/// Sort keys lexicographically by their serialization and reject duplicates
pub fn prepare_multisig_keys(keys: &[XOnlyPublicKey]) -> StakingResult<Vec<XOnlyPublicKey>> {
    if keys.len() < 2 {
        return Err(StakingError::script(
            "Cannot create multisig script with less than 2 keys",
        ));
    }

    let mut sorted = keys.to_vec();
    sorted.sort_by_key(|k| k.serialize());

    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(StakingError::script("Duplicate key in multisig key list"));
    }

    Ok(sorted)
}

/// `k1 CHECKSIG k2 CHECKSIGADD ... quorum NUMEQUAL[VERIFY]` over sorted keys
pub fn multisig_script(
    keys: &[XOnlyPublicKey],
    quorum: u32,
    with_verify: bool,
) -> StakingResult<ScriptBuf> {
    let sorted = prepare_multisig_keys(keys)?;
    if quorum as usize > sorted.len() {
        return Err(StakingError::script(format!(
            "Quorum {} exceeds key count {}",
            quorum,
            sorted.len()
        )));
    }

    let mut builder = Builder::new();
    for (i, key) in sorted.iter().enumerate() {
        builder = builder.push_x_only_key(key);
        builder = if i == 0 {
            builder.push_opcode(OP_CHECKSIG)
        } else {
            builder.push_opcode(OP_CHECKSIGADD)
        };
    }

    builder = builder.push_int(quorum as i64);
    builder = if with_verify {
        builder.push_opcode(OP_NUMEQUALVERIFY)
    } else {
        builder.push_opcode(OP_NUMEQUAL)
    };

    Ok(builder.into_script())
}

/// `<pk> CHECKSIG[VERIFY]`
pub fn single_key_script(key: &XOnlyPublicKey, with_verify: bool) -> ScriptBuf {
    let builder = Builder::new().push_x_only_key(key);
    if with_verify {
        builder.push_opcode(OP_CHECKSIGVERIFY).into_script()
    } else {
        builder.push_opcode(OP_CHECKSIG).into_script()
    }
}

/// `<pk> CHECKSIGVERIFY <blocks> CSV`
pub fn timelock_script(key: &XOnlyPublicKey, blocks: u16) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

fn concat(scripts: &[&ScriptBuf]) -> ScriptBuf {
    let mut bytes = Vec::new();
    for script in scripts {
        bytes.extend_from_slice(script.as_bytes());
    }
    ScriptBuf::from_bytes(bytes)
}

/// The four leaf scripts of one delegation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingScripts {
    pub timelock: ScriptBuf,
    pub unbonding: ScriptBuf,
    pub slashing: ScriptBuf,
    pub unbonding_timelock: ScriptBuf,
}

impl StakingScripts {
    /// Build the leaf scripts from a parameter version, the staker key, the
    /// finality provider keys and the staking timelock.
    pub fn new(
        params: &ParameterVersion,
        staker_pk: &XOnlyPublicKey,
        finality_provider_pks: &[XOnlyPublicKey],
        staking_timelock: u16,
    ) -> StakingResult<Self> {
        if finality_provider_pks.is_empty() {
            return Err(StakingError::script("At least one finality provider key is required"));
        }
        if finality_provider_pks.contains(staker_pk) {
            return Err(StakingError::script("Staker key cannot be a finality provider key"));
        }

        let staker_sig = single_key_script(staker_pk, true);
        let covenant = multisig_script(&params.covenant_pks, params.covenant_quorum, false)?;
        let finality_provider = if finality_provider_pks.len() == 1 {
            single_key_script(&finality_provider_pks[0], true)
        } else {
            multisig_script(finality_provider_pks, 1, true)?
        };

        let scripts = Self {
            timelock: timelock_script(staker_pk, staking_timelock),
            unbonding: concat(&[&staker_sig, &covenant]),
            slashing: concat(&[&staker_sig, &finality_provider, &covenant]),
            unbonding_timelock: timelock_script(staker_pk, params.unbonding_time_blocks),
        };
        log::debug!(
            "Built staking scripts: timelock {} blocks, {} finality provider(s), {}-of-{} covenant",
            staking_timelock,
            finality_provider_pks.len(),
            params.covenant_quorum,
            params.covenant_pks.len()
        );
        Ok(scripts)
    }

    /// Taproot tree of the staking output
    pub fn staking_spend_info<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
    ) -> StakingResult<TaprootSpendInfo> {
        let builder = TaprootBuilder::new()
            .add_leaf(2, self.timelock.clone())
            .and_then(|b| b.add_leaf(2, self.unbonding.clone()))
            .and_then(|b| b.add_leaf(1, self.slashing.clone()))
            .map_err(|e| StakingError::script(format!("Failed to add leaf: {}", e)))?;
        finalize(builder, secp)
    }

    /// Taproot tree of the unbonding output
    pub fn unbonding_spend_info<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
    ) -> StakingResult<TaprootSpendInfo> {
        let builder = TaprootBuilder::new()
            .add_leaf(1, self.slashing.clone())
            .and_then(|b| b.add_leaf(1, self.unbonding_timelock.clone()))
            .map_err(|e| StakingError::script(format!("Failed to add leaf: {}", e)))?;
        finalize(builder, secp)
    }

    /// Taproot tree of a slashing transaction's change output
    pub fn slashing_change_spend_info<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
    ) -> StakingResult<TaprootSpendInfo> {
        let builder = TaprootBuilder::new()
            .add_leaf(0, self.unbonding_timelock.clone())
            .map_err(|e| StakingError::script(format!("Failed to add leaf: {}", e)))?;
        finalize(builder, secp)
    }

    pub fn staking_output_script<C: Verification>(&self, secp: &Secp256k1<C>) -> StakingResult<ScriptBuf> {
        Ok(ScriptBuf::new_p2tr_tweaked(self.staking_spend_info(secp)?.output_key()))
    }

    pub fn unbonding_output_script<C: Verification>(&self, secp: &Secp256k1<C>) -> StakingResult<ScriptBuf> {
        Ok(ScriptBuf::new_p2tr_tweaked(self.unbonding_spend_info(secp)?.output_key()))
    }

    pub fn slashing_change_output_script<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
    ) -> StakingResult<ScriptBuf> {
        Ok(ScriptBuf::new_p2tr_tweaked(
            self.slashing_change_spend_info(secp)?.output_key(),
        ))
    }
}

fn finalize<C: Verification>(
    builder: TaprootBuilder,
    secp: &Secp256k1<C>,
) -> StakingResult<TaprootSpendInfo> {
    builder
        .finalize(secp, unspendable_internal_key()?)
        .map_err(|_| StakingError::script("Failed to finalize taproot tree"))
}

/// Control block proving `leaf` is part of `spend_info`
pub fn control_block_for(spend_info: &TaprootSpendInfo, leaf: &ScriptBuf) -> StakingResult<ControlBlock> {
    spend_info
        .control_block(&(leaf.clone(), LeafVersion::TapScript))
        .ok_or_else(|| StakingError::script("Leaf not found in taproot tree"))
}
