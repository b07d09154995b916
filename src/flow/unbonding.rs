//! Early unbonding of an active delegation.

use super::{decode_tx, rebuild_delegation};
use crate::delegations::{
    Delegation, DelegationState, DelegationTracker, IntermediateDelegation, LocalStore, MempoolLookup,
};
use crate::error::{StakingError, StakingResult};
use crate::params::ParamsSet;
use crate::services::staking_api::DelegationApi;
use crate::staking::build_unbonding_psbt;
use crate::staking::signatures::finalize_unbonding_tx;
use crate::wallet::BtcWallet;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::Secp256k1;
use chrono::Utc;

/// Sign the delegation's unbonding transaction, splice in the covenant
/// signatures and broadcast it. Returns the unbonding txid.
pub async fn submit_unbonding<B, S, A, M>(
    btc: &B,
    tracker: &DelegationTracker<S, A, M>,
    params_set: &ParamsSet,
    delegation: &Delegation,
) -> StakingResult<String>
where
    B: BtcWallet,
    S: LocalStore,
    A: DelegationApi,
    M: MempoolLookup,
{
    if !btc.is_connected() {
        return Err(StakingError::WalletNotConnected {
            chain: "BTC".to_string(),
        });
    }
    if !delegation.state.can_unbond() {
        return Err(StakingError::invalid_input(format!(
            "Delegation {} cannot be unbonded in state {}",
            delegation.staking_tx_hash_hex, delegation.state
        )));
    }

    if tracker.local_state(&delegation.staking_tx_hash_hex)? == Some(DelegationState::IntermediateUnbondingSubmitted) {
        return Err(StakingError::invalid_input(format!(
            "Unbonding for delegation {} was already submitted",
            delegation.staking_tx_hash_hex
        )));
    }

    let params = params_set.resolve_for_delegation(delegation)?;
    let secp = Secp256k1::new();
    let rebuilt = rebuild_delegation(&secp, params, delegation)?;

    let psbt = build_unbonding_psbt(
        &secp,
        &rebuilt.scripts,
        params,
        &rebuilt.staking_tx,
        rebuilt.staking_output_index,
    )?;
    let signed_hex = btc.sign_psbt(&psbt.serialize_hex()).await?;
    let signed = Psbt::deserialize(&hex::decode(signed_hex)?)?;
    let tx = finalize_unbonding_tx(
        &signed,
        params,
        &rebuilt.staker_pk,
        &delegation.covenant_unbonding_signatures,
    )?;

    let txid = tx.compute_txid();
    if delegation.unbonding_tx_hex.is_some() {
        let declared = decode_tx(delegation.unbonding_tx_hex.as_deref(), "unbonding")?;
        if declared.compute_txid() != txid {
            return Err(StakingError::TxidMismatch {
                expected: declared.compute_txid().to_string(),
                actual: txid.to_string(),
            });
        }
    }

    let pushed = btc.push_tx(&serialize_hex(&tx)).await?;
    log::info!(
        "Unbonding tx {} broadcast for delegation {}",
        pushed,
        delegation.staking_tx_hash_hex
    );

    tracker.record(IntermediateDelegation::from_delegation(
        delegation,
        DelegationState::IntermediateUnbondingSubmitted,
        Utc::now(),
    ))?;
    Ok(pushed)
}
