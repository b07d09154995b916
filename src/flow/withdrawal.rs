//! Withdrawal of funds whose timelock has expired, from whichever output the
//! delegation's state says holds them.

use super::{decode_tx, rebuild_delegation};
use crate::delegations::{
    Delegation, DelegationState, DelegationTracker, IntermediateDelegation, LocalStore, MempoolLookup,
    WithdrawalPath,
};
use crate::error::{StakingError, StakingResult};
use crate::params::ParamsSet;
use crate::services::staking_api::DelegationApi;
use crate::staking::{build_withdrawal_psbt, check_fee, WithdrawalSource};
use crate::utils::address::validate_and_parse;
use crate::wallet::BtcWallet;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::Network;
use chrono::Utc;

/// Index of the change output in a slashing transaction
const SLASHING_CHANGE_INDEX: u32 = 1;

/// Build, sign and broadcast the withdrawal of `delegation` to the wallet's
/// own address at `fee_rate` sat/vB. Returns the withdrawal txid.
pub async fn submit_withdrawal<B, S, A, M>(
    btc: &B,
    tracker: &DelegationTracker<S, A, M>,
    params_set: &ParamsSet,
    delegation: &Delegation,
    network: Network,
    fee_rate: u64,
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
    let path = delegation.withdrawal_path().ok_or_else(|| {
        StakingError::invalid_input(format!(
            "Delegation {} is not withdrawable in state {}",
            delegation.staking_tx_hash_hex, delegation.state
        ))
    })?;

    if tracker.local_state(&delegation.staking_tx_hash_hex)? == Some(DelegationState::IntermediateWithdrawalSubmitted) {
        return Err(StakingError::invalid_input(format!(
            "Withdrawal for delegation {} was already submitted",
            delegation.staking_tx_hash_hex
        )));
    }

    let params = params_set.resolve_for_delegation(delegation)?;
    let secp = Secp256k1::new();
    let rebuilt = rebuild_delegation(&secp, params, delegation)?;

    let (funding_tx, output_index, source) = match path {
        WithdrawalPath::StakingTimelock => (
            rebuilt.staking_tx.clone(),
            rebuilt.staking_output_index,
            WithdrawalSource::StakingTimelock,
        ),
        WithdrawalPath::EarlyUnbonding => (
            decode_tx(delegation.unbonding_tx_hex.as_deref(), "unbonding")?,
            0,
            WithdrawalSource::UnbondingTimelock,
        ),
        WithdrawalPath::StakingSlashingChange => (
            decode_tx(delegation.slashing_tx_hex.as_deref(), "slashing")?,
            SLASHING_CHANGE_INDEX,
            WithdrawalSource::SlashingChange,
        ),
        WithdrawalPath::UnbondingSlashingChange => (
            decode_tx(delegation.unbonding_slashing_tx_hex.as_deref(), "unbonding slashing")?,
            SLASHING_CHANGE_INDEX,
            WithdrawalSource::SlashingChange,
        ),
    };

    let destination = validate_and_parse(&btc.get_address().await?, network)?.script_pubkey();
    let (psbt, fee) = build_withdrawal_psbt(
        &secp,
        &rebuilt.scripts,
        params,
        &funding_tx,
        output_index,
        source,
        delegation.timelock,
        &destination,
        fee_rate,
    )?;
    log::debug!(
        "Withdrawal of {} via {:?}, fee {} sats",
        delegation.staking_tx_hash_hex,
        path,
        fee
    );

    let signed_hex = btc.sign_psbt(&psbt.serialize_hex()).await?;
    let signed = Psbt::deserialize(&hex::decode(signed_hex)?)?;
    if signed.inputs.iter().any(|i| i.final_script_witness.is_none()) {
        return Err(StakingError::NoSignature {
            context: "withdrawal".to_string(),
        });
    }
    let tx = signed.extract_tx_unchecked_fee_rate();
    if tx.compute_txid() != psbt.unsigned_tx.compute_txid() {
        return Err(StakingError::TxidMismatch {
            expected: psbt.unsigned_tx.compute_txid().to_string(),
            actual: tx.compute_txid().to_string(),
        });
    }
    check_fee(&tx, fee_rate, fee)?;

    let pushed = btc.push_tx(&serialize_hex(&tx)).await?;
    log::info!(
        "Withdrawal tx {} broadcast for delegation {}",
        pushed,
        delegation.staking_tx_hash_hex
    );

    tracker.record(IntermediateDelegation::from_delegation(
        delegation,
        DelegationState::IntermediateWithdrawalSubmitted,
        Utc::now(),
    ))?;
    Ok(pushed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegations::MemoryStore;
    use crate::flow::tests::{indexed_delegation, MockBtcWallet, NoMempool, StateApi};
    use crate::params::tests::sample_version;
    use crate::staking::transactions::tests::fixture;
    use crate::staking::{build_slashing_psbt, build_unbonding_psbt, SlashingSource};
    use bitcoin::Sequence;

    type Tracker = DelegationTracker<MemoryStore, StateApi, NoMempool>;

    fn tracker(delegation: &Delegation) -> Tracker {
        DelegationTracker::new(
            MemoryStore::new(),
            StateApi::new(delegation.state),
            NoMempool,
            delegation.staker_pk_hex.clone(),
        )
    }

    fn params() -> ParamsSet {
        ParamsSet::new(vec![sample_version(0, 100)]).unwrap()
    }

    fn pushed_tx(btc: &MockBtcWallet) -> bitcoin::Transaction {
        bitcoin::consensus::deserialize(&hex::decode(&btc.pushed.lock().unwrap()[0]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_withdraw_expired_staking_output() {
        let delegation = indexed_delegation(DelegationState::TimelockWithdrawable);
        let tracker = tracker(&delegation);
        let btc = MockBtcWallet::new();

        submit_withdrawal(&btc, &tracker, &params(), &delegation, Network::Signet, 2)
            .await
            .unwrap();

        let tx = pushed_tx(&btc);
        assert_eq!(tx.input[0].sequence, Sequence::from_height(150));
        assert_eq!(tx.input[0].previous_output.txid.to_string(), delegation.staking_tx_hash_hex);
        // Signature, timelock leaf, control block
        assert_eq!(tx.input[0].witness.len(), 3);
        assert_eq!(tx.output[0].script_pubkey, fixture().2.address.script_pubkey());

        let records = tracker.store().load(&delegation.staker_pk_hex).unwrap();
        assert_eq!(records[0].state, DelegationState::IntermediateWithdrawalSubmitted);
    }

    #[tokio::test]
    async fn test_withdraw_after_early_unbonding() {
        let secp = Secp256k1::new();
        let (params_version, scripts, _, _) = fixture();
        let mut delegation = indexed_delegation(DelegationState::EarlyUnbondingWithdrawable);
        let staking_tx = decode_tx(delegation.staking_tx_hex.as_deref(), "staking").unwrap();
        let unbonding = build_unbonding_psbt(&secp, &scripts, &params_version, &staking_tx, 0).unwrap();
        delegation.unbonding_tx_hex = Some(serialize_hex(&unbonding.unsigned_tx));

        let tracker = tracker(&delegation);
        let btc = MockBtcWallet::new();
        submit_withdrawal(&btc, &tracker, &params(), &delegation, Network::Signet, 2)
            .await
            .unwrap();

        let tx = pushed_tx(&btc);
        assert_eq!(tx.input[0].previous_output.txid, unbonding.unsigned_tx.compute_txid());
        assert_eq!(
            tx.input[0].sequence,
            Sequence::from_height(params_version.unbonding_time_blocks)
        );
    }

    #[tokio::test]
    async fn test_withdraw_slashing_change() {
        let secp = Secp256k1::new();
        let (params_version, scripts, _, _) = fixture();
        let mut delegation = indexed_delegation(DelegationState::TimelockSlashingWithdrawable);
        let staking_tx = decode_tx(delegation.staking_tx_hex.as_deref(), "staking").unwrap();
        let slashing =
            build_slashing_psbt(&secp, &scripts, &params_version, &staking_tx, 0, SlashingSource::StakingOutput)
                .unwrap();
        delegation.slashing_tx_hex = Some(serialize_hex(&slashing.unsigned_tx));

        let tracker = tracker(&delegation);
        let btc = MockBtcWallet::new();
        submit_withdrawal(&btc, &tracker, &params(), &delegation, Network::Signet, 2)
            .await
            .unwrap();

        let tx = pushed_tx(&btc);
        assert_eq!(tx.input[0].previous_output.txid, slashing.unsigned_tx.compute_txid());
        assert_eq!(tx.input[0].previous_output.vout, SLASHING_CHANGE_INDEX);
    }

    #[tokio::test]
    async fn test_withdraw_requires_withdrawable_state() {
        let delegation = indexed_delegation(DelegationState::Active);
        let tracker = tracker(&delegation);
        let btc = MockBtcWallet::new();
        assert!(matches!(
            submit_withdrawal(&btc, &tracker, &params(), &delegation, Network::Signet, 2).await,
            Err(StakingError::InvalidInput { .. })
        ));

        let missing = indexed_delegation(DelegationState::EarlyUnbondingWithdrawable);
        assert!(matches!(
            submit_withdrawal(&btc, &tracker, &params(), &missing, Network::Signet, 2).await,
            Err(StakingError::InvalidInput { .. })
        ));
        assert_eq!(btc.push_count(), 0);
    }
}
