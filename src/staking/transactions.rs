//! # PSBT Builders
//!
//! Unsigned version-2 transactions for every stage of a delegation, wrapped
//! in PSBTs that carry enough metadata (witness UTXOs, taproot internal key,
//! merkle root and leaf scripts with control blocks) for any capable wallet
//! to sign without rebuilding scripts.

use super::fee::{check_fee_against, estimate_vsize, InputKind};
use super::scripts::{control_block_for, StakingScripts};
use super::utxo::{select_largest_first, Utxo};
use super::StakerInfo;
use crate::config::staking::DUST_THRESHOLD_SAT;
use crate::error::{StakingError, StakingResult};
use crate::params::ParameterVersion;
use bitcoin::absolute::LockTime;
use bitcoin::psbt::{Input as PsbtInput, Psbt};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{LeafVersion, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

/// Result of building a staking transaction
#[derive(Debug, Clone)]
pub struct StakingTxBuild {
    pub psbt: Psbt,
    pub fee_sat: u64,
    /// Index of the staking output (always 0)
    pub staking_output_index: u32,
}

impl StakingTxBuild {
    pub fn unsigned_tx(&self) -> &Transaction {
        &self.psbt.unsigned_tx
    }
}

/// Output a slashing transaction spends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashingSource {
    StakingOutput,
    UnbondingOutput,
}

/// Output a withdrawal transaction spends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalSource {
    /// Expired staking output via the timelock leaf
    StakingTimelock,
    /// Settled unbonding output via the unbonding-timelock leaf
    UnbondingTimelock,
    /// Slashing change output via the unbonding-timelock leaf
    SlashingChange,
}

fn unsigned_input(previous_output: OutPoint, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

/// Attach script-path metadata for spending `leaf` of `spend_info`
fn script_path_input(
    input: &mut PsbtInput,
    spend_info: &TaprootSpendInfo,
    leaf: &ScriptBuf,
    prevout: TxOut,
) -> StakingResult<()> {
    let control_block = control_block_for(spend_info, leaf)?;
    input.witness_utxo = Some(prevout);
    input.tap_internal_key = Some(spend_info.internal_key());
    input.tap_merkle_root = spend_info.merkle_root();
    input
        .tap_scripts
        .insert(control_block, (leaf.clone(), LeafVersion::TapScript));
    Ok(())
}

fn output_at(tx: &Transaction, index: u32) -> StakingResult<TxOut> {
    tx.output.get(index as usize).cloned().ok_or_else(|| {
        StakingError::invalid_input(format!(
            "Transaction {} has no output {}",
            tx.compute_txid(),
            index
        ))
    })
}

/// Build the staking transaction.
///
/// Output 0 locks exactly `amount_sat` to the staking output. UTXOs are
/// selected largest-first; change above the dust threshold goes back to the
/// staker address, anything below is left as fee. Left-over dust must keep
/// the fee inside the band [`check_fee`](super::check_fee) enforces after
/// signing; otherwise more inputs are selected so the change clears the dust
/// threshold, and the build fails when there are none.
pub fn build_staking_psbt<C: Verification>(
    secp: &Secp256k1<C>,
    scripts: &StakingScripts,
    staker: &StakerInfo,
    amount_sat: u64,
    utxos: &[Utxo],
    fee_rate: u64,
    activation_height: u32,
) -> StakingResult<StakingTxBuild> {
    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeRate { fee_rate });
    }

    let staking_script = scripts.staking_output_script(secp)?;
    let change_script = staker.address.script_pubkey();
    let input_kind = staker.input_kind()?;

    let fee_for = |inputs: usize, with_change: bool| {
        let kinds = vec![input_kind; inputs];
        let outputs: Vec<&bitcoin::Script> = if with_change {
            vec![staking_script.as_script(), change_script.as_script()]
        } else {
            vec![staking_script.as_script()]
        };
        estimate_vsize(&kinds, &outputs) * fee_rate
    };

    let (mut selected, mut total) = select_largest_first(utxos, |n| amount_sat + fee_for(n, true))?;

    // Size estimates round the overhead and every input up by under one
    // vbyte; the band is checked against the smallest size the signed tx
    // can have.
    let min_fee_without_change = |inputs: usize| fee_for(inputs, false) - (inputs as u64 + 1) * fee_rate;
    let folded = total - amount_sat - fee_for(selected.len(), true);
    if folded <= DUST_THRESHOLD_SAT
        && check_fee_against(min_fee_without_change(selected.len()), total - amount_sat).is_err()
    {
        log::debug!(
            "Dust change of {} sats would overpay the fee, selecting more inputs",
            folded
        );
        (selected, total) = select_largest_first(utxos, |n| {
            amount_sat + fee_for(n, true) + DUST_THRESHOLD_SAT + 1
        })?;
    }

    let fee_with_change = fee_for(selected.len(), true);
    let change = total - amount_sat - fee_with_change;

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: staking_script,
    }];
    let fee_sat = if change > DUST_THRESHOLD_SAT {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: change_script,
        });
        fee_with_change
    } else {
        total - amount_sat
    };

    let lock_time = LockTime::from_height(activation_height.saturating_sub(1))
        .map_err(|e| StakingError::invalid_input(format!("Invalid activation height: {}", e)))?;

    let inputs = selected
        .iter()
        .map(|u| Ok(unsigned_input(u.outpoint()?, Sequence::ENABLE_RBF_NO_LOCKTIME)))
        .collect::<StakingResult<Vec<_>>>()?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: inputs,
        output: outputs,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(selected.iter()) {
        input.witness_utxo = Some(utxo.tx_out()?);
        if staker.is_taproot() {
            input.tap_internal_key = Some(staker.public_key);
        }
    }

    log::debug!(
        "Built staking tx {}: {} inputs, amount {} sats, fee {} sats",
        psbt.unsigned_tx.compute_txid(),
        selected.len(),
        amount_sat,
        fee_sat
    );

    Ok(StakingTxBuild {
        psbt,
        fee_sat,
        staking_output_index: 0,
    })
}

/// Build the unbonding transaction spending the staking output.
pub fn build_unbonding_psbt<C: Verification>(
    secp: &Secp256k1<C>,
    scripts: &StakingScripts,
    params: &ParameterVersion,
    staking_tx: &Transaction,
    staking_output_index: u32,
) -> StakingResult<Psbt> {
    let staking_output = output_at(staking_tx, staking_output_index)?;
    let staking_value = staking_output.value.to_sat();
    let unbonding_value = staking_value
        .checked_sub(params.unbonding_fee_sat)
        .filter(|v| *v >= DUST_THRESHOLD_SAT)
        .ok_or_else(|| {
            StakingError::invalid_staking(format!(
                "Staking value {} sats cannot cover the unbonding fee of {} sats",
                staking_value, params.unbonding_fee_sat
            ))
        })?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(staking_tx.compute_txid(), staking_output_index),
            Sequence::MAX,
        )],
        output: vec![TxOut {
            value: Amount::from_sat(unbonding_value),
            script_pubkey: scripts.unbonding_output_script(secp)?,
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    let spend_info = scripts.staking_spend_info(secp)?;
    script_path_input(&mut psbt.inputs[0], &spend_info, &scripts.unbonding, staking_output)?;

    log::debug!(
        "Built unbonding tx {} ({} sats)",
        psbt.unsigned_tx.compute_txid(),
        unbonding_value
    );
    Ok(psbt)
}

/// Build a slashing transaction for the staking or the unbonding output.
///
/// Output 0 pays `floor(value * slashing_rate)` to the slashing script;
/// output 1 returns the rest, less the minimum slashing fee, to the slashing
/// change output.
pub fn build_slashing_psbt<C: Verification>(
    secp: &Secp256k1<C>,
    scripts: &StakingScripts,
    params: &ParameterVersion,
    funding_tx: &Transaction,
    output_index: u32,
    source: SlashingSource,
) -> StakingResult<Psbt> {
    let funding_output = output_at(funding_tx, output_index)?;
    let value = funding_output.value.to_sat();
    let slashed = params.slashing_rate.apply(value);
    let change = value
        .checked_sub(slashed)
        .and_then(|v| v.checked_sub(params.min_slashing_tx_fee_sat))
        .ok_or_else(|| {
            StakingError::invalid_staking(format!(
                "Value {} sats too small for slashing fee of {} sats",
                value, params.min_slashing_tx_fee_sat
            ))
        })?;

    if slashed < DUST_THRESHOLD_SAT || change < DUST_THRESHOLD_SAT {
        return Err(StakingError::invalid_staking(format!(
            "Slashing outputs would be dust (slashed {} sats, change {} sats)",
            slashed, change
        )));
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(funding_tx.compute_txid(), output_index),
            Sequence::MAX,
        )],
        output: vec![
            TxOut {
                value: Amount::from_sat(slashed),
                script_pubkey: params.slashing_pk_script.clone(),
            },
            TxOut {
                value: Amount::from_sat(change),
                script_pubkey: scripts.slashing_change_output_script(secp)?,
            },
        ],
    };

    let spend_info = match source {
        SlashingSource::StakingOutput => scripts.staking_spend_info(secp)?,
        SlashingSource::UnbondingOutput => scripts.unbonding_spend_info(secp)?,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    script_path_input(&mut psbt.inputs[0], &spend_info, &scripts.slashing, funding_output)?;
    Ok(psbt)
}

/// Build a withdrawal back to `destination`, net of `vsize * fee_rate`.
///
/// Returns the PSBT and the fee it pays.
#[allow(clippy::too_many_arguments)]
pub fn build_withdrawal_psbt<C: Verification>(
    secp: &Secp256k1<C>,
    scripts: &StakingScripts,
    params: &ParameterVersion,
    funding_tx: &Transaction,
    output_index: u32,
    source: WithdrawalSource,
    staking_timelock: u16,
    destination: &ScriptBuf,
    fee_rate: u64,
) -> StakingResult<(Psbt, u64)> {
    if fee_rate == 0 {
        return Err(StakingError::InvalidFeeRate { fee_rate });
    }

    let (spend_info, leaf, blocks) = match source {
        WithdrawalSource::StakingTimelock => {
            (scripts.staking_spend_info(secp)?, &scripts.timelock, staking_timelock)
        }
        WithdrawalSource::UnbondingTimelock => (
            scripts.unbonding_spend_info(secp)?,
            &scripts.unbonding_timelock,
            params.unbonding_time_blocks,
        ),
        WithdrawalSource::SlashingChange => (
            scripts.slashing_change_spend_info(secp)?,
            &scripts.unbonding_timelock,
            params.unbonding_time_blocks,
        ),
    };

    let funding_output = output_at(funding_tx, output_index)?;
    if funding_output.script_pubkey != ScriptBuf::new_p2tr_tweaked(spend_info.output_key()) {
        return Err(StakingError::script(
            "Rebuilt scripts do not match the output being withdrawn",
        ));
    }

    let control_block = control_block_for(&spend_info, leaf)?;
    let input_kind = InputKind::Tapscript {
        leaf_len: leaf.len(),
        control_block_len: control_block.size(),
        signatures: 1,
    };
    let fee_sat = estimate_vsize(&[input_kind], &[destination.as_script()]) * fee_rate;

    let value = funding_output.value.to_sat();
    let withdrawn = value
        .checked_sub(fee_sat)
        .filter(|v| *v >= DUST_THRESHOLD_SAT)
        .ok_or(StakingError::InsufficientBalance {
            required: fee_sat + DUST_THRESHOLD_SAT,
            available: value,
        })?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![unsigned_input(
            OutPoint::new(funding_tx.compute_txid(), output_index),
            Sequence::from_height(blocks),
        )],
        output: vec![TxOut {
            value: Amount::from_sat(withdrawn),
            script_pubkey: destination.clone(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    script_path_input(&mut psbt.inputs[0], &spend_info, leaf, funding_output)?;

    log::debug!(
        "Built withdrawal tx {} via {:?}: {} sats, fee {} sats",
        psbt.unsigned_tx.compute_txid(),
        source,
        withdrawn,
        fee_sat
    );
    Ok((psbt, fee_sat))
}

/// Fee paid by a PSBT, from its witness UTXOs
pub fn psbt_fee(psbt: &Psbt) -> StakingResult<u64> {
    let mut input_total = 0u64;
    for (i, input) in psbt.inputs.iter().enumerate() {
        let utxo = input
            .witness_utxo
            .as_ref()
            .ok_or_else(|| StakingError::invalid_input(format!("Input {} has no witness UTXO", i)))?;
        input_total += utxo.value.to_sat();
    }
    let output_total: u64 = psbt.unsigned_tx.output.iter().map(|o| o.value.to_sat()).sum();
    input_total
        .checked_sub(output_total)
        .ok_or_else(|| StakingError::consistency("Outputs exceed inputs"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::params::tests::{sample_version, xonly};
    use crate::staking::utxo::tests::utxo;
    use bitcoin::secp256k1::{Keypair, SecretKey};
    use bitcoin::{Address, Network};

    pub(crate) const STAKER_SEED: u8 = 21;

    pub(crate) fn staker() -> StakerInfo {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[STAKER_SEED; 32]).unwrap();
        let (public_key, _) = Keypair::from_secret_key(&secp, &sk).x_only_public_key();
        StakerInfo {
            address: Address::p2tr(&secp, public_key, None, Network::Signet),
            public_key,
        }
    }

    pub(crate) fn fixture() -> (ParameterVersion, StakingScripts, StakerInfo, Vec<Utxo>) {
        let params = sample_version(0, 100);
        let staker = staker();
        let scripts = StakingScripts::new(&params, &staker.public_key, &[xonly(6)], 150).unwrap();
        let spk = staker.address.script_pubkey();
        let utxos = vec![utxo(1, 60_000, &spk), utxo(2, 120_000, &spk), utxo(3, 30_000, &spk)];
        (params, scripts, staker, utxos)
    }

    #[test]
    fn test_staking_psbt_outputs_and_fee() {
        let secp = Secp256k1::new();
        let (params, scripts, staker, utxos) = fixture();

        let build = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let tx = build.unsigned_tx();
        let staking_script = scripts.staking_output_script(&secp).unwrap();

        let staking_outputs: Vec<_> = tx
            .output
            .iter()
            .filter(|o| o.script_pubkey == staking_script)
            .collect();
        assert_eq!(staking_outputs.len(), 1);
        assert_eq!(staking_outputs[0].value.to_sat(), 100_000);
        assert_eq!(tx.output[0].script_pubkey, staking_script);

        assert!(build.fee_sat > 0);
        assert_eq!(psbt_fee(&build.psbt).unwrap(), build.fee_sat);
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.lock_time, LockTime::from_height(199).unwrap());
        assert_eq!(tx.output[1].script_pubkey, staker.address.script_pubkey());
        assert!(build.psbt.inputs.iter().all(|i| i.witness_utxo.is_some()));
        assert_eq!(build.psbt.inputs[0].tap_internal_key, Some(staker.public_key));
        assert!(params.min_staking_value_sat <= 100_000);
    }

    #[test]
    fn test_staking_psbt_is_deterministic() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, utxos) = fixture();
        let a = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let b = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        assert_eq!(a.unsigned_tx().compute_txid(), b.unsigned_tx().compute_txid());
    }

    #[test]
    fn test_staking_psbt_folds_dust_change_into_fee() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, _) = fixture();
        let spk = staker.address.script_pubkey();
        // one input + two outputs at 1 sat/vB: 11 + 58 + 43 + 43 = 155
        let utxos = vec![utxo(9, 100_000 + 155 + 50, &spk)];

        let build = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 1, 200).unwrap();
        assert_eq!(build.unsigned_tx().output.len(), 1);
        assert_eq!(build.fee_sat, 205);
    }

    #[test]
    fn test_staking_psbt_dust_change_outside_fee_band() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, _) = fixture();
        let spk = staker.address.script_pubkey();
        // 300 sats of dust on top of a 155 sat fee is more than twice the
        // size of a one-output tx at 1 sat/vB
        let dusty = utxo(9, 100_000 + 155 + 300, &spk);

        let err = build_staking_psbt(&secp, &scripts, &staker, 100_000, &[dusty.clone()], 1, 200).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientBalance { .. }));

        // With a second UTXO the change clears the dust threshold instead
        let utxos = vec![dusty, utxo(4, 5_000, &spk)];
        let build = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 1, 200).unwrap();
        let tx = build.unsigned_tx();
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output.len(), 2);
        assert!(tx.output[1].value.to_sat() > DUST_THRESHOLD_SAT);
        assert!(crate::staking::fee::check_fee_against(tx.vsize() as u64, build.fee_sat).is_ok());
    }

    #[test]
    fn test_staking_psbt_insufficient_balance() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, utxos) = fixture();
        let err = build_staking_psbt(&secp, &scripts, &staker, 210_000, &utxos, 2, 200).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_unbonding_and_slashing_psbts() {
        let secp = Secp256k1::new();
        let (params, scripts, staker, utxos) = fixture();
        let staking = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let staking_tx = staking.unsigned_tx();

        let unbonding = build_unbonding_psbt(&secp, &scripts, &params, staking_tx, 0).unwrap();
        let unbonding_tx = &unbonding.unsigned_tx;
        assert_eq!(unbonding_tx.output[0].value.to_sat(), 100_000 - params.unbonding_fee_sat);
        assert_eq!(unbonding_tx.input[0].sequence, Sequence::MAX);
        assert_eq!(unbonding_tx.input[0].previous_output.txid, staking_tx.compute_txid());
        let input = &unbonding.inputs[0];
        assert_eq!(input.tap_scripts.len(), 1);
        assert_eq!(input.tap_scripts.values().next().unwrap().0, scripts.unbonding);
        assert!(input.tap_merkle_root.is_some());

        let slashing = build_slashing_psbt(
            &secp,
            &scripts,
            &params,
            staking_tx,
            0,
            SlashingSource::StakingOutput,
        )
        .unwrap();
        let outputs = &slashing.unsigned_tx.output;
        assert_eq!(outputs[0].value.to_sat(), 10_000);
        assert_eq!(outputs[0].script_pubkey, params.slashing_pk_script);
        assert_eq!(outputs[1].value.to_sat(), 100_000 - 10_000 - params.min_slashing_tx_fee_sat);
        assert_eq!(slashing.inputs[0].tap_scripts.values().next().unwrap().0, scripts.slashing);

        let unbonding_slashing = build_slashing_psbt(
            &secp,
            &scripts,
            &params,
            unbonding_tx,
            0,
            SlashingSource::UnbondingOutput,
        )
        .unwrap();
        assert_eq!(unbonding_slashing.unsigned_tx.output[0].value.to_sat(), 9_900);
    }

    #[test]
    fn test_withdrawal_psbt_paths() {
        let secp = Secp256k1::new();
        let (params, scripts, staker, utxos) = fixture();
        let staking = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let destination = staker.address.script_pubkey();

        let (psbt, fee) = build_withdrawal_psbt(
            &secp,
            &scripts,
            &params,
            staking.unsigned_tx(),
            0,
            WithdrawalSource::StakingTimelock,
            150,
            &destination,
            3,
        )
        .unwrap();
        assert_eq!(psbt.unsigned_tx.input[0].sequence, Sequence::from_height(150));
        assert_eq!(psbt.unsigned_tx.output[0].value.to_sat(), 100_000 - fee);
        assert_eq!(psbt.inputs[0].tap_scripts.values().next().unwrap().0, scripts.timelock);

        let unbonding = build_unbonding_psbt(&secp, &scripts, &params, staking.unsigned_tx(), 0).unwrap();
        let (psbt, _) = build_withdrawal_psbt(
            &secp,
            &scripts,
            &params,
            &unbonding.unsigned_tx,
            0,
            WithdrawalSource::UnbondingTimelock,
            150,
            &destination,
            3,
        )
        .unwrap();
        assert_eq!(
            psbt.unsigned_tx.input[0].sequence,
            Sequence::from_height(params.unbonding_time_blocks)
        );

        // Wrong source for the output is caught before signing
        let mismatch = build_withdrawal_psbt(
            &secp,
            &scripts,
            &params,
            staking.unsigned_tx(),
            0,
            WithdrawalSource::UnbondingTimelock,
            150,
            &destination,
            3,
        );
        assert!(matches!(mismatch, Err(StakingError::Script { .. })));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            // Any successful build has exactly one staking output of `amount` and pays a fee.
            #[test]
            fn staking_output_is_unique_and_fee_positive(
                amount in 50_000u64..1_000_000,
                values in proptest::collection::vec(1_000u64..2_000_000, 1..5),
                fee_rate in 1u64..50,
            ) {
                let secp = Secp256k1::new();
                let (_, scripts, staker, _) = fixture();
                let spk = staker.address.script_pubkey();
                let utxos: Vec<Utxo> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| utxo(i as u8 + 1, *v, &spk))
                    .collect();

                match build_staking_psbt(&secp, &scripts, &staker, amount, &utxos, fee_rate, 200) {
                    Ok(build) => {
                        let staking_script = scripts.staking_output_script(&secp).unwrap();
                        let staking_outputs: Vec<_> = build
                            .unsigned_tx()
                            .output
                            .iter()
                            .filter(|o| o.script_pubkey == staking_script)
                            .collect();
                        prop_assert_eq!(staking_outputs.len(), 1);
                        prop_assert_eq!(staking_outputs[0].value.to_sat(), amount);
                        prop_assert!(build.fee_sat > 0);
                        prop_assert_eq!(psbt_fee(&build.psbt).unwrap(), build.fee_sat);
                    }
                    Err(err) => prop_assert!(
                        matches!(err, StakingError::InsufficientBalance { .. }),
                        "unexpected error: {:?}",
                        err
                    ),
                }
            }
        }
    }
}
