//! Signature extraction from wallet-signed PSBTs and assembly of the
//! covenant-authorised unbonding witness.

use super::parse_x_only;
use super::scripts::prepare_multisig_keys;
use crate::delegations::CovenantSignature;
use crate::error::{StakingError, StakingResult};
use crate::params::ParameterVersion;
use bitcoin::psbt::Psbt;
use bitcoin::{Transaction, Witness, XOnlyPublicKey};

/// The staker's Schnorr signature on the first input of a signed PSBT.
///
/// Looks at `tap_script_sigs` for the staker key first, then falls back to
/// the first element of the final witness for wallets that finalize. A
/// key-path signature is never accepted: every output signed here has the
/// unspendable NUMS internal key.
pub fn extract_schnorr_signature(psbt: &Psbt, staker_pk: &XOnlyPublicKey) -> StakingResult<Vec<u8>> {
    let input = psbt.inputs.first().ok_or_else(|| StakingError::NoSignature {
        context: "PSBT has no inputs".to_string(),
    })?;

    if let Some(sig) = input
        .tap_script_sigs
        .iter()
        .find(|((pk, _), _)| pk == staker_pk)
        .map(|(_, sig)| sig)
    {
        return Ok(sig.signature.serialize().to_vec());
    }

    if let Some(first) = input.final_script_witness.as_ref().and_then(|w| w.nth(0)) {
        if first.len() == 64 || first.len() == 65 {
            return Ok(first[..64].to_vec());
        }
    }

    Err(StakingError::NoSignature {
        context: format!("no staker signature in PSBT {}", psbt.unsigned_tx.compute_txid()),
    })
}

/// Covenant signatures in sorted-key order; `None` where a member did not sign.
///
/// The unbonding leaf ends in `quorum OP_NUMEQUAL`, so exactly
/// `covenant_quorum` signatures are kept (the first ones in sorted-key
/// order) and any extra ones become `None`. Fails unless at least
/// `covenant_quorum` signatures are present.
pub fn order_covenant_signatures(
    params: &ParameterVersion,
    signatures: &[CovenantSignature],
) -> StakingResult<Vec<Option<Vec<u8>>>> {
    let sorted = prepare_multisig_keys(&params.covenant_pks)?;

    let mut provided = Vec::with_capacity(signatures.len());
    for sig in signatures {
        let pk = parse_x_only(&sig.covenant_pk_hex)?;
        let bytes = hex::decode(&sig.signature_hex)?;
        if bytes.len() != 64 {
            return Err(StakingError::invalid_input(format!(
                "Covenant signature from {} must be 64 bytes",
                sig.covenant_pk_hex
            )));
        }
        provided.push((pk, bytes));
    }

    let quorum = params.covenant_quorum as usize;
    let mut kept = 0;
    let ordered: Vec<Option<Vec<u8>>> = sorted
        .iter()
        .map(|key| {
            let sig = provided
                .iter()
                .find(|(pk, _)| pk == key)
                .map(|(_, bytes)| bytes.clone())
                .filter(|_| kept < quorum);
            if sig.is_some() {
                kept += 1;
            }
            sig
        })
        .collect();

    if kept < quorum {
        return Err(StakingError::consistency(format!(
            "Only {} covenant signatures available, quorum is {}",
            kept, params.covenant_quorum
        )));
    }

    Ok(ordered)
}

/// Final unbonding transaction with the staker and covenant signatures.
///
/// Witness stack, bottom to top:
/// `[cov_sig_n .. cov_sig_1, staker_sig, unbonding_leaf, control_block]`
/// where covenant signatures follow sorted-key order and missing ones are
/// empty pushes.
pub fn finalize_unbonding_tx(
    signed_psbt: &Psbt,
    params: &ParameterVersion,
    staker_pk: &XOnlyPublicKey,
    covenant_signatures: &[CovenantSignature],
) -> StakingResult<Transaction> {
    let staker_sig = extract_schnorr_signature(signed_psbt, staker_pk)?;
    let ordered = order_covenant_signatures(params, covenant_signatures)?;

    let input = signed_psbt
        .inputs
        .first()
        .ok_or_else(|| StakingError::invalid_input("Unbonding PSBT has no inputs"))?;
    let (control_block, (leaf, _)) = input
        .tap_scripts
        .iter()
        .next()
        .ok_or_else(|| StakingError::invalid_input("Unbonding PSBT has no leaf script"))?;

    let mut witness = Witness::new();
    for sig in ordered.iter().rev() {
        match sig {
            Some(bytes) => witness.push(bytes),
            None => witness.push([0u8; 0]),
        }
    }
    witness.push(&staker_sig);
    witness.push(leaf.as_bytes());
    witness.push(control_block.serialize());

    let mut tx = signed_psbt.unsigned_tx.clone();
    tx.input[0].witness = witness;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::{sample_version, xonly};
    use crate::staking::transactions::{build_staking_psbt, build_unbonding_psbt, tests::fixture};
    use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey};
    use bitcoin::taproot::{Signature as TapSignature, TapLeafHash};
    use bitcoin::sighash::TapSighashType;

    fn signature_for(seed: u8) -> CovenantSignature {
        CovenantSignature {
            covenant_pk_hex: hex::encode(xonly(seed).serialize()),
            signature_hex: hex::encode([seed; 64]),
        }
    }

    fn dummy_tap_sig(secp: &Secp256k1<bitcoin::secp256k1::All>, seed: u8) -> TapSignature {
        let keypair = Keypair::from_secret_key(secp, &SecretKey::from_slice(&[seed; 32]).unwrap());
        let msg = Message::from_digest([7u8; 32]);
        TapSignature {
            signature: secp.sign_schnorr_no_aux_rand(&msg, &keypair),
            sighash_type: TapSighashType::Default,
        }
    }

    #[test]
    fn test_extract_prefers_tap_script_sigs() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, utxos) = fixture();
        let staking = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let mut psbt = staking.psbt;

        assert!(matches!(
            extract_schnorr_signature(&psbt, &staker.public_key),
            Err(StakingError::NoSignature { .. })
        ));

        let sig = dummy_tap_sig(&secp, 21);
        let leaf_hash = TapLeafHash::from_script(&scripts.slashing, bitcoin::taproot::LeafVersion::TapScript);
        psbt.inputs[0].tap_script_sigs.insert((staker.public_key, leaf_hash), sig);
        assert_eq!(
            extract_schnorr_signature(&psbt, &staker.public_key).unwrap(),
            sig.signature.serialize().to_vec()
        );
    }

    #[test]
    fn test_extract_falls_back_to_final_witness() {
        let secp = Secp256k1::new();
        let (_, scripts, staker, utxos) = fixture();
        let mut psbt = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200)
            .unwrap()
            .psbt;

        let mut witness = Witness::new();
        witness.push([5u8; 64]);
        witness.push([1u8; 10]);
        psbt.inputs[0].final_script_witness = Some(witness);

        assert_eq!(extract_schnorr_signature(&psbt, &staker.public_key).unwrap(), vec![5u8; 64]);
    }

    #[test]
    fn test_covenant_order_and_quorum() {
        let params = sample_version(0, 100);
        let sigs = vec![signature_for(13), signature_for(11)];
        let ordered = order_covenant_signatures(&params, &sigs).unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered.iter().filter(|s| s.is_some()).count(), 2);

        let sorted = prepare_multisig_keys(&params.covenant_pks).unwrap();
        for (key, sig) in sorted.iter().zip(ordered.iter()) {
            if *key == xonly(12) {
                assert!(sig.is_none());
            } else {
                assert!(sig.is_some());
            }
        }

        let err = order_covenant_signatures(&params, &sigs[..1]).unwrap_err();
        assert!(err.to_string().contains("quorum"));
    }

    #[test]
    fn test_unbonding_witness_layout() {
        let secp = Secp256k1::new();
        let (params, scripts, staker, utxos) = fixture();
        let staking = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let mut psbt = build_unbonding_psbt(&secp, &scripts, &params, staking.unsigned_tx(), 0).unwrap();

        let leaf_hash = TapLeafHash::from_script(&scripts.unbonding, bitcoin::taproot::LeafVersion::TapScript);
        let staker_sig = dummy_tap_sig(&secp, 21);
        psbt.inputs[0]
            .tap_script_sigs
            .insert((staker.public_key, leaf_hash), staker_sig);

        let sigs = vec![signature_for(11), signature_for(12), signature_for(13)];
        let tx = finalize_unbonding_tx(&psbt, &params, &staker.public_key, &sigs).unwrap();
        let witness: Vec<Vec<u8>> = tx.input[0].witness.iter().map(|w| w.to_vec()).collect();

        assert_eq!(witness.len(), 3 + 3);
        assert_eq!(witness[3], staker_sig.signature.serialize().to_vec());
        assert_eq!(witness[4], scripts.unbonding.to_bytes());

        let sorted = prepare_multisig_keys(&params.covenant_pks).unwrap();
        let seed_of = |key: &XOnlyPublicKey| [11u8, 12, 13].into_iter().find(|s| xonly(*s) == *key).unwrap();
        // Covenant slots are pushed in reverse sorted order: witness[2] is sorted[0]
        assert_eq!(witness[2], vec![seed_of(&sorted[0]); 64]);
        assert_eq!(witness[1], vec![seed_of(&sorted[1]); 64]);
        // Only the quorum is pushed; the third signature would push the count past 2
        assert!(witness[0].is_empty());
        assert_eq!(witness[..3].iter().filter(|w| !w.is_empty()).count(), 2);
        assert_eq!(tx.compute_txid(), psbt.unsigned_tx.compute_txid());
    }

    #[test]
    fn test_extra_covenant_signatures_are_dropped() {
        let params = sample_version(0, 100);
        let sigs = vec![signature_for(11), signature_for(12), signature_for(13)];
        let ordered = order_covenant_signatures(&params, &sigs).unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered.iter().filter(|s| s.is_some()).count(), params.covenant_quorum as usize);
        assert!(ordered[0].is_some());
        assert!(ordered[1].is_some());
        assert!(ordered[2].is_none());
    }

    #[test]
    fn test_key_path_signature_is_not_a_slashing_signature() {
        let secp = Secp256k1::new();
        let (params, scripts, staker, utxos) = fixture();
        let staking = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let mut psbt = build_unbonding_psbt(&secp, &scripts, &params, staking.unsigned_tx(), 0).unwrap();
        psbt.inputs[0].tap_key_sig = Some(dummy_tap_sig(&secp, 21));

        assert!(matches!(
            extract_schnorr_signature(&psbt, &staker.public_key),
            Err(StakingError::NoSignature { .. })
        ));
    }
}
