//! The staking flow: slashing signatures, proof of possession, the signed
//! delegation message on the BBN chain, verification and finally the
//! staking transaction itself.

use super::{ensure_connected, NoopObserver, SigningStep, StepFailure, StepObserver};
use crate::config::staking::VERIFICATION_POLL_INTERVAL;
use crate::delegations::{
    Delegation, DelegationSchema, DelegationState, DelegationTracker, IntermediateDelegation, LocalStore,
    MempoolLookup,
};
use crate::error::{StakingError, StakingResult};
use crate::params::{ParameterVersion, ParamsSet};
use crate::services::babylon::{
    build_create_delegation_msg, proof_of_possession_message, to_any, DelegationArtifacts,
    InclusionProof, MSG_CREATE_BTC_DELEGATION_TYPE_URL,
};
use crate::services::staking_api::DelegationApi;
use crate::staking::signatures::extract_schnorr_signature;
use crate::staking::{
    build_slashing_psbt, build_staking_psbt, build_unbonding_psbt, check_fee, validate_staking_input,
    SigningContext, SlashingSource, StakingScripts,
};
use crate::utils::poll;
use crate::wallet::{BabylonWallet, BtcWallet, SignatureScheme};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Transaction;
use chrono::Utc;
use std::time::Duration;

/// Parameters a phase-1 delegation is registered under.
///
/// The delegation must come from the V1 listing and still be active. The
/// registration is a new BBN message, so the version active at the next
/// block applies, not the one the stake was created under.
pub fn phase1_transition_params<'p>(
    params_set: &'p ParamsSet,
    delegation: &Delegation,
    tip_height: u32,
) -> StakingResult<&'p ParameterVersion> {
    if delegation.schema != DelegationSchema::V1 || delegation.state != DelegationState::Active {
        return Err(StakingError::invalid_input(format!(
            "Delegation {} is not an active phase-1 stake ({:?}, {})",
            delegation.staking_tx_hash_hex, delegation.schema, delegation.state
        )));
    }
    params_set.resolve_by_height(tip_height + 1).ok_or_else(|| {
        StakingError::consistency(format!("No staking parameters active at height {}", tip_height + 1))
    })
}

/// Products of the completed steps
#[derive(Debug, Clone, Default)]
struct FlowArtifacts {
    unbonding_tx: Option<Transaction>,
    slashing_tx: Option<Transaction>,
    slashing_sig: Option<Vec<u8>>,
    unbonding_slashing_tx: Option<Transaction>,
    unbonding_slashing_sig: Option<Vec<u8>>,
    pop_sig: Option<Vec<u8>>,
    bbn_tx: Option<Vec<u8>>,
    bbn_tx_hash: Option<String>,
    btc_txid: Option<String>,
}

fn require<'a, T>(value: &'a Option<T>, what: &str) -> StakingResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| StakingError::operation("staking_flow", format!("{} is not available yet", what)))
}

/// One delegation's signing flow across both chains
pub struct StakingFlow<'a, B, N, S, A, M, O = NoopObserver> {
    btc: &'a B,
    bbn: &'a N,
    tracker: &'a DelegationTracker<S, A, M>,
    observer: O,
    secp: Secp256k1<All>,
    context: SigningContext,
    amount_sat: u64,
    timelock: u16,
    scripts: StakingScripts,
    staking_tx: Transaction,
    staking_output_index: u32,
    /// Set for phase-1 delegations whose staking tx is already confirmed
    inclusion_proof: Option<InclusionProof>,
    step: SigningStep,
    artifacts: FlowArtifacts,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl<'a, B, N, S, A, M, O> StakingFlow<'a, B, N, S, A, M, O>
where
    B: BtcWallet,
    N: BabylonWallet,
    S: LocalStore,
    A: DelegationApi,
    M: MempoolLookup,
    O: StepObserver,
{
    /// Validate inputs and build the staking transaction. No wallet is asked
    /// for anything yet.
    pub fn new(
        btc: &'a B,
        bbn: &'a N,
        tracker: &'a DelegationTracker<S, A, M>,
        context: SigningContext,
        amount_sat: u64,
        requested_timelock: u16,
        observer: O,
    ) -> StakingResult<Self> {
        ensure_connected(btc, bbn)?;
        let timelock = validate_staking_input(
            &context.params,
            amount_sat,
            requested_timelock,
            context.fee_rate,
            context.finality_provider_pks.len(),
            &context.utxos,
        )?;

        let secp = Secp256k1::new();
        let scripts = context.scripts(timelock)?;
        let build = build_staking_psbt(
            &secp,
            &scripts,
            &context.staker,
            amount_sat,
            &context.utxos,
            context.fee_rate,
            context.params.btc_activation_height,
        )?;
        let staking_tx = build.psbt.unsigned_tx;
        log::info!(
            "Prepared staking tx {} for {} sats, {} blocks, fee {} sats",
            staking_tx.compute_txid(),
            amount_sat,
            timelock,
            build.fee_sat
        );

        Ok(Self {
            btc,
            bbn,
            tracker,
            observer,
            secp,
            context,
            amount_sat,
            timelock,
            scripts,
            staking_tx,
            staking_output_index: build.staking_output_index,
            inclusion_proof: None,
            step: SigningStep::Idle,
            artifacts: FlowArtifacts::default(),
            poll_interval: VERIFICATION_POLL_INTERVAL,
            max_wait: None,
        })
    }

    /// Register an already-confirmed phase-1 staking transaction on the BBN
    /// chain. The flow skips BTC submission.
    #[allow(clippy::too_many_arguments)]
    pub fn expand_phase1_delegation(
        btc: &'a B,
        bbn: &'a N,
        tracker: &'a DelegationTracker<S, A, M>,
        context: SigningContext,
        staking_tx: Transaction,
        timelock: u16,
        inclusion_proof: InclusionProof,
        observer: O,
    ) -> StakingResult<Self> {
        ensure_connected(btc, bbn)?;
        let max_fps = context.params.max_finality_providers.max(1) as usize;
        if context.finality_provider_pks.is_empty() || context.finality_provider_pks.len() > max_fps {
            return Err(StakingError::invalid_staking(format!(
                "Expected between 1 and {} finality providers, got {}",
                max_fps,
                context.finality_provider_pks.len()
            )));
        }

        let secp = Secp256k1::new();
        let scripts = context.scripts(timelock)?;
        let staking_script = scripts.staking_output_script(&secp)?;
        let (index, output) = staking_tx
            .output
            .iter()
            .enumerate()
            .find(|(_, o)| o.script_pubkey == staking_script)
            .ok_or_else(|| {
                StakingError::script(format!(
                    "Transaction {} has no output matching the staking script",
                    staking_tx.compute_txid()
                ))
            })?;
        let amount_sat = output.value.to_sat();
        log::info!(
            "Expanding phase-1 delegation {} ({} sats)",
            staking_tx.compute_txid(),
            amount_sat
        );

        Ok(Self {
            btc,
            bbn,
            tracker,
            observer,
            secp,
            context,
            amount_sat,
            timelock,
            scripts,
            staking_output_index: index as u32,
            staking_tx,
            inclusion_proof: Some(inclusion_proof),
            step: SigningStep::Idle,
            artifacts: FlowArtifacts::default(),
            poll_interval: VERIFICATION_POLL_INTERVAL,
            max_wait: None,
        })
    }

    /// Override the verification poll cadence
    pub fn with_polling(mut self, interval: Duration, max_wait: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self.max_wait = max_wait;
        self
    }

    pub fn step(&self) -> SigningStep {
        self.step
    }

    /// Staking transaction id computed when the flow was created
    pub fn staking_txid(&self) -> String {
        self.staking_tx.compute_txid().to_string()
    }

    pub fn bbn_tx_hash(&self) -> Option<&str> {
        self.artifacts.bbn_tx_hash.as_deref()
    }

    /// Execute the step after the current one
    pub async fn advance(&mut self) -> Result<SigningStep, StepFailure> {
        match self.step.next() {
            Some(next) => self.run_step(next).await,
            None => Ok(SigningStep::Complete),
        }
    }

    /// Re-run `step` after a failure
    pub async fn retry(&mut self, step: SigningStep) -> Result<SigningStep, StepFailure> {
        self.run_step(step).await
    }

    /// Advance until complete; returns the staking transaction id
    pub async fn run(&mut self) -> Result<String, StepFailure> {
        while self.step != SigningStep::Complete {
            self.advance().await?;
        }
        Ok(self.staking_txid())
    }

    async fn run_step(&mut self, step: SigningStep) -> Result<SigningStep, StepFailure> {
        self.observer.on_step(step);
        log::info!("Staking flow {}: {}", self.staking_txid(), step);

        let result = match step {
            SigningStep::Idle | SigningStep::Verified | SigningStep::Complete => Ok(()),
            SigningStep::StakingSlashing => self.sign_staking_slashing().await,
            SigningStep::UnbondingSlashing => self.sign_unbonding_slashing().await,
            SigningStep::ProofOfPossession => self.sign_proof_of_possession().await,
            SigningStep::SignBbn => self.sign_bbn().await,
            SigningStep::SendBbn => self.send_bbn().await,
            SigningStep::Verifying => self.wait_for_verification().await,
            SigningStep::SubmittingBtc => match self.inclusion_proof {
                Some(_) => {
                    log::info!("Staking tx already confirmed, nothing to submit");
                    Ok(())
                }
                None => self.submit_staking_tx().await,
            },
        };

        match result {
            Ok(()) => {
                self.step = step;
                Ok(step)
            }
            Err(error) => {
                log::error!("Staking flow step {} failed: {}", step, error);
                self.step = SigningStep::Idle;
                self.observer.on_step(SigningStep::Idle);
                Err(StepFailure { step, error })
            }
        }
    }

    async fn sign_slashing(&self, psbt: &Psbt) -> StakingResult<Vec<u8>> {
        let signed_hex = self.btc.sign_psbt(&psbt.serialize_hex()).await?;
        let signed = Psbt::deserialize(&hex::decode(signed_hex)?)?;
        extract_schnorr_signature(&signed, &self.context.staker.public_key)
    }

    async fn sign_staking_slashing(&mut self) -> StakingResult<()> {
        let params = &self.context.params;
        let unbonding = build_unbonding_psbt(
            &self.secp,
            &self.scripts,
            params,
            &self.staking_tx,
            self.staking_output_index,
        )?;
        let slashing = build_slashing_psbt(
            &self.secp,
            &self.scripts,
            params,
            &self.staking_tx,
            self.staking_output_index,
            SlashingSource::StakingOutput,
        )?;

        let signature = self.sign_slashing(&slashing).await?;
        self.artifacts.unbonding_tx = Some(unbonding.unsigned_tx);
        self.artifacts.slashing_tx = Some(slashing.unsigned_tx);
        self.artifacts.slashing_sig = Some(signature);
        Ok(())
    }

    async fn sign_unbonding_slashing(&mut self) -> StakingResult<()> {
        let unbonding_tx = require(&self.artifacts.unbonding_tx, "unbonding transaction")?;
        let slashing = build_slashing_psbt(
            &self.secp,
            &self.scripts,
            &self.context.params,
            unbonding_tx,
            0,
            SlashingSource::UnbondingOutput,
        )?;

        let signature = self.sign_slashing(&slashing).await?;
        self.artifacts.unbonding_slashing_tx = Some(slashing.unsigned_tx);
        self.artifacts.unbonding_slashing_sig = Some(signature);
        Ok(())
    }

    async fn sign_proof_of_possession(&mut self) -> StakingResult<()> {
        let message = proof_of_possession_message(&self.context.bbn_address)?;
        let signature = self.btc.sign_message(&message, SignatureScheme::Ecdsa).await?;
        let bytes = BASE64
            .decode(signature.trim())
            .map_err(|e| StakingError::encoding(format!("Proof of possession is not base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(StakingError::NoSignature {
                context: "proof of possession".to_string(),
            });
        }
        self.artifacts.pop_sig = Some(bytes);
        Ok(())
    }

    async fn sign_bbn(&mut self) -> StakingResult<()> {
        let unbonding_tx = require(&self.artifacts.unbonding_tx, "unbonding transaction")?.clone();
        let unbonding_value = unbonding_tx
            .output
            .first()
            .map(|o| o.value.to_sat())
            .ok_or_else(|| StakingError::script("Unbonding transaction has no output"))?;

        let artifacts = DelegationArtifacts {
            staker_addr: self.context.bbn_address.clone(),
            pop_signature: require(&self.artifacts.pop_sig, "proof of possession")?.clone(),
            btc_pk: self.context.staker.public_key,
            finality_provider_pks: self.context.finality_provider_pks.clone(),
            staking_time: self.timelock,
            staking_value: self.amount_sat,
            staking_tx: self.staking_tx.clone(),
            inclusion_proof: self.inclusion_proof.clone(),
            slashing_tx: require(&self.artifacts.slashing_tx, "slashing transaction")?.clone(),
            slashing_sig: require(&self.artifacts.slashing_sig, "slashing signature")?.clone(),
            unbonding_time: self.context.params.unbonding_time_blocks,
            unbonding_tx,
            unbonding_value,
            unbonding_slashing_tx: require(&self.artifacts.unbonding_slashing_tx, "unbonding slashing transaction")?
                .clone(),
            unbonding_slashing_sig: require(&self.artifacts.unbonding_slashing_sig, "unbonding slashing signature")?
                .clone(),
        };

        let msg = build_create_delegation_msg(&artifacts)?;
        let tx_bytes = self
            .bbn
            .sign_messages(vec![to_any(MSG_CREATE_BTC_DELEGATION_TYPE_URL, &msg)])
            .await?;
        self.artifacts.bbn_tx = Some(tx_bytes);
        Ok(())
    }

    async fn send_bbn(&mut self) -> StakingResult<()> {
        if let Some(hash) = &self.artifacts.bbn_tx_hash {
            return Err(StakingError::consistency(format!(
                "Delegation message already broadcast as {}",
                hash
            )));
        }
        let tx_bytes = require(&self.artifacts.bbn_tx, "signed delegation message")?;
        let hash = self.bbn.broadcast(tx_bytes).await?;
        log::info!("Delegation message for {} broadcast as {}", self.staking_txid(), hash);
        self.artifacts.bbn_tx_hash = Some(hash);

        // The message is on chain; a lost local record only delays the
        // merged view until the API indexes the delegation.
        if let Err(e) = self.record(DelegationState::IntermediatePendingVerification) {
            log::warn!("Could not record pending delegation {}: {}", self.staking_txid(), e);
        }
        Ok(())
    }

    async fn wait_for_verification(&mut self) -> StakingResult<()> {
        let txid = self.staking_txid();
        let txid = txid.as_str();
        let api = self.tracker.api();
        poll::until(
            self.poll_interval,
            self.max_wait,
            move || api.delegation(txid),
            |delegation| matches!(delegation, Some(d) if d.state == DelegationState::Verified),
        )
        .await?;
        log::info!("Delegation {} verified", txid);
        Ok(())
    }

    /// Rebuild, sign, check and broadcast the staking transaction
    async fn submit_staking_tx(&mut self) -> StakingResult<()> {
        let expected = self.staking_tx.compute_txid();
        let rebuilt = build_staking_psbt(
            &self.secp,
            &self.scripts,
            &self.context.staker,
            self.amount_sat,
            &self.context.utxos,
            self.context.fee_rate,
            self.context.params.btc_activation_height,
        )?;
        if rebuilt.unsigned_tx().compute_txid() != expected {
            return Err(StakingError::TxidMismatch {
                expected: expected.to_string(),
                actual: rebuilt.unsigned_tx().compute_txid().to_string(),
            });
        }

        let signed_hex = self.btc.sign_psbt(&rebuilt.psbt.serialize_hex()).await?;
        let signed = Psbt::deserialize(&hex::decode(signed_hex)?)?;
        let tx = signed.extract_tx_unchecked_fee_rate();
        let actual = tx.compute_txid();
        if actual != expected {
            return Err(StakingError::TxidMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        check_fee(&tx, self.context.fee_rate, rebuilt.fee_sat)?;

        let pushed = self.btc.push_tx(&serialize_hex(&tx)).await?;
        log::info!("Staking transaction {} broadcast", pushed);
        self.artifacts.btc_txid = Some(pushed);

        self.record(DelegationState::IntermediatePendingBtcConfirmation)
    }

    fn record(&self, state: DelegationState) -> StakingResult<()> {
        self.tracker.record(IntermediateDelegation {
            staking_tx_hash_hex: self.staking_txid(),
            staker_pk_hex: self.context.staker.public_key_hex(),
            finality_provider_pks_hex: self
                .context
                .finality_provider_pks
                .iter()
                .map(|pk| hex::encode(pk.serialize()))
                .collect(),
            amount_sat: self.amount_sat,
            timelock: self.timelock,
            state,
            start_timestamp: Utc::now(),
            staking_tx_hex: Some(serialize_hex(&self.staking_tx)),
            params_version: Some(self.context.params.version),
        })
    }
}
