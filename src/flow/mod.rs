//! # Signing Flows
//!
//! State machines that drive a delegation through both chains.
//!
//! ```text
//! Idle → StakingSlashing → UnbondingSlashing → ProofOfPossession
//!      → SignBbn → SendBbn → Verifying → Verified → SubmittingBtc → Complete
//! ```
//!
//! [`StakingFlow`] runs the sequence above one step per [`StakingFlow::advance`]
//! call; every transition is reported to a [`StepObserver`]. A failing step
//! resets the flow to `Idle` and returns a [`StepFailure`] naming the step, which
//! the caller may re-run with [`StakingFlow::retry`]. Unbonding and withdrawal
//! are single-shot flows in [`unbonding`] and [`withdrawal`].

pub mod staking;
pub mod unbonding;
pub mod withdrawal;

pub use staking::{phase1_transition_params, StakingFlow};
pub use unbonding::submit_unbonding;
pub use withdrawal::submit_withdrawal;

use crate::delegations::Delegation;
use crate::error::{StakingError, StakingResult};
use crate::params::ParameterVersion;
use crate::staking::{parse_x_only, StakingScripts};
use crate::wallet::{BabylonWallet, BtcWallet};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Transaction, XOnlyPublicKey};
use serde::Serialize;
use std::fmt;

/// Named step of the staking flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningStep {
    Idle,
    StakingSlashing,
    UnbondingSlashing,
    ProofOfPossession,
    SignBbn,
    SendBbn,
    Verifying,
    Verified,
    SubmittingBtc,
    Complete,
}

impl SigningStep {
    /// Step that follows this one, `None` once complete
    pub fn next(self) -> Option<SigningStep> {
        use SigningStep::*;
        match self {
            Idle => Some(StakingSlashing),
            StakingSlashing => Some(UnbondingSlashing),
            UnbondingSlashing => Some(ProofOfPossession),
            ProofOfPossession => Some(SignBbn),
            SignBbn => Some(SendBbn),
            SendBbn => Some(Verifying),
            Verifying => Some(Verified),
            Verified => Some(SubmittingBtc),
            SubmittingBtc => Some(Complete),
            Complete => None,
        }
    }

    /// Whether this step asks a wallet for a signature
    pub fn requires_signature(self) -> bool {
        matches!(
            self,
            SigningStep::StakingSlashing
                | SigningStep::UnbondingSlashing
                | SigningStep::ProofOfPossession
                | SigningStep::SignBbn
                | SigningStep::SubmittingBtc
        )
    }
}

impl fmt::Display for SigningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningStep::Idle => "idle",
            SigningStep::StakingSlashing => "staking-slashing",
            SigningStep::UnbondingSlashing => "unbonding-slashing",
            SigningStep::ProofOfPossession => "proof-of-possession",
            SigningStep::SignBbn => "sign-bbn",
            SigningStep::SendBbn => "send-bbn",
            SigningStep::Verifying => "verifying",
            SigningStep::Verified => "verified",
            SigningStep::SubmittingBtc => "submitting-btc",
            SigningStep::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Notified on every step transition
pub trait StepObserver {
    fn on_step(&self, step: SigningStep);
}

impl<F: Fn(SigningStep)> StepObserver for F {
    fn on_step(&self, step: SigningStep) {
        self(step)
    }
}

/// Observer that ignores transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn on_step(&self, _step: SigningStep) {}
}

/// A step failed; the flow is back at `Idle`
#[derive(Debug, thiserror::Error)]
#[error("Step {step} failed: {error}")]
pub struct StepFailure {
    pub step: SigningStep,
    #[source]
    pub error: StakingError,
}

/// Both wallets must be connected before any signature request
pub(crate) fn ensure_connected<B: BtcWallet, N: BabylonWallet>(btc: &B, bbn: &N) -> StakingResult<()> {
    if !btc.is_connected() {
        return Err(StakingError::WalletNotConnected {
            chain: "BTC".to_string(),
        });
    }
    if !bbn.is_connected() {
        return Err(StakingError::WalletNotConnected {
            chain: "BBN".to_string(),
        });
    }
    Ok(())
}

/// Scripts and staking transaction of an indexed delegation, rebuilt under
/// the parameter version it was created with
pub(crate) struct RebuiltDelegation {
    pub staker_pk: XOnlyPublicKey,
    pub scripts: StakingScripts,
    pub staking_tx: Transaction,
    pub staking_output_index: u32,
}

pub(crate) fn rebuild_delegation<C: Verification>(
    secp: &Secp256k1<C>,
    params: &ParameterVersion,
    delegation: &Delegation,
) -> StakingResult<RebuiltDelegation> {
    let staker_pk = parse_x_only(&delegation.staker_pk_hex)?;
    let finality_provider_pks = delegation
        .finality_provider_pks_hex
        .iter()
        .map(|pk| parse_x_only(pk))
        .collect::<StakingResult<Vec<_>>>()?;
    let scripts = StakingScripts::new(params, &staker_pk, &finality_provider_pks, delegation.timelock)?;

    let staking_tx = decode_tx(delegation.staking_tx_hex.as_deref(), "staking")?;
    if staking_tx.compute_txid().to_string() != delegation.staking_tx_hash_hex {
        return Err(StakingError::TxidMismatch {
            expected: delegation.staking_tx_hash_hex.clone(),
            actual: staking_tx.compute_txid().to_string(),
        });
    }
    let staking_script = scripts.staking_output_script(secp)?;
    let staking_output_index = staking_tx
        .output
        .iter()
        .position(|o| o.script_pubkey == staking_script)
        .ok_or_else(|| {
            StakingError::script(format!(
                "Staking tx {} does not pay to the rebuilt staking script",
                delegation.staking_tx_hash_hex
            ))
        })?;

    Ok(RebuiltDelegation {
        staker_pk,
        scripts,
        staking_tx,
        staking_output_index: staking_output_index as u32,
    })
}

pub(crate) fn decode_tx(raw: Option<&str>, what: &str) -> StakingResult<Transaction> {
    let raw = raw.ok_or_else(|| StakingError::invalid_input(format!("Delegation has no {} transaction", what)))?;
    Ok(bitcoin::consensus::deserialize(&hex::decode(raw)?)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::delegations::{Delegation, DelegationState, MempoolLookup};
    use crate::services::babylon::proto::{Any, MsgCreateBtcDelegation, TxBody, TxRaw};
    use crate::services::staking_api::{DelegationApi, DelegationPage};
    use crate::staking::Utxo;
    use crate::wallet::local::tests::offline_wallet;
    use crate::wallet::{AddressKind, LocalWallet, NetworkFees, SignatureScheme};
    use prost::Message;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_step_order() {
        let mut step = SigningStep::Idle;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last(), Some(&SigningStep::Complete));
        assert_eq!(SigningStep::SendBbn.to_string(), "send-bbn");
        assert!(!SigningStep::Verifying.requires_signature());
    }

    /// Bitcoin wallet that signs with a local key, counts pushes and can
    /// tamper with the staking transaction it is asked to sign.
    pub(crate) struct MockBtcWallet {
        pub inner: LocalWallet,
        pub pushed: Mutex<Vec<String>>,
        pub tamper_staking: bool,
        pub staking_output_script: Option<bitcoin::ScriptBuf>,
    }

    impl MockBtcWallet {
        pub fn new() -> Self {
            Self {
                inner: offline_wallet(AddressKind::P2tr),
                pushed: Mutex::new(Vec::new()),
                tamper_staking: false,
                staking_output_script: None,
            }
        }

        pub fn push_count(&self) -> usize {
            self.pushed.lock().unwrap().len()
        }
    }

    impl BtcWallet for MockBtcWallet {
        fn connector_name(&self) -> &'static str {
            "mock"
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn get_address(&self) -> StakingResult<String> {
            self.inner.get_address().await
        }

        async fn get_public_key_hex(&self) -> StakingResult<String> {
            self.inner.get_public_key_hex().await
        }

        async fn sign_psbt(&self, psbt_hex: &str) -> StakingResult<String> {
            let mut psbt = bitcoin::psbt::Psbt::deserialize(&hex::decode(psbt_hex)?)?;
            let is_staking = self
                .staking_output_script
                .as_ref()
                .map(|s| psbt.unsigned_tx.output.iter().any(|o| o.script_pubkey == *s))
                .unwrap_or(false);
            if self.tamper_staking && is_staking && psbt.unsigned_tx.output.len() > 1 {
                let change = &mut psbt.unsigned_tx.output[1];
                change.value = change.value - bitcoin::Amount::from_sat(1_000);
            }
            self.inner.sign_psbt_in_place(&mut psbt)?;
            Ok(psbt.serialize_hex())
        }

        async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> StakingResult<String> {
            self.inner.sign_message(message, scheme).await
        }

        async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
            let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&hex::decode(tx_hex)?)?;
            self.pushed.lock().unwrap().push(tx_hex.to_string());
            Ok(tx.compute_txid().to_string())
        }

        async fn get_utxos(&self, _address: &str, _min_amount: Option<u64>) -> StakingResult<Vec<Utxo>> {
            Ok(Vec::new())
        }

        async fn get_network_fees(&self) -> StakingResult<NetworkFees> {
            Ok(NetworkFees {
                fastest: 3,
                half_hour: 2,
                hour: 2,
                economy: 1,
            })
        }

        async fn get_btc_tip_height(&self) -> StakingResult<u32> {
            Ok(1_000)
        }
    }

    /// BBN wallet recording what it signs and broadcasts
    #[derive(Default)]
    pub(crate) struct MockBabylonWallet {
        pub broadcasts: AtomicUsize,
        pub last_msg: Mutex<Option<MsgCreateBtcDelegation>>,
        pub fail_signing: AtomicBool,
    }

    pub(crate) fn mock_bbn_address() -> String {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[9u8; 32]).unwrap();
        crate::services::babylon::bbn_address_from_pubkey(&sk.public_key(&secp)).unwrap()
    }

    impl BabylonWallet for MockBabylonWallet {
        fn is_connected(&self) -> bool {
            true
        }

        async fn address(&self) -> StakingResult<String> {
            Ok(mock_bbn_address())
        }

        async fn sign_messages(&self, messages: Vec<Any>) -> StakingResult<Vec<u8>> {
            if self.fail_signing.load(Ordering::SeqCst) {
                return Err(StakingError::WalletRejected {
                    message: "user rejected".to_string(),
                });
            }
            let msg = MsgCreateBtcDelegation::decode(messages[0].value.as_slice())
                .map_err(|e| StakingError::encoding(e.to_string()))?;
            *self.last_msg.lock().unwrap() = Some(msg);
            let body = TxBody {
                messages,
                memo: String::new(),
                timeout_height: 0,
            };
            Ok(TxRaw {
                body_bytes: body.encode_to_vec(),
                auth_info_bytes: Vec::new(),
                signatures: vec![vec![1; 64]],
            }
            .encode_to_vec())
        }

        async fn broadcast(&self, _tx_bytes: &[u8]) -> StakingResult<String> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            Ok("BBNTXHASH".to_string())
        }
    }

    /// API that reports every looked-up delegation in a fixed state
    pub(crate) struct StateApi {
        pub state: DelegationState,
        pub delegation: Mutex<Option<Delegation>>,
        pub lookups: AtomicUsize,
    }

    impl StateApi {
        pub fn new(state: DelegationState) -> Self {
            Self {
                state,
                delegation: Mutex::new(None),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl DelegationApi for StateApi {
        async fn delegations_page(
            &self,
            _staker_pk_hex: &str,
            _pagination_key: Option<&str>,
        ) -> StakingResult<DelegationPage> {
            Ok(DelegationPage::default())
        }

        async fn delegation(&self, staking_tx_hash_hex: &str) -> StakingResult<Option<Delegation>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.delegation.lock().unwrap().clone().map(|mut d| {
                d.staking_tx_hash_hex = staking_tx_hash_hex.to_string();
                d.state = self.state;
                d
            }))
        }
    }

    /// Indexed delegation over the shared staking fixture
    pub(crate) fn indexed_delegation(state: DelegationState) -> Delegation {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let (params, scripts, staker, utxos) = crate::staking::transactions::tests::fixture();
        let staking_tx = crate::staking::build_staking_psbt(
            &secp,
            &scripts,
            &staker,
            100_000,
            &utxos,
            2,
            params.btc_activation_height,
        )
        .unwrap()
        .psbt
        .unsigned_tx;

        Delegation {
            staking_tx_hash_hex: staking_tx.compute_txid().to_string(),
            staker_pk_hex: staker.public_key_hex(),
            finality_provider_pks_hex: vec![hex::encode(crate::params::tests::xonly(6).serialize())],
            amount_sat: 100_000,
            timelock: 150,
            start_height: 200,
            end_height: 350,
            staking_tx_hex: Some(bitcoin::consensus::encode::serialize_hex(&staking_tx)),
            unbonding_tx_hex: None,
            covenant_unbonding_signatures: Vec::new(),
            slashing_tx_hex: None,
            unbonding_slashing_tx_hex: None,
            state,
            params_version: Some(params.version),
            schema: crate::delegations::DelegationSchema::V2,
        }
    }

    pub(crate) struct NoMempool;

    impl MempoolLookup for NoMempool {
        async fn is_in_mempool(&self, _txid: &str) -> StakingResult<bool> {
            Ok(false)
        }
    }
}
