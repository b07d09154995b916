//! Software Bitcoin wallet backed by a single secret key.
//!
//! Signs P2WPKH and key-path P2TR inputs it owns, and tapscript leaves that
//! contain its x-only key. Leaves whose only key is ours (the timelock
//! leaves) are finalized; multi-party leaves only receive a
//! `tap_script_sigs` entry so the caller can assemble the witness.

use super::{BtcWallet, NetworkFees, SignatureScheme};
use crate::error::{StakingError, StakingResult};
use crate::services::ChainBackend;
use crate::staking::Utxo;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::key::{CompressedPublicKey, Keypair, TapTweak};
use bitcoin::psbt::Psbt;
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::taproot::{self, LeafVersion, TapLeafHash};
use bitcoin::{Address, Network, PrivateKey, Script, ScriptBuf, TxOut, Witness, XOnlyPublicKey};
use std::str::FromStr;

/// Address type the wallet receives and changes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2tr,
    P2wpkh,
}

impl FromStr for AddressKind {
    type Err = StakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p2tr" | "taproot" => Ok(Self::P2tr),
            "p2wpkh" | "segwit" => Ok(Self::P2wpkh),
            other => Err(StakingError::config(format!("Unknown address type: {}", other))),
        }
    }
}

pub struct LocalWallet {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    keypair: Keypair,
    address: Address,
    network: Network,
    chain: ChainBackend,
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl LocalWallet {
    /// Create a wallet from a hex or WIF secret key
    pub fn new(secret: &str, kind: AddressKind, network: Network, chain: ChainBackend) -> StakingResult<Self> {
        let secp = Secp256k1::new();
        let secret_key = if secret.len() == 64 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
            SecretKey::from_slice(&hex::decode(secret)?)?
        } else {
            PrivateKey::from_wif(secret)
                .map_err(|e| StakingError::config(format!("Invalid secret key: {}", e)))?
                .inner
        };
        let keypair = Keypair::from_secret_key(&secp, &secret_key);

        let address = match kind {
            AddressKind::P2tr => Address::p2tr(&secp, keypair.x_only_public_key().0, None, network),
            AddressKind::P2wpkh => {
                Address::p2wpkh(&CompressedPublicKey(secret_key.public_key(&secp)), network)
            }
        };
        log::debug!("Local wallet address {}", address);

        Ok(Self {
            secp,
            secret_key,
            keypair,
            address,
            network,
            chain,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    fn p2wpkh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&CompressedPublicKey(self.public_key()).wpubkey_hash())
    }

    fn p2tr_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr(&self.secp, self.x_only_public_key(), None)
    }

    /// Sign every input we can, in place
    pub fn sign_psbt_in_place(&self, psbt: &mut Psbt) -> StakingResult<()> {
        let prevouts = psbt
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                input.witness_utxo.clone().ok_or_else(|| {
                    StakingError::invalid_input(format!("PSBT input {} has no witness UTXO", i))
                })
            })
            .collect::<StakingResult<Vec<TxOut>>>()?;

        let unsigned_tx = psbt.unsigned_tx.clone();
        let mut cache = SighashCache::new(&unsigned_tx);
        let own_p2wpkh = self.p2wpkh_script();
        let own_p2tr = self.p2tr_script();
        let own_xonly = self.x_only_public_key();
        let mut signed = 0;

        for (index, input) in psbt.inputs.iter_mut().enumerate() {
            let prevout = &prevouts[index];

            if prevout.script_pubkey == own_p2wpkh {
                let sighash = cache
                    .p2wpkh_signature_hash(index, &prevout.script_pubkey, prevout.value, EcdsaSighashType::All)
                    .map_err(|e| StakingError::script(e.to_string()))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = ecdsa::Signature {
                    signature: self.secp.sign_ecdsa(&msg, &self.secret_key),
                    sighash_type: EcdsaSighashType::All,
                };
                input.final_script_witness = Some(Witness::p2wpkh(&signature, &self.public_key()));
                signed += 1;
            } else if !input.tap_scripts.is_empty() {
                let leaves: Vec<_> = input.tap_scripts.clone().into_iter().collect();
                for (control_block, (leaf, version)) in leaves {
                    let keys = leaf_keys(&leaf);
                    if !keys.contains(&own_xonly) {
                        continue;
                    }
                    let leaf_hash = TapLeafHash::from_script(&leaf, version);
                    let sighash = cache
                        .taproot_script_spend_signature_hash(
                            index,
                            &Prevouts::All(&prevouts),
                            leaf_hash,
                            TapSighashType::Default,
                        )
                        .map_err(|e| StakingError::script(e.to_string()))?;
                    let msg = Message::from_digest(sighash.to_byte_array());
                    let signature = taproot::Signature {
                        signature: self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair),
                        sighash_type: TapSighashType::Default,
                    };
                    input.tap_script_sigs.insert((own_xonly, leaf_hash), signature);

                    if keys.len() == 1 && version == LeafVersion::TapScript {
                        let mut witness = Witness::new();
                        witness.push(signature.to_vec());
                        witness.push(leaf.as_bytes());
                        witness.push(control_block.serialize());
                        input.final_script_witness = Some(witness);
                    }
                    signed += 1;
                }
            } else if prevout.script_pubkey == own_p2tr {
                let tweaked = self.keypair.tap_tweak(&self.secp, None).to_inner();
                let sighash = cache
                    .taproot_key_spend_signature_hash(index, &Prevouts::All(&prevouts), TapSighashType::Default)
                    .map_err(|e| StakingError::script(e.to_string()))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = taproot::Signature {
                    signature: self.secp.sign_schnorr_no_aux_rand(&msg, &tweaked),
                    sighash_type: TapSighashType::Default,
                };
                input.tap_key_sig = Some(signature);
                input.final_script_witness = Some(Witness::p2tr_key_spend(&signature));
                signed += 1;
            }
        }

        if signed == 0 {
            return Err(StakingError::WalletRejected {
                message: "no input in this PSBT belongs to the wallet".to_string(),
            });
        }
        log::debug!("Signed {} input(s) of {}", signed, unsigned_tx.compute_txid());
        Ok(())
    }
}

/// 32-byte pushes of a tapscript leaf, i.e. the x-only keys it checks
fn leaf_keys(leaf: &Script) -> Vec<XOnlyPublicKey> {
    leaf.instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) if bytes.len() == 32 => {
                XOnlyPublicKey::from_slice(bytes.as_bytes()).ok()
            }
            _ => None,
        })
        .collect()
}

impl BtcWallet for LocalWallet {
    fn connector_name(&self) -> &'static str {
        "local"
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn get_address(&self) -> StakingResult<String> {
        Ok(self.address.to_string())
    }

    async fn get_public_key_hex(&self) -> StakingResult<String> {
        Ok(hex::encode(self.public_key().serialize()))
    }

    async fn sign_psbt(&self, psbt_hex: &str) -> StakingResult<String> {
        let mut psbt = Psbt::deserialize(&hex::decode(psbt_hex)?)?;
        self.sign_psbt_in_place(&mut psbt)?;
        Ok(psbt.serialize_hex())
    }

    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> StakingResult<String> {
        let digest = signed_msg_hash(message);
        let msg = Message::from_digest(digest.to_byte_array());
        match scheme {
            SignatureScheme::Ecdsa => {
                let signature = self.secp.sign_ecdsa_recoverable(&msg, &self.secret_key);
                Ok(MessageSignature::new(signature, true).to_base64())
            }
            SignatureScheme::Bip340 => {
                let signature = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
                Ok(BASE64.encode(signature.serialize()))
            }
        }
    }

    async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
        self.chain.push_tx(tx_hex).await
    }

    async fn get_utxos(&self, address: &str, min_amount: Option<u64>) -> StakingResult<Vec<Utxo>> {
        let address = crate::utils::address::validate_and_parse(address, self.network)?;
        let utxos = self.chain.utxos(&address).await?;
        let min = min_amount.unwrap_or(0);
        Ok(utxos.into_iter().filter(|u| u.value >= min).collect())
    }

    async fn get_network_fees(&self) -> StakingResult<NetworkFees> {
        self.chain.network_fees().await
    }

    async fn get_btc_tip_height(&self) -> StakingResult<u32> {
        self.chain.tip_height().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::ExplorerClient;
    use crate::staking::transactions::tests::{fixture, STAKER_SEED};
    use crate::staking::{build_staking_psbt, build_withdrawal_psbt, WithdrawalSource};

    pub(crate) fn offline_wallet(kind: AddressKind) -> LocalWallet {
        let chain = ChainBackend::Explorer(ExplorerClient::new("http://127.0.0.1:1").unwrap());
        LocalWallet::new(&hex::encode([STAKER_SEED; 32]), kind, Network::Signet, chain).unwrap()
    }

    #[test]
    fn test_address_kind_parsing() {
        assert_eq!("P2TR".parse::<AddressKind>().unwrap(), AddressKind::P2tr);
        assert_eq!("segwit".parse::<AddressKind>().unwrap(), AddressKind::P2wpkh);
        assert!("p2pkh".parse::<AddressKind>().is_err());
    }

    #[tokio::test]
    async fn test_signs_staking_key_path_inputs() {
        let secp = Secp256k1::new();
        let wallet = offline_wallet(AddressKind::P2tr);
        let (_, scripts, staker, utxos) = fixture();
        assert_eq!(staker.address, *wallet.address());

        let build = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let signed_hex = wallet.sign_psbt(&build.psbt.serialize_hex()).await.unwrap();
        let signed = Psbt::deserialize(&hex::decode(signed_hex).unwrap()).unwrap();

        for input in &signed.inputs {
            assert!(input.tap_key_sig.is_some());
            assert_eq!(input.final_script_witness.as_ref().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_finalizes_single_key_timelock_leaf() {
        let secp = Secp256k1::new();
        let wallet = offline_wallet(AddressKind::P2tr);
        let (params, scripts, staker, utxos) = fixture();

        let build = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200).unwrap();
        let (mut psbt, _) = build_withdrawal_psbt(
            &secp,
            &scripts,
            &params,
            build.unsigned_tx(),
            0,
            WithdrawalSource::StakingTimelock,
            150,
            &staker.address.script_pubkey(),
            2,
        )
        .unwrap();

        wallet.sign_psbt_in_place(&mut psbt).unwrap();
        let witness = psbt.inputs[0].final_script_witness.as_ref().unwrap();
        assert_eq!(witness.len(), 3);
        assert_eq!(witness.nth(1).unwrap(), scripts.timelock.as_bytes());
    }

    #[test]
    fn test_foreign_psbt_is_rejected() {
        let secp = Secp256k1::new();
        let wallet = offline_wallet(AddressKind::P2wpkh);
        let (_, scripts, staker, utxos) = fixture();
        let mut psbt = build_staking_psbt(&secp, &scripts, &staker, 100_000, &utxos, 2, 200)
            .unwrap()
            .psbt;
        assert!(matches!(
            wallet.sign_psbt_in_place(&mut psbt),
            Err(StakingError::WalletRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_ecdsa_message_signature_recovers_wallet_key() {
        let secp = Secp256k1::new();
        let wallet = offline_wallet(AddressKind::P2wpkh);
        let sig = wallet.sign_message("deadbeef", SignatureScheme::Ecdsa).await.unwrap();

        let parsed = MessageSignature::from_base64(&sig).unwrap();
        let recovered = parsed.recover_pubkey(&secp, signed_msg_hash("deadbeef")).unwrap();
        assert_eq!(recovered.inner, wallet.public_key());

        let schnorr = wallet.sign_message("deadbeef", SignatureScheme::Bip340).await.unwrap();
        assert_eq!(BASE64.decode(schnorr).unwrap().len(), 64);
    }
}
