//! # BBN Chain Messages
//!
//! Protobuf types for the delegation-creation message and the Cosmos SDK
//! transaction envelope it travels in, plus the helpers around them: bech32
//! account addresses, the proof-of-possession payload, Merkle inclusion
//! proofs for confirmed staking transactions and `SIGN_MODE_DIRECT` sign
//! documents.

use crate::config::staking::{BBN_ADDRESS_PREFIX, BBN_DENOM, BBN_GAS_LIMIT};
use crate::error::{StakingError, StakingResult};
use bech32::{Bech32, Hrp};
use bitcoin::hashes::{hash160, sha256d, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{consensus, BlockHash, Transaction, Txid, XOnlyPublicKey};
use prost::Message;

pub const MSG_CREATE_BTC_DELEGATION_TYPE_URL: &str = "/babylon.btcstaking.v1.MsgCreateBTCDelegation";
pub const SECP256K1_PUBKEY_TYPE_URL: &str = "/cosmos.crypto.secp256k1.PubKey";

/// `SIGN_MODE_DIRECT`
pub const SIGN_MODE_DIRECT: i32 = 1;

/// Wire types, field numbers as registered on chain
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Any {
        #[prost(string, tag = "1")]
        pub type_url: String,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Coin {
        #[prost(string, tag = "1")]
        pub denom: String,
        #[prost(string, tag = "2")]
        pub amount: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PubKey {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TxBody {
        #[prost(message, repeated, tag = "1")]
        pub messages: Vec<Any>,
        #[prost(string, tag = "2")]
        pub memo: String,
        #[prost(uint64, tag = "3")]
        pub timeout_height: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModeInfoSingle {
        #[prost(int32, tag = "1")]
        pub mode: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModeInfo {
        #[prost(message, optional, tag = "1")]
        pub single: Option<ModeInfoSingle>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SignerInfo {
        #[prost(message, optional, tag = "1")]
        pub public_key: Option<Any>,
        #[prost(message, optional, tag = "2")]
        pub mode_info: Option<ModeInfo>,
        #[prost(uint64, tag = "3")]
        pub sequence: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Fee {
        #[prost(message, repeated, tag = "1")]
        pub amount: Vec<Coin>,
        #[prost(uint64, tag = "2")]
        pub gas_limit: u64,
        #[prost(string, tag = "3")]
        pub payer: String,
        #[prost(string, tag = "4")]
        pub granter: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AuthInfo {
        #[prost(message, repeated, tag = "1")]
        pub signer_infos: Vec<SignerInfo>,
        #[prost(message, optional, tag = "2")]
        pub fee: Option<Fee>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SignDoc {
        #[prost(bytes = "vec", tag = "1")]
        pub body_bytes: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub auth_info_bytes: Vec<u8>,
        #[prost(string, tag = "3")]
        pub chain_id: String,
        #[prost(uint64, tag = "4")]
        pub account_number: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TxRaw {
        #[prost(bytes = "vec", tag = "1")]
        pub body_bytes: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub auth_info_bytes: Vec<u8>,
        #[prost(bytes = "vec", repeated, tag = "3")]
        pub signatures: Vec<Vec<u8>>,
    }

    /// Signature scheme of a proof of possession
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum BtcSigType {
        Bip340 = 0,
        Bip322 = 1,
        Ecdsa = 2,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ProofOfPossessionBtc {
        #[prost(enumeration = "BtcSigType", tag = "1")]
        pub btc_sig_type: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub btc_sig: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TransactionKey {
        #[prost(uint32, tag = "1")]
        pub index: u32,
        #[prost(bytes = "vec", tag = "2")]
        pub hash: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InclusionProof {
        #[prost(message, optional, tag = "1")]
        pub key: Option<TransactionKey>,
        #[prost(bytes = "vec", tag = "2")]
        pub proof: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MsgCreateBtcDelegation {
        #[prost(string, tag = "1")]
        pub staker_addr: String,
        #[prost(message, optional, tag = "2")]
        pub pop: Option<ProofOfPossessionBtc>,
        #[prost(bytes = "vec", tag = "3")]
        pub btc_pk: Vec<u8>,
        #[prost(bytes = "vec", repeated, tag = "4")]
        pub fp_btc_pk_list: Vec<Vec<u8>>,
        #[prost(uint32, tag = "5")]
        pub staking_time: u32,
        #[prost(int64, tag = "6")]
        pub staking_value: i64,
        #[prost(bytes = "vec", tag = "7")]
        pub staking_tx: Vec<u8>,
        #[prost(message, optional, tag = "8")]
        pub staking_tx_inclusion_proof: Option<InclusionProof>,
        #[prost(bytes = "vec", tag = "9")]
        pub slashing_tx: Vec<u8>,
        #[prost(bytes = "vec", tag = "10")]
        pub delegator_slashing_sig: Vec<u8>,
        #[prost(uint32, tag = "11")]
        pub unbonding_time: u32,
        #[prost(bytes = "vec", tag = "12")]
        pub unbonding_tx: Vec<u8>,
        #[prost(int64, tag = "13")]
        pub unbonding_value: i64,
        #[prost(bytes = "vec", tag = "14")]
        pub unbonding_slashing_tx: Vec<u8>,
        #[prost(bytes = "vec", tag = "15")]
        pub delegator_unbonding_slashing_sig: Vec<u8>,
    }
}

/// Position of a confirmed transaction and the sibling path to its block's
/// merkle root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub block_hash: BlockHash,
    pub index: u32,
    /// Concatenated 32-byte sibling hashes, leaf level first
    pub proof: Vec<u8>,
}

impl InclusionProof {
    pub fn to_proto(&self) -> proto::InclusionProof {
        proto::InclusionProof {
            key: Some(proto::TransactionKey {
                index: self.index,
                hash: self.block_hash.to_byte_array().to_vec(),
            }),
            proof: self.proof.clone(),
        }
    }
}

fn merkle_parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256d::Hash::hash(&data).to_byte_array()
}

/// Sibling path of `txids[index]`; an odd node at the end of a level is
/// paired with itself, as in the block header merkle root.
pub fn create_proof(txids: &[Txid], index: usize) -> StakingResult<Vec<u8>> {
    if index >= txids.len() {
        return Err(StakingError::invalid_input(format!(
            "Transaction index {} out of range for {} transactions",
            index,
            txids.len()
        )));
    }

    let mut level: Vec<[u8; 32]> = txids.iter().map(|txid| txid.to_byte_array()).collect();
    let mut idx = index;
    let mut proof = Vec::new();

    while level.len() > 1 {
        let sibling = level.get(idx ^ 1).unwrap_or(&level[idx]);
        proof.extend_from_slice(sibling);

        level = level
            .chunks(2)
            .map(|pair| merkle_parent(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        idx >>= 1;
    }

    Ok(proof)
}

/// Recompute the root from a proof produced by [`create_proof`]
pub fn verify_proof(txid: &Txid, index: u32, proof: &[u8], merkle_root: &[u8; 32]) -> bool {
    if proof.len() % 32 != 0 {
        return false;
    }

    let mut current = txid.to_byte_array();
    let mut idx = index;
    for chunk in proof.chunks(32) {
        let mut sibling = [0u8; 32];
        sibling.copy_from_slice(chunk);
        current = if idx & 1 == 0 {
            merkle_parent(&current, &sibling)
        } else {
            merkle_parent(&sibling, &current)
        };
        idx >>= 1;
    }
    current == *merkle_root
}

/// Account address of a compressed secp256k1 key
pub fn bbn_address_from_pubkey(public_key: &PublicKey) -> StakingResult<String> {
    let hrp = Hrp::parse(BBN_ADDRESS_PREFIX).map_err(|e| StakingError::encoding(e.to_string()))?;
    let hash = hash160::Hash::hash(&public_key.serialize());
    bech32::encode::<Bech32>(hrp, hash.as_byte_array()).map_err(|e| StakingError::encoding(e.to_string()))
}

/// Data part of a bech32 account address
pub fn decode_bbn_address_data(address: &str) -> StakingResult<Vec<u8>> {
    let (hrp, data) = bech32::decode(address)
        .map_err(|e| StakingError::invalid_input(format!("Invalid BBN address {}: {}", address, e)))?;
    if hrp.as_str() != BBN_ADDRESS_PREFIX {
        return Err(StakingError::invalid_input(format!(
            "Address {} does not use the {} prefix",
            address, BBN_ADDRESS_PREFIX
        )));
    }
    Ok(data)
}

/// Message the staker signs to prove ownership of both keys
pub fn proof_of_possession_message(bbn_address: &str) -> StakingResult<String> {
    Ok(hex::encode(decode_bbn_address_data(bbn_address)?))
}

/// Everything the delegation-creation message carries
#[derive(Debug, Clone)]
pub struct DelegationArtifacts {
    pub staker_addr: String,
    pub pop_signature: Vec<u8>,
    pub btc_pk: XOnlyPublicKey,
    pub finality_provider_pks: Vec<XOnlyPublicKey>,
    pub staking_time: u16,
    pub staking_value: u64,
    pub staking_tx: Transaction,
    pub inclusion_proof: Option<InclusionProof>,
    pub slashing_tx: Transaction,
    pub slashing_sig: Vec<u8>,
    pub unbonding_time: u16,
    pub unbonding_tx: Transaction,
    pub unbonding_value: u64,
    pub unbonding_slashing_tx: Transaction,
    pub unbonding_slashing_sig: Vec<u8>,
}

fn to_i64(value: u64, field: &str) -> StakingResult<i64> {
    i64::try_from(value).map_err(|_| StakingError::invalid_input(format!("{} out of range: {}", field, value)))
}

pub fn build_create_delegation_msg(artifacts: &DelegationArtifacts) -> StakingResult<proto::MsgCreateBtcDelegation> {
    Ok(proto::MsgCreateBtcDelegation {
        staker_addr: artifacts.staker_addr.clone(),
        pop: Some(proto::ProofOfPossessionBtc {
            btc_sig_type: proto::BtcSigType::Ecdsa as i32,
            btc_sig: artifacts.pop_signature.clone(),
        }),
        btc_pk: artifacts.btc_pk.serialize().to_vec(),
        fp_btc_pk_list: artifacts
            .finality_provider_pks
            .iter()
            .map(|pk| pk.serialize().to_vec())
            .collect(),
        staking_time: artifacts.staking_time as u32,
        staking_value: to_i64(artifacts.staking_value, "staking value")?,
        staking_tx: consensus::serialize(&artifacts.staking_tx),
        staking_tx_inclusion_proof: artifacts.inclusion_proof.as_ref().map(InclusionProof::to_proto),
        slashing_tx: consensus::serialize(&artifacts.slashing_tx),
        delegator_slashing_sig: artifacts.slashing_sig.clone(),
        unbonding_time: artifacts.unbonding_time as u32,
        unbonding_tx: consensus::serialize(&artifacts.unbonding_tx),
        unbonding_value: to_i64(artifacts.unbonding_value, "unbonding value")?,
        unbonding_slashing_tx: consensus::serialize(&artifacts.unbonding_slashing_tx),
        delegator_unbonding_slashing_sig: artifacts.unbonding_slashing_sig.clone(),
    })
}

pub fn to_any<M: Message>(type_url: &str, message: &M) -> proto::Any {
    proto::Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

/// Fee for `gas_limit` at `gas_price`, rounded up
pub fn fee_for_gas(gas_limit: u64, gas_price: f64) -> proto::Fee {
    let amount = (gas_limit as f64 * gas_price).ceil() as u64;
    proto::Fee {
        amount: vec![proto::Coin {
            denom: BBN_DENOM.to_string(),
            amount: amount.to_string(),
        }],
        gas_limit,
        payer: String::new(),
        granter: String::new(),
    }
}

/// Signer account state needed for a sign document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// `SIGN_MODE_DIRECT` sign document for a single-signer transaction
pub fn build_sign_doc(
    messages: Vec<proto::Any>,
    public_key: &PublicKey,
    account: AccountInfo,
    chain_id: &str,
    gas_price: f64,
) -> proto::SignDoc {
    let body = proto::TxBody {
        messages,
        memo: String::new(),
        timeout_height: 0,
    };
    let auth_info = proto::AuthInfo {
        signer_infos: vec![proto::SignerInfo {
            public_key: Some(to_any(
                SECP256K1_PUBKEY_TYPE_URL,
                &proto::PubKey {
                    key: public_key.serialize().to_vec(),
                },
            )),
            mode_info: Some(proto::ModeInfo {
                single: Some(proto::ModeInfoSingle { mode: SIGN_MODE_DIRECT }),
            }),
            sequence: account.sequence,
        }],
        fee: Some(fee_for_gas(BBN_GAS_LIMIT, gas_price)),
    };

    proto::SignDoc {
        body_bytes: body.encode_to_vec(),
        auth_info_bytes: auth_info.encode_to_vec(),
        chain_id: chain_id.to_string(),
        account_number: account.account_number,
    }
}

/// Signed transaction ready for broadcast
pub fn assemble_tx_raw(sign_doc: &proto::SignDoc, signature: Vec<u8>) -> proto::TxRaw {
    proto::TxRaw {
        body_bytes: sign_doc.body_bytes.clone(),
        auth_info_bytes: sign_doc.auth_info_bytes.clone(),
        signatures: vec![signature],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::merkle_tree;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::TxMerkleNode;

    fn txids(n: u8) -> Vec<Txid> {
        (1..=n)
            .map(|i| Txid::from_byte_array(sha256d::Hash::hash(&[i]).to_byte_array()))
            .collect()
    }

    fn block_root(txids: &[Txid]) -> [u8; 32] {
        let root: TxMerkleNode = merkle_tree::calculate_root(
            txids.iter().map(|t| TxMerkleNode::from_raw_hash(t.to_raw_hash())),
        )
        .unwrap();
        root.to_byte_array()
    }

    #[test]
    fn test_proof_matches_block_merkle_root() {
        for count in [1u8, 2, 5, 8, 11] {
            let ids = txids(count);
            let root = block_root(&ids);
            for (i, id) in ids.iter().enumerate() {
                let proof = create_proof(&ids, i).unwrap();
                assert!(verify_proof(id, i as u32, &proof, &root), "count {} index {}", count, i);
            }
        }
    }

    #[test]
    fn test_proof_rejects_wrong_index() {
        let ids = txids(5);
        let root = block_root(&ids);
        let proof = create_proof(&ids, 2).unwrap();
        assert_eq!(proof.len(), 3 * 32);
        assert!(!verify_proof(&ids[2], 3, &proof, &root));
        assert!(create_proof(&ids, 5).is_err());
    }

    #[test]
    fn test_bbn_address_round_trip() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);

        let address = bbn_address_from_pubkey(&pk).unwrap();
        assert!(address.starts_with("bbn1"));

        let data = decode_bbn_address_data(&address).unwrap();
        assert_eq!(data, hash160::Hash::hash(&pk.serialize()).to_byte_array().to_vec());
        assert_eq!(proof_of_possession_message(&address).unwrap(), hex::encode(&data));

        assert!(decode_bbn_address_data("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").is_err());
    }

    #[test]
    fn test_sign_doc_fee_and_mode() {
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[4u8; 32]).unwrap());
        let msg = to_any(MSG_CREATE_BTC_DELEGATION_TYPE_URL, &proto::PubKey { key: vec![1] });
        let doc = build_sign_doc(
            vec![msg.clone()],
            &pk,
            AccountInfo {
                account_number: 7,
                sequence: 3,
            },
            "bbn-test-5",
            0.002,
        );

        let body = proto::TxBody::decode(doc.body_bytes.as_slice()).unwrap();
        assert_eq!(body.messages, vec![msg]);

        let auth = proto::AuthInfo::decode(doc.auth_info_bytes.as_slice()).unwrap();
        let fee = auth.fee.unwrap();
        assert_eq!(fee.amount[0].amount, "1200");
        assert_eq!(fee.amount[0].denom, "ubbn");
        assert_eq!(auth.signer_infos[0].sequence, 3);
        assert_eq!(
            auth.signer_infos[0].mode_info.as_ref().unwrap().single.as_ref().unwrap().mode,
            SIGN_MODE_DIRECT
        );

        let raw = assemble_tx_raw(&doc, vec![9; 64]);
        assert_eq!(raw.signatures.len(), 1);
        assert_eq!(doc.account_number, 7);
    }
}
