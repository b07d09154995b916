//! Software BBN wallet: a secp256k1 account key signing `SIGN_MODE_DIRECT`
//! transactions and broadcasting them through a Cosmos LCD endpoint.

use super::BabylonWallet;
use crate::config::network::REQUEST_TIMEOUT;
use crate::error::{StakingError, StakingResult};
use crate::services::babylon::{assemble_tx_raw, bbn_address_from_pubkey, build_sign_doc, proto, AccountInfo};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use prost::Message as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: AccountDto,
}

#[derive(Debug, Deserialize)]
struct AccountDto {
    account_number: String,
    #[serde(default)]
    sequence: String,
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    tx_bytes: String,
    mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    tx_response: TxResponse,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
    txhash: String,
}

pub struct LocalBabylonWallet {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    address: String,
    client: Client,
    lcd_url: String,
    chain_id: String,
    gas_price: f64,
}

impl std::fmt::Debug for LocalBabylonWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBabylonWallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl LocalBabylonWallet {
    pub fn new(secret_hex: &str, lcd_url: &str, chain_id: &str, gas_price: f64) -> StakingResult<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&hex::decode(secret_hex)?)?;
        let address = bbn_address_from_pubkey(&secret_key.public_key(&secp))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StakingError::operation("client_creation", e.to_string()))?;

        Ok(Self {
            secp,
            secret_key,
            address,
            client,
            lcd_url: lcd_url.trim_end_matches('/').to_string(),
            chain_id: chain_id.to_string(),
            gas_price,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key(&self.secp)
    }

    /// Account number and sequence from the LCD
    pub async fn account_info(&self) -> StakingResult<AccountInfo> {
        let path = format!("/cosmos/auth/v1beta1/accounts/{}", self.address);
        let response = self.client.get(format!("{}{}", self.lcd_url, path)).send().await?;
        if !response.status().is_success() {
            return Err(StakingError::Http {
                endpoint: path,
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: AccountResponse = response.json().await?;
        let parse = |raw: &str| {
            if raw.is_empty() {
                Ok(0)
            } else {
                raw.parse::<u64>()
                    .map_err(|_| StakingError::encoding(format!("Invalid account field: {}", raw)))
            }
        };
        Ok(AccountInfo {
            account_number: parse(&body.account.account_number)?,
            sequence: parse(&body.account.sequence)?,
        })
    }

    /// Sign `messages` for a known account state; returns encoded `TxRaw`
    pub fn sign_with_account(&self, messages: Vec<proto::Any>, account: AccountInfo) -> Vec<u8> {
        let sign_doc = build_sign_doc(messages, &self.public_key(), account, &self.chain_id, self.gas_price);
        let digest: [u8; 32] = Sha256::digest(sign_doc.encode_to_vec()).into();
        let signature = self
            .secp
            .sign_ecdsa(&Message::from_digest(digest), &self.secret_key);
        assemble_tx_raw(&sign_doc, signature.serialize_compact().to_vec()).encode_to_vec()
    }
}

fn check_tx_response(response: TxResponse) -> StakingResult<String> {
    if response.code != 0 {
        return Err(StakingError::ChainRejected {
            code: response.code,
            log: response.raw_log,
        });
    }
    Ok(response.txhash)
}

impl BabylonWallet for LocalBabylonWallet {
    fn is_connected(&self) -> bool {
        true
    }

    async fn address(&self) -> StakingResult<String> {
        Ok(self.address.clone())
    }

    async fn sign_messages(&self, messages: Vec<proto::Any>) -> StakingResult<Vec<u8>> {
        let account = self.account_info().await?;
        log::debug!(
            "Signing {} message(s) as {} (sequence {})",
            messages.len(),
            self.address,
            account.sequence
        );
        Ok(self.sign_with_account(messages, account))
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> StakingResult<String> {
        let path = "/cosmos/tx/v1beta1/txs";
        let request = BroadcastRequest {
            tx_bytes: BASE64.encode(tx_bytes),
            mode: "BROADCAST_MODE_SYNC",
        };
        let response = self
            .client
            .post(format!("{}{}", self.lcd_url, path))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StakingError::Http {
                endpoint: path.to_string(),
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: BroadcastResponse = response.json().await?;
        let hash = check_tx_response(body.tx_response)?;
        log::info!("BBN transaction {} accepted", hash);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::babylon::{to_any, MSG_CREATE_BTC_DELEGATION_TYPE_URL};
    use bitcoin::secp256k1::ecdsa::Signature;

    fn wallet() -> LocalBabylonWallet {
        LocalBabylonWallet::new(&"07".repeat(32), "http://127.0.0.1:1/", "bbn-test-5", 0.002).unwrap()
    }

    #[test]
    fn test_signature_covers_sign_doc() {
        let wallet = wallet();
        let account = AccountInfo {
            account_number: 12,
            sequence: 4,
        };
        let msg = to_any(MSG_CREATE_BTC_DELEGATION_TYPE_URL, &proto::PubKey { key: vec![2; 33] });
        let raw = proto::TxRaw::decode(wallet.sign_with_account(vec![msg], account).as_slice()).unwrap();

        let sign_doc = proto::SignDoc {
            body_bytes: raw.body_bytes.clone(),
            auth_info_bytes: raw.auth_info_bytes.clone(),
            chain_id: "bbn-test-5".to_string(),
            account_number: 12,
        };
        let digest: [u8; 32] = Sha256::digest(sign_doc.encode_to_vec()).into();
        let signature = Signature::from_compact(&raw.signatures[0]).unwrap();
        assert!(wallet
            .secp
            .verify_ecdsa(&Message::from_digest(digest), &signature, &wallet.public_key())
            .is_ok());
    }

    #[test]
    fn test_tx_response_codes() {
        let ok: BroadcastResponse =
            serde_json::from_str(r#"{"tx_response": {"code": 0, "raw_log": "", "txhash": "ABCD"}}"#).unwrap();
        assert_eq!(check_tx_response(ok.tx_response).unwrap(), "ABCD");

        let rejected: BroadcastResponse = serde_json::from_str(
            r#"{"tx_response": {"code": 11, "raw_log": "out of gas", "txhash": "EF01"}}"#,
        )
        .unwrap();
        assert!(matches!(
            check_tx_response(rejected.tx_response),
            Err(StakingError::ChainRejected { code: 11, .. })
        ));
    }

    #[test]
    fn test_account_response_shape() {
        let body: AccountResponse = serde_json::from_str(
            r#"{"account": {"@type": "/cosmos.auth.v1beta1.BaseAccount", "address": "bbn1", "account_number": "42", "sequence": "7"}}"#,
        )
        .unwrap();
        assert_eq!(body.account.account_number, "42");
        assert!(wallet().address.starts_with("bbn1"));
    }
}
