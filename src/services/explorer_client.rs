use crate::config::network::REQUEST_TIMEOUT;
use crate::delegations::MempoolLookup;
use crate::error::{StakingError, StakingResult};
use crate::services::babylon::{create_proof, InclusionProof};
use crate::staking::Utxo;
use crate::wallet::NetworkFees;
use bitcoin::{Address, BlockHash, Txid};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// Confirmation status of a transaction
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
    #[serde(default)]
    pub block_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UtxoDto {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatus,
}

/// Client for an Esplora-compatible block explorer API
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    client: Client,
    api_base: String,
}

impl ExplorerClient {
    /// Create a new explorer client
    pub fn new(api_base: impl Into<String>) -> StakingResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StakingError::operation("client_creation", e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> StakingResult<reqwest::Response> {
        let url = format!("{}{}", self.api_base, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StakingError::Http {
                endpoint: path.to_string(),
                status,
                message,
            });
        }
        Ok(response)
    }

    /// Confirmed UTXOs of an address, with the address script attached
    pub async fn get_utxos(&self, address: &Address) -> StakingResult<Vec<Utxo>> {
        let utxos: Vec<UtxoDto> = self
            .get(&format!("/address/{}/utxo", address))
            .await?
            .json()
            .await?;
        let script_pubkey = hex::encode(address.script_pubkey().as_bytes());

        Ok(utxos
            .into_iter()
            .filter(|u| u.status.confirmed)
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                script_pubkey: script_pubkey.clone(),
            })
            .collect())
    }

    /// Fee rates in sat/vB for the usual confirmation targets
    pub async fn get_fee_estimates(&self) -> StakingResult<NetworkFees> {
        let estimates: HashMap<String, f64> = self.get("/fee-estimates").await?.json().await?;
        let rate = |target: &str| {
            estimates
                .get(target)
                .map(|r| r.ceil().max(1.0) as u64)
                .unwrap_or(1)
        };

        Ok(NetworkFees {
            fastest: rate("1"),
            half_hour: rate("3"),
            hour: rate("6"),
            economy: rate("144"),
        })
    }

    /// Current chain tip height
    pub async fn get_tip_height(&self) -> StakingResult<u32> {
        let text = self.get("/blocks/tip/height").await?.text().await?;
        text.trim()
            .parse()
            .map_err(|_| StakingError::encoding(format!("Invalid tip height: {}", text)))
    }

    /// Status of a transaction, `None` if the explorer does not know it
    pub async fn get_tx_status(&self, txid: &str) -> StakingResult<Option<TxStatus>> {
        match self.get(&format!("/tx/{}/status", txid)).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(StakingError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Raw transaction hex
    pub async fn get_tx_hex(&self, txid: &str) -> StakingResult<String> {
        Ok(self.get(&format!("/tx/{}/hex", txid)).await?.text().await?)
    }

    /// Txids of a block in block order
    pub async fn get_block_txids(&self, block_hash: &str) -> StakingResult<Vec<String>> {
        Ok(self
            .get(&format!("/block/{}/txids", block_hash))
            .await?
            .json()
            .await?)
    }

    /// Broadcast a raw transaction and return its txid
    pub async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
        let path = "/tx";
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .body(tx_hex.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StakingError::Http {
                endpoint: path.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }
        log::info!("Broadcast transaction {}", body.trim());
        Ok(body.trim().to_string())
    }

    /// Merkle inclusion proof of a confirmed transaction
    pub async fn inclusion_proof(&self, txid: &str) -> StakingResult<InclusionProof> {
        let status = self.get_tx_status(txid).await?.ok_or_else(|| {
            StakingError::invalid_input(format!("Transaction {} not found", txid))
        })?;
        let block_hash = match (status.confirmed, status.block_hash) {
            (true, Some(hash)) => hash,
            _ => {
                return Err(StakingError::invalid_input(format!(
                    "Transaction {} is not confirmed yet",
                    txid
                )))
            }
        };

        let txids = self
            .get_block_txids(&block_hash)
            .await?
            .iter()
            .map(|id| Txid::from_str(id).map_err(|e| StakingError::encoding(e.to_string())))
            .collect::<StakingResult<Vec<_>>>()?;
        let target = Txid::from_str(txid).map_err(|e| StakingError::invalid_input(e.to_string()))?;
        let index = txids
            .iter()
            .position(|id| *id == target)
            .ok_or_else(|| StakingError::consistency(format!("{} missing from block {}", txid, block_hash)))?;

        let block_hash = BlockHash::from_str(&block_hash).map_err(|e| StakingError::encoding(e.to_string()))?;
        Ok(InclusionProof {
            block_hash,
            index: index as u32,
            proof: create_proof(&txids, index)?,
        })
    }
}

impl MempoolLookup for ExplorerClient {
    /// Known to the explorer, confirmed or not
    async fn is_in_mempool(&self, txid: &str) -> StakingResult<bool> {
        Ok(self.get_tx_status(txid).await?.is_some())
    }
}
