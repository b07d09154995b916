use crate::config::RpcSettings;
use crate::delegations::MempoolLookup;
use crate::error::{StakingError, StakingResult};
use crate::staking::Utxo;
use crate::wallet::NetworkFees;
use bitcoin::{Address, Amount, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Bitcoin Core node client.
///
/// The underlying RPC client is blocking; every call runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct NodeClient {
    client: Arc<Client>,
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient").finish_non_exhaustive()
    }
}

impl NodeClient {
    /// Connect to the node described by `settings`
    pub fn new(settings: &RpcSettings) -> StakingResult<Self> {
        let auth = Auth::UserPass(settings.user.clone(), settings.password.clone());
        let url = format!("http://{}:{}", settings.host, settings.port);
        let client = Client::new(&url, auth)?;

        Ok(NodeClient {
            client: Arc::new(client),
        })
    }

    async fn call<T, F>(&self, operation: &'static str, f: F) -> StakingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> StakingResult<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| StakingError::operation(operation, e.to_string()))?
    }

    /// Get current block count
    pub async fn get_tip_height(&self) -> StakingResult<u32> {
        self.call("getblockcount", |c| Ok(c.get_block_count()? as u32)).await
    }

    /// Whether the node's mempool holds `txid`
    pub async fn in_mempool(&self, txid: &str) -> StakingResult<bool> {
        let txid = Txid::from_str(txid).map_err(|e| StakingError::invalid_input(e.to_string()))?;
        self.call("getmempoolentry", move |c| Ok(c.get_mempool_entry(&txid).is_ok()))
            .await
    }

    /// Fee rates in sat/vB from `estimatesmartfee`
    pub async fn get_network_fees(&self) -> StakingResult<NetworkFees> {
        self.call("estimatesmartfee", |c| {
            let rate = |target: u16| -> StakingResult<u64> {
                let estimate = c.estimate_smart_fee(target, None)?;
                // BTC/kvB to sat/vB
                Ok(estimate
                    .fee_rate
                    .map(|per_kvb| per_kvb.to_sat().div_ceil(1000))
                    .unwrap_or(1)
                    .max(1))
            };
            Ok(NetworkFees {
                fastest: rate(1)?,
                half_hour: rate(3)?,
                hour: rate(6)?,
                economy: rate(144)?,
            })
        })
        .await
    }

    /// Broadcast a raw transaction
    pub async fn push_tx(&self, tx_hex: &str) -> StakingResult<String> {
        let tx_hex = tx_hex.to_string();
        let txid = self
            .call("sendrawtransaction", move |c| Ok(c.send_raw_transaction(tx_hex.as_str())?))
            .await?;
        log::info!("Broadcast transaction {}", txid);
        Ok(txid.to_string())
    }

    /// Raw transaction hex
    pub async fn get_tx_hex(&self, txid: &str) -> StakingResult<String> {
        let txid = Txid::from_str(txid).map_err(|e| StakingError::invalid_input(e.to_string()))?;
        self.call("getrawtransaction", move |c| Ok(c.get_raw_transaction_hex(&txid, None)?))
            .await
    }

    /// Scan the UTXO set for outputs paying to `address`
    pub async fn scan_utxos(&self, address: &Address) -> StakingResult<Vec<Utxo>> {
        let scanobject = format!("addr({})", address);
        let result: Value = self
            .call("scantxoutset", move |c| {
                Ok(c.call(
                    "scantxoutset",
                    &[
                        Value::String("start".to_string()),
                        Value::Array(vec![Value::String(scanobject)]),
                    ],
                )?)
            })
            .await?;

        let unspents = match result["unspents"].as_array() {
            Some(unspents) => unspents,
            None => return Ok(vec![]),
        };
        unspents.iter().map(parse_unspent).collect()
    }
}

fn parse_unspent(entry: &Value) -> StakingResult<Utxo> {
    let field = |name: &str| StakingError::encoding(format!("scantxoutset entry missing {}", name));
    let amount = entry["amount"].as_f64().ok_or_else(|| field("amount"))?;
    Ok(Utxo {
        txid: entry["txid"].as_str().ok_or_else(|| field("txid"))?.to_string(),
        vout: entry["vout"].as_u64().ok_or_else(|| field("vout"))? as u32,
        value: Amount::from_btc(amount)
            .map_err(|e| StakingError::encoding(e.to_string()))?
            .to_sat(),
        script_pubkey: entry["scriptPubKey"]
            .as_str()
            .ok_or_else(|| field("scriptPubKey"))?
            .to_string(),
    })
}

impl MempoolLookup for NodeClient {
    async fn is_in_mempool(&self, txid: &str) -> StakingResult<bool> {
        self.in_mempool(txid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_unspent() {
        let entry = json!({
            "txid": "ab".repeat(32),
            "vout": 2,
            "scriptPubKey": "0014f87283ca2ab20a1ab50cb7cf2ba0e1d2bc3a1a08",
            "amount": 0.0015,
            "height": 100
        });
        let utxo = parse_unspent(&entry).unwrap();
        assert_eq!(utxo.vout, 2);
        assert_eq!(utxo.value, 150_000);

        assert!(parse_unspent(&json!({"txid": "ab"})).is_err());
    }
}
