//! Spendable outputs offered as staking inputs.

use crate::config::staking::LOW_VALUE_UTXO_THRESHOLD;
use crate::error::{StakingError, StakingResult};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// An unspent output owned by the staker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: String,
}

impl Utxo {
    pub fn outpoint(&self) -> StakingResult<OutPoint> {
        let txid = Txid::from_str(&self.txid)
            .map_err(|e| StakingError::invalid_input(format!("Invalid UTXO txid {}: {}", self.txid, e)))?;
        Ok(OutPoint::new(txid, self.vout))
    }

    pub fn tx_out(&self) -> StakingResult<TxOut> {
        Ok(TxOut {
            value: Amount::from_sat(self.value),
            script_pubkey: ScriptBuf::from_hex(&self.script_pubkey)?,
        })
    }

    /// `txid:vout`
    pub fn key(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// Drop low-value outputs and outputs flagged as carrying inscriptions.
///
/// `inscribed` holds `txid:vout` keys.
pub fn filter_spendable(utxos: Vec<Utxo>, inscribed: &HashSet<String>) -> Vec<Utxo> {
    let before = utxos.len();
    let spendable: Vec<Utxo> = utxos
        .into_iter()
        .filter(|u| u.value >= LOW_VALUE_UTXO_THRESHOLD)
        .filter(|u| !inscribed.contains(&u.key()))
        .collect();
    if spendable.len() != before {
        log::debug!("Filtered {} unusable UTXOs", before - spendable.len());
    }
    spendable
}

/// Pick UTXOs largest-first until `target(selected_count)` is covered.
///
/// `target` returns the amount needed (amount plus fee) for a given number
/// of inputs, since the fee grows with every input added.
pub fn select_largest_first<F>(utxos: &[Utxo], target: F) -> StakingResult<(Vec<Utxo>, u64)>
where
    F: Fn(usize) -> u64,
{
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in sorted {
        total += utxo.value;
        selected.push(utxo);
        if total >= target(selected.len()) {
            return Ok((selected, total));
        }
    }

    Err(StakingError::InsufficientBalance {
        required: target(selected.len().max(1)),
        available: total,
    })
}
