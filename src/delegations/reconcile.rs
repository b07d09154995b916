//! Two-source merge of API delegations and local intermediate records.
//!
//! The API is authoritative once it indexes a delegation, except while a
//! submitted unbonding or withdrawal is still reported in the state it was
//! taken from; the local record then shadows the API state. A local record the
//! API does not know yet is kept, unless it has been pending for longer than
//! [`MAX_PENDING_DURATION`] and the staking transaction is no longer in the
//! mempool, in which case it is considered abandoned.

use super::{Delegation, IntermediateDelegation};
use crate::config::staking::MAX_PENDING_DURATION;
use crate::error::StakingResult;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Mempool membership lookup for a transaction hash
#[allow(async_fn_in_trait)]
pub trait MempoolLookup {
    async fn is_in_mempool(&self, txid: &str) -> StakingResult<bool>;
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The kept local hash set differs from the input local hash set
    pub changed: bool,
    /// Local records to keep
    pub local: Vec<IntermediateDelegation>,
    /// Kept local records followed by the API delegations
    pub merged: Vec<Delegation>,
}

/// Merge API delegations with local intermediate records.
///
/// The mempool is only consulted for records older than the pending window.
/// A failed lookup counts as "not in mempool".
pub async fn reconcile<M: MempoolLookup>(
    api: &[Delegation],
    local: &[IntermediateDelegation],
    mempool: &M,
    now: DateTime<Utc>,
) -> Reconciliation {
    let api_by_hash: HashMap<&str, &Delegation> =
        api.iter().map(|d| (d.staking_tx_hash_hex.as_str(), d)).collect();
    let max_pending = chrono::Duration::from_std(MAX_PENDING_DURATION)
        .unwrap_or_else(|_| chrono::Duration::hours(24));

    let mut kept = Vec::with_capacity(local.len());
    for record in local {
        if let Some(indexed) = api_by_hash.get(record.staking_tx_hash_hex.as_str()) {
            if record.state.superseded_by(indexed.state) {
                log::debug!("Dropping local {}: indexed by API", record.staking_tx_hash_hex);
                continue;
            }
        }

        if now - record.start_timestamp > max_pending {
            let in_mempool = match mempool.is_in_mempool(&record.staking_tx_hash_hex).await {
                Ok(found) => found,
                Err(e) => {
                    log::warn!(
                        "Mempool lookup for {} failed, treating as absent: {}",
                        record.staking_tx_hash_hex,
                        e
                    );
                    false
                }
            };
            if !in_mempool {
                log::info!("Dropping stale local delegation {}", record.staking_tx_hash_hex);
                continue;
            }
        }

        kept.push(record.clone());
    }

    let before: HashSet<&str> = local.iter().map(|r| r.staking_tx_hash_hex.as_str()).collect();
    let after: HashSet<&str> = kept.iter().map(|r| r.staking_tx_hash_hex.as_str()).collect();
    let changed = before != after;

    let merged = kept
        .iter()
        .map(|record| match api_by_hash.get(record.staking_tx_hash_hex.as_str()) {
            Some(indexed) => Delegation {
                state: record.state,
                ..(*indexed).clone()
            },
            None => record.to_delegation(),
        })
        .chain(api.iter().filter(|d| !after.contains(d.staking_tx_hash_hex.as_str())).cloned())
        .collect();

    Reconciliation {
        changed,
        local: kept,
        merged,
    }
}
