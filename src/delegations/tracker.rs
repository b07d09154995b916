//! Store, staking API and mempool lookup combined into the merged delegation
//! view for one staker.

use super::{reconcile, Delegation, DelegationState, IntermediateDelegation, LocalStore, MempoolLookup};
use crate::error::StakingResult;
use crate::services::staking_api::DelegationApi;
use chrono::{DateTime, Utc};

pub struct DelegationTracker<S, A, M> {
    store: S,
    api: A,
    mempool: M,
    staker_pk_hex: String,
}

impl<S, A, M> DelegationTracker<S, A, M>
where
    S: LocalStore,
    A: DelegationApi,
    M: MempoolLookup,
{
    pub fn new(store: S, api: A, mempool: M, staker_pk_hex: impl Into<String>) -> Self {
        Self {
            store,
            api,
            mempool,
            staker_pk_hex: staker_pk_hex.into(),
        }
    }

    /// Add or replace a local intermediate record
    pub fn record(&self, record: IntermediateDelegation) -> StakingResult<()> {
        let mut records = self.store.load(&self.staker_pk_hex)?;
        records.retain(|r| r.staking_tx_hash_hex != record.staking_tx_hash_hex);
        log::info!(
            "Recording {} as {}",
            record.staking_tx_hash_hex,
            record.state
        );
        records.push(record);
        self.store.save(&self.staker_pk_hex, &records)
    }

    /// State of the local record for `staking_tx_hash_hex`, if any
    pub fn local_state(&self, staking_tx_hash_hex: &str) -> StakingResult<Option<DelegationState>> {
        Ok(self
            .store
            .load(&self.staker_pk_hex)?
            .into_iter()
            .find(|r| r.staking_tx_hash_hex == staking_tx_hash_hex)
            .map(|r| r.state))
    }

    /// Fetch API delegations, reconcile with local records and return the
    /// merged view. The store is written only when the local set changed.
    pub async fn sync(&self, now: DateTime<Utc>) -> StakingResult<Vec<Delegation>> {
        let api_delegations = self.api.all_delegations(&self.staker_pk_hex).await?;
        let local = self.store.load(&self.staker_pk_hex)?;

        let result = reconcile(&api_delegations, &local, &self.mempool, now).await;
        if result.changed {
            self.store.save(&self.staker_pk_hex, &result.local)?;
        }
        Ok(result.merged)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}
