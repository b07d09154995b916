//! # Staking API Client
//!
//! REST client for the staking indexer: versioned network parameters,
//! delegations by staker (V1 and V2 endpoints, cursor paginated), single
//! delegations by staking tx hash, finality providers, the inscription check
//! for UTXOs and the geo-block aware health check.

use crate::config::network::{GEO_BLOCKED_STATUS, REQUEST_TIMEOUT};
use crate::delegations::{CovenantSignature, Delegation, DelegationSchema, DelegationState};
use crate::error::{StakingError, StakingResult};
use crate::params::{ParameterVersion, ParamsSet};
use crate::staking::{parse_x_only, Utxo};
use crate::utils::retry;
use bitcoin::ScriptBuf;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One page of delegations
#[derive(Debug, Clone, Default)]
pub struct DelegationPage {
    pub delegations: Vec<Delegation>,
    pub next_key: Option<String>,
}

/// Delegation lookups
#[allow(async_fn_in_trait)]
pub trait DelegationApi {
    async fn delegations_page(
        &self,
        staker_pk_hex: &str,
        pagination_key: Option<&str>,
    ) -> StakingResult<DelegationPage>;

    /// `None` when the API does not know the hash (yet)
    async fn delegation(&self, staking_tx_hash_hex: &str) -> StakingResult<Option<Delegation>>;

    /// Walk every page for a staker
    async fn all_delegations(&self, staker_pk_hex: &str) -> StakingResult<Vec<Delegation>> {
        let mut all = Vec::new();
        let mut key: Option<String> = None;
        loop {
            let page = self.delegations_page(staker_pk_hex, key.as_deref()).await?;
            all.extend(page.delegations);
            match page.next_key {
                Some(next) => key = Some(next),
                None => return Ok(all),
            }
        }
    }
}

/// Result of the health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Normal,
    GeoBlocked,
    Error(String),
}

/// A finality provider delegations can be assigned to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalityProvider {
    pub btc_pk: String,
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub commission: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize, Default)]
struct Pagination {
    #[serde(default)]
    next_key: String,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Pagination,
}

impl Pagination {
    fn next(self) -> Option<String> {
        if self.next_key.is_empty() {
            None
        } else {
            Some(self.next_key)
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkInfoDto {
    params: NetworkParamsDto,
}

#[derive(Debug, Deserialize)]
struct NetworkParamsDto {
    bbn: Vec<BbnParamsDto>,
}

#[derive(Debug, Deserialize)]
struct BbnParamsDto {
    version: u32,
    covenant_pks: Vec<String>,
    covenant_quorum: u32,
    min_staking_value_sat: u64,
    max_staking_value_sat: u64,
    min_staking_time_blocks: u16,
    max_staking_time_blocks: u16,
    slashing_pk_script: String,
    min_slashing_tx_fee_sat: u64,
    slashing_rate: String,
    #[serde(alias = "min_unbonding_time_blocks")]
    unbonding_time_blocks: u16,
    unbonding_fee_sat: u64,
    btc_activation_height: u32,
    #[serde(default)]
    max_finality_providers: Option<u32>,
    #[serde(default)]
    allow_list_expiration_height: Option<u32>,
}

impl TryFrom<BbnParamsDto> for ParameterVersion {
    type Error = StakingError;

    fn try_from(dto: BbnParamsDto) -> StakingResult<Self> {
        let covenant_pks = dto
            .covenant_pks
            .iter()
            .map(|pk| parse_x_only(pk))
            .collect::<StakingResult<Vec<_>>>()?;
        Ok(ParameterVersion {
            version: dto.version,
            btc_activation_height: dto.btc_activation_height,
            covenant_pks,
            covenant_quorum: dto.covenant_quorum,
            unbonding_time_blocks: dto.unbonding_time_blocks,
            unbonding_fee_sat: dto.unbonding_fee_sat,
            min_staking_value_sat: dto.min_staking_value_sat,
            max_staking_value_sat: dto.max_staking_value_sat,
            min_staking_time_blocks: dto.min_staking_time_blocks,
            max_staking_time_blocks: dto.max_staking_time_blocks,
            slashing_pk_script: ScriptBuf::from_hex(&dto.slashing_pk_script)?,
            slashing_rate: dto.slashing_rate.parse()?,
            min_slashing_tx_fee_sat: dto.min_slashing_tx_fee_sat,
            max_finality_providers: dto
                .max_finality_providers
                .unwrap_or(crate::config::staking::DEFAULT_MAX_FINALITY_PROVIDERS),
            allow_list_expiration_height: dto.allow_list_expiration_height,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct SlashingDto {
    #[serde(default)]
    slashing_tx_hex: String,
    #[serde(default)]
    unbonding_slashing_tx_hex: String,
}

#[derive(Debug, Deserialize)]
struct DelegationStakingDto {
    staking_tx_hex: String,
    staking_tx_hash_hex: String,
    staking_timelock: u16,
    staking_amount: u64,
    start_height: u32,
    end_height: u32,
    #[serde(default)]
    slashing: SlashingDto,
}

#[derive(Debug, Deserialize)]
struct CovenantSignatureDto {
    covenant_btc_pk_hex: String,
    signature_hex: String,
}

#[derive(Debug, Deserialize, Default)]
struct DelegationUnbondingDto {
    #[serde(default)]
    unbonding_tx: String,
    #[serde(default)]
    covenant_unbonding_signatures: Vec<CovenantSignatureDto>,
    #[serde(default)]
    slashing: SlashingDto,
}

#[derive(Debug, Deserialize)]
struct DelegationV2Dto {
    finality_provider_btc_pks_hex: Vec<String>,
    params_version: u32,
    staker_btc_pk_hex: String,
    state: String,
    delegation_staking: DelegationStakingDto,
    #[serde(default)]
    delegation_unbonding: DelegationUnbondingDto,
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<DelegationV2Dto> for Delegation {
    fn from(dto: DelegationV2Dto) -> Self {
        let staking = dto.delegation_staking;
        let unbonding = dto.delegation_unbonding;
        Delegation {
            staking_tx_hash_hex: staking.staking_tx_hash_hex,
            staker_pk_hex: dto.staker_btc_pk_hex,
            finality_provider_pks_hex: dto.finality_provider_btc_pks_hex,
            amount_sat: staking.staking_amount,
            timelock: staking.staking_timelock,
            start_height: staking.start_height,
            end_height: staking.end_height,
            staking_tx_hex: non_empty(staking.staking_tx_hex),
            unbonding_tx_hex: non_empty(unbonding.unbonding_tx),
            covenant_unbonding_signatures: unbonding
                .covenant_unbonding_signatures
                .into_iter()
                .map(|s| CovenantSignature {
                    covenant_pk_hex: s.covenant_btc_pk_hex,
                    signature_hex: s.signature_hex,
                })
                .collect(),
            slashing_tx_hex: non_empty(staking.slashing.slashing_tx_hex),
            unbonding_slashing_tx_hex: non_empty(unbonding.slashing.unbonding_slashing_tx_hex),
            state: DelegationState::parse(&dto.state),
            params_version: Some(dto.params_version),
            schema: DelegationSchema::V2,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxInfoV1Dto {
    tx_hex: String,
    #[serde(default)]
    start_height: u32,
    #[serde(default)]
    timelock: u16,
}

#[derive(Debug, Deserialize)]
struct DelegationV1Dto {
    staking_tx_hash_hex: String,
    staker_pk_hex: String,
    finality_provider_pk_hex: String,
    state: String,
    staking_value: u64,
    staking_tx: TxInfoV1Dto,
    #[serde(default)]
    unbonding_tx: Option<TxInfoV1Dto>,
}

impl From<DelegationV1Dto> for Delegation {
    fn from(dto: DelegationV1Dto) -> Self {
        let start_height = dto.staking_tx.start_height;
        let timelock = dto.staking_tx.timelock;
        Delegation {
            staking_tx_hash_hex: dto.staking_tx_hash_hex,
            staker_pk_hex: dto.staker_pk_hex,
            finality_provider_pks_hex: vec![dto.finality_provider_pk_hex],
            amount_sat: dto.staking_value,
            timelock,
            start_height,
            end_height: start_height + timelock as u32,
            staking_tx_hex: non_empty(dto.staking_tx.tx_hex),
            unbonding_tx_hex: dto.unbonding_tx.and_then(|u| non_empty(u.tx_hex)),
            covenant_unbonding_signatures: Vec::new(),
            slashing_tx_hex: None,
            unbonding_slashing_tx_hex: None,
            state: DelegationState::parse(&dto.state),
            params_version: None,
            schema: DelegationSchema::V1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FinalityProviderDto {
    btc_pk: String,
    #[serde(default)]
    description: FinalityProviderDescription,
    #[serde(default)]
    commission: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize, Default)]
struct FinalityProviderDescription {
    #[serde(default)]
    moniker: String,
}

#[derive(Debug, Serialize)]
struct UtxoRef<'a> {
    txid: &'a str,
    vout: u32,
}

#[derive(Debug, Serialize)]
struct VerifyUtxosRequest<'a> {
    utxos: Vec<UtxoRef<'a>>,
    address: &'a str,
}

#[derive(Debug, Deserialize)]
struct UtxoInscriptionDto {
    txid: String,
    vout: u32,
    inscription: bool,
}

/// Client for the staking indexer API
#[derive(Debug, Clone)]
pub struct StakingApiClient {
    client: Client,
    api_base: String,
}

impl StakingApiClient {
    /// Create a new staking API client
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

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> StakingResult<T> {
        let url = format!("{}{}", self.api_base, path);
        let response = self.client.get(&url).query(query).send().await?;
        let response = check_status(path, response).await?;
        Ok(response.json().await?)
    }

    /// Versioned parameters, validated into a [`ParamsSet`]
    pub async fn network_params(&self) -> StakingResult<ParamsSet> {
        let info: DataResponse<NetworkInfoDto> =
            retry::with_backoff(|| self.get_json("/v2/network-info", &[])).await?;
        let versions = info
            .data
            .params
            .bbn
            .into_iter()
            .map(ParameterVersion::try_from)
            .collect::<StakingResult<Vec<_>>>()?;
        ParamsSet::new(versions)
    }

    /// One page of V1 (phase-1) delegations
    pub async fn v1_delegations_page(
        &self,
        staker_pk_hex: &str,
        pagination_key: Option<&str>,
    ) -> StakingResult<DelegationPage> {
        let mut query = vec![("staker_btc_pk", staker_pk_hex)];
        if let Some(key) = pagination_key {
            query.push(("pagination_key", key));
        }
        let page: PagedResponse<DelegationV1Dto> =
            retry::with_backoff(|| self.get_json("/v1/staker/delegations", &query)).await?;
        Ok(DelegationPage {
            delegations: page.data.into_iter().map(Delegation::from).collect(),
            next_key: page.pagination.next(),
        })
    }

    /// A staker's phase-1 delegation by staking tx hash, from the V1 pages.
    ///
    /// Phase-1 stakes that have not been registered on the BBN chain yet are
    /// only listed there.
    pub async fn v1_delegation(
        &self,
        staker_pk_hex: &str,
        staking_tx_hash_hex: &str,
    ) -> StakingResult<Option<Delegation>> {
        let mut key: Option<String> = None;
        loop {
            let page = self.v1_delegations_page(staker_pk_hex, key.as_deref()).await?;
            if let Some(found) = page
                .delegations
                .into_iter()
                .find(|d| d.staking_tx_hash_hex == staking_tx_hash_hex)
            {
                return Ok(Some(found));
            }
            match page.next_key {
                Some(next) => key = Some(next),
                None => return Ok(None),
            }
        }
    }

    /// Active finality providers
    pub async fn finality_providers(&self) -> StakingResult<Vec<FinalityProvider>> {
        let response: PagedResponse<FinalityProviderDto> =
            retry::with_backoff(|| self.get_json("/v2/finality-providers", &[])).await?;
        Ok(response
            .data
            .into_iter()
            .map(|fp| FinalityProvider {
                btc_pk: fp.btc_pk,
                moniker: fp.description.moniker,
                commission: fp.commission,
                state: fp.state,
            })
            .collect())
    }

    /// `txid:vout` keys of the given UTXOs that carry inscriptions
    pub async fn inscribed_utxos(&self, utxos: &[Utxo], address: &str) -> StakingResult<HashSet<String>> {
        if utxos.is_empty() {
            return Ok(HashSet::new());
        }
        let path = "/v1/ordinals/verify-utxos";
        let body = VerifyUtxosRequest {
            utxos: utxos
                .iter()
                .map(|u| UtxoRef {
                    txid: &u.txid,
                    vout: u.vout,
                })
                .collect(),
            address,
        };
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .json(&body)
            .send()
            .await?;
        let response = check_status(path, response).await?;
        let result: DataResponse<Vec<UtxoInscriptionDto>> = response.json().await?;
        Ok(result
            .data
            .into_iter()
            .filter(|u| u.inscription)
            .map(|u| format!("{}:{}", u.txid, u.vout))
            .collect())
    }

    /// Service health, distinguishing geo-blocking from other failures.
    ///
    /// Never retried.
    pub async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/healthcheck", self.api_base);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().as_u16() == GEO_BLOCKED_STATUS => {
                log::warn!("Staking API reports this region as geo-blocked");
                HealthStatus::GeoBlocked
            }
            Ok(response) if response.status().is_success() => HealthStatus::Normal,
            Ok(response) => HealthStatus::Error(format!("HTTP {}", response.status())),
            Err(e) => HealthStatus::Error(e.to_string()),
        }
    }
}

/// Map non-success statuses onto errors, 451 onto `GeoBlocked`
async fn check_status(endpoint: &str, response: reqwest::Response) -> StakingResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == GEO_BLOCKED_STATUS {
        return Err(StakingError::GeoBlocked);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StakingError::Http {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

impl DelegationApi for StakingApiClient {
    async fn delegations_page(
        &self,
        staker_pk_hex: &str,
        pagination_key: Option<&str>,
    ) -> StakingResult<DelegationPage> {
        let mut query = vec![("staker_pk_hex", staker_pk_hex)];
        if let Some(key) = pagination_key {
            query.push(("pagination_key", key));
        }
        let page: PagedResponse<DelegationV2Dto> =
            retry::with_backoff(|| self.get_json("/v2/delegations", &query)).await?;
        Ok(DelegationPage {
            delegations: page.data.into_iter().map(Delegation::from).collect(),
            next_key: page.pagination.next(),
        })
    }

    async fn delegation(&self, staking_tx_hash_hex: &str) -> StakingResult<Option<Delegation>> {
        let query = [("staking_tx_hash_hex", staking_tx_hash_hex)];
        let result: StakingResult<DataResponse<DelegationV2Dto>> =
            retry::with_backoff(|| self.get_json("/v2/delegation", &query)).await;
        match result {
            Ok(response) => Ok(Some(response.data.into())),
            Err(StakingError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// V2 pages first, then V1 pages for hashes V2 does not know
    async fn all_delegations(&self, staker_pk_hex: &str) -> StakingResult<Vec<Delegation>> {
        let mut all = Vec::new();
        let mut key: Option<String> = None;
        loop {
            let page = self.delegations_page(staker_pk_hex, key.as_deref()).await?;
            all.extend(page.delegations);
            match page.next_key {
                Some(next) => key = Some(next),
                None => break,
            }
        }

        let known: HashSet<String> = all.iter().map(|d| d.staking_tx_hash_hex.clone()).collect();
        let mut key: Option<String> = None;
        loop {
            let page = self.v1_delegations_page(staker_pk_hex, key.as_deref()).await?;
            all.extend(
                page.delegations
                    .into_iter()
                    .filter(|d| !known.contains(&d.staking_tx_hash_hex)),
            );
            match page.next_key {
                Some(next) => key = Some(next),
                None => break,
            }
        }

        log::debug!("Fetched {} delegations for {}", all.len(), staker_pk_hex);
        Ok(all)
    }
}
