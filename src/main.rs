//! # Staking CLI
//!
//! Command-line front end for the staking client. Wallet keys and endpoints
//! are read from the environment (see [`Settings::from_env`]); every command
//! talks to the staking API, a Bitcoin backend and, for delegation
//! registration, a BBN LCD endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Check the staking API is reachable from here
//! staking health
//!
//! # Stake 0.001 BTC for 150 blocks to one finality provider
//! staking stake --amount 100000 --timelock 150 --fp <fp_btc_pk_hex>
//!
//! # Merged view of API and locally pending delegations
//! staking delegations
//!
//! # Unbond early, then withdraw once the unbonding time has passed
//! staking unbond <staking_txid>
//! staking withdraw <staking_txid>
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` to follow each
//! step of a flow.

use anyhow::{anyhow, Context, Result};
use btc_staking_client::config::Settings;
use btc_staking_client::delegations::{DelegationState, DelegationTracker, JsonFileStore};
use btc_staking_client::flow::{
    phase1_transition_params, submit_unbonding, submit_withdrawal, SigningStep, StakingFlow,
};
use btc_staking_client::services::{ChainBackend, DelegationApi, HealthStatus, StakingApiClient};
use btc_staking_client::staking::{parse_x_only, utxo::filter_spendable, SigningContext, StakerInfo};
use btc_staking_client::utils::{address, amount, time, txid};
use btc_staking_client::wallet::{
    connect_babylon, connect_btc, BabylonWallet, BtcConnector, BtcWallet, BABYLON_CONNECTORS,
    BTC_CONNECTORS,
};
use btc_staking_client::ExplorerClient;
use bitcoin::XOnlyPublicKey;
use chrono::Utc;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "staking")]
#[command(about = "Bitcoin staking client with cross-chain delegation registration")]
struct Cli {
    /// BTC wallet connector
    #[arg(long, global = true, default_value = "local")]
    btc_wallet: String,
    /// BBN wallet connector
    #[arg(long, global = true, default_value = "local")]
    bbn_wallet: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the staking API is reachable (and not geo-blocked)
    Health,
    /// Show the staking parameter versions
    Params,
    /// List finality providers
    FinalityProviders,
    /// List wallet connectors
    Connectors,
    /// Show the staker's delegations, API and local records merged
    Delegations,
    /// Create a delegation and broadcast its staking transaction
    Stake {
        /// Amount to stake in satoshis
        #[arg(short, long)]
        amount: u64,
        /// Staking term in blocks (ignored for fixed-term parameters)
        #[arg(short, long)]
        timelock: u16,
        /// Finality provider BTC public key(s), hex
        #[arg(long = "fp", required = true)]
        finality_providers: Vec<String>,
        /// Fee rate in sat/vB (defaults to the wallet's hour estimate)
        #[arg(long)]
        fee_rate: Option<u64>,
    },
    /// Register an already-confirmed phase-1 staking transaction
    Expand {
        /// Staking transaction id
        staking_txid: String,
        /// Staking term the transaction was created with (defaults to the
        /// phase-1 record's)
        #[arg(short, long)]
        timelock: Option<u16>,
        /// Finality provider BTC public key(s), hex (defaults to the phase-1
        /// record's)
        #[arg(long = "fp")]
        finality_providers: Vec<String>,
    },
    /// Unbond an active delegation early
    Unbond {
        /// Staking transaction id
        staking_txid: String,
    },
    /// Withdraw an expired, unbonded or slashed delegation
    Withdraw {
        /// Staking transaction id
        staking_txid: String,
        /// Fee rate in sat/vB (defaults to the wallet's hour estimate)
        #[arg(long)]
        fee_rate: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;

    match cli.command {
        Commands::Health => health(&settings).await?,
        Commands::Params => show_params(&settings).await?,
        Commands::FinalityProviders => finality_providers(&settings).await?,
        Commands::Connectors => {
            println!("BTC wallets: {}", BTC_CONNECTORS.join(", "));
            println!("BBN wallets: {}", BABYLON_CONNECTORS.join(", "));
        }
        Commands::Delegations => delegations(&settings, &cli.btc_wallet).await?,
        Commands::Stake {
            amount,
            timelock,
            finality_providers,
            fee_rate,
        } => {
            stake(
                &settings,
                &cli.btc_wallet,
                &cli.bbn_wallet,
                amount,
                timelock,
                &finality_providers,
                fee_rate,
            )
            .await?
        }
        Commands::Expand {
            staking_txid,
            timelock,
            finality_providers,
        } => {
            expand(
                &settings,
                &cli.btc_wallet,
                &cli.bbn_wallet,
                &staking_txid,
                timelock,
                &finality_providers,
            )
            .await?
        }
        Commands::Unbond { staking_txid } => unbond(&settings, &cli.btc_wallet, &staking_txid).await?,
        Commands::Withdraw { staking_txid, fee_rate } => {
            withdraw(&settings, &cli.btc_wallet, &staking_txid, fee_rate).await?
        }
    }

    Ok(())
}

async fn health(settings: &Settings) -> Result<()> {
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    match api.health_check().await {
        HealthStatus::Normal => println!("✅ Staking API is healthy"),
        HealthStatus::GeoBlocked => println!("🚫 Staking is not available in your region"),
        HealthStatus::Error(message) => println!("❌ Staking API error: {}", message),
    }
    Ok(())
}

async fn show_params(settings: &Settings) -> Result<()> {
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    let params = api.network_params().await?;

    for version in params.versions() {
        println!("📋 Version {} (from height {})", version.version, version.btc_activation_height);
        println!(
            "  Staking value: {} - {}",
            amount::format_dual(version.min_staking_value_sat),
            amount::format_dual(version.max_staking_value_sat)
        );
        println!(
            "  Staking term:  {} - {} blocks",
            version.min_staking_time_blocks, version.max_staking_time_blocks
        );
        println!(
            "  Covenants:     {} of {}",
            version.covenant_quorum,
            version.covenant_pks.len()
        );
        println!(
            "  Unbonding:     {} blocks, fee {} sats",
            version.unbonding_time_blocks, version.unbonding_fee_sat
        );
        println!("  Max FPs:       {}", version.max_finality_providers);
    }
    Ok(())
}

async fn finality_providers(settings: &Settings) -> Result<()> {
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    for fp in api.finality_providers().await? {
        println!("{}  {:<24} commission {}  {}", fp.btc_pk, fp.moniker, fp.commission, fp.state);
    }
    Ok(())
}

/// The connected BTC wallet and the staker identity it reports
async fn staker(settings: &Settings, connector: &str) -> Result<(BtcConnector, StakerInfo)> {
    let btc = connect_btc(connector, settings)?;
    let staker = StakerInfo::new(
        &btc.get_address().await?,
        &btc.get_public_key_hex().await?,
        settings.network,
    )?;
    Ok((btc, staker))
}

fn tracker(
    settings: &Settings,
    api: StakingApiClient,
    staker: &StakerInfo,
) -> Result<DelegationTracker<JsonFileStore, StakingApiClient, ChainBackend>> {
    Ok(DelegationTracker::new(
        JsonFileStore::new(settings.store_dir.clone()),
        api,
        ChainBackend::from_settings(settings)?,
        staker.public_key_hex(),
    ))
}

fn parse_finality_providers(raw: &[String]) -> Result<Vec<XOnlyPublicKey>> {
    raw.iter()
        .map(|pk| parse_x_only(pk).with_context(|| format!("Invalid finality provider key {}", pk)))
        .collect()
}

fn log_step(step: SigningStep) {
    if step.requires_signature() {
        println!("✍️  {}", step);
    } else {
        println!("⏳ {}", step);
    }
}

async fn delegations(settings: &Settings, connector: &str) -> Result<()> {
    let (btc, staker) = staker(settings, connector).await?;
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    let tracker = tracker(settings, api, &staker)?;

    let merged = tracker.sync(Utc::now()).await?;
    if merged.is_empty() {
        println!("No delegations for {}", address::format_short(&staker.address.to_string()));
        return Ok(());
    }
    let tip = btc.get_btc_tip_height().await?;
    for delegation in merged {
        let remaining = if delegation.start_height > 0 && delegation.state == DelegationState::Active {
            format!(
                ", {} blocks left",
                time::blocks_remaining(tip, delegation.start_height, delegation.timelock)
            )
        } else {
            String::new()
        };
        println!(
            "{}  {}  {} blocks{}  {}",
            txid::format_short(&delegation.staking_tx_hash_hex),
            amount::format_dual(delegation.amount_sat),
            delegation.timelock,
            remaining,
            delegation.state
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn stake(
    settings: &Settings,
    btc_connector: &str,
    bbn_connector: &str,
    amount_sat: u64,
    timelock: u16,
    finality_providers: &[String],
    fee_rate: Option<u64>,
) -> Result<()> {
    let (btc, staker) = staker(settings, btc_connector).await?;
    let bbn = connect_babylon(bbn_connector, settings)?;
    let api = StakingApiClient::new(&settings.staking_api_url)?;

    let params_set = api.network_params().await?;
    let tip = btc.get_btc_tip_height().await?;
    let params = params_set
        .resolve_by_height(tip + 1)
        .ok_or_else(|| anyhow!("No staking parameters active at height {}", tip + 1))?
        .clone();

    let address = staker.address.to_string();
    let utxos = btc.get_utxos(&address, None).await?;
    let inscribed = api.inscribed_utxos(&utxos, &address).await?;
    let utxos = filter_spendable(utxos, &inscribed);
    let fee_rate = match fee_rate {
        Some(rate) => rate,
        None => btc.get_network_fees().await?.hour,
    };

    let context = SigningContext {
        staker: staker.clone(),
        utxos,
        fee_rate,
        params,
        finality_provider_pks: parse_finality_providers(finality_providers)?,
        network: settings.network,
        bbn_address: bbn.address().await?,
    };
    let tracker = tracker(settings, api, &staker)?;

    println!(
        "Staking {} for {} blocks at {} sat/vB",
        amount::format_dual(amount_sat),
        timelock,
        fee_rate
    );
    let mut flow = StakingFlow::new(&btc, &bbn, &tracker, context, amount_sat, timelock, log_step)?;
    let staking_txid = flow.run().await?;

    println!("✅ Staking transaction broadcast: {}", staking_txid);
    if let Some(hash) = flow.bbn_tx_hash() {
        println!("   Delegation registered in BBN tx {}", hash);
    }
    Ok(())
}

async fn expand(
    settings: &Settings,
    btc_connector: &str,
    bbn_connector: &str,
    staking_txid: &str,
    timelock: Option<u16>,
    finality_providers: &[String],
) -> Result<()> {
    txid::validate(staking_txid)?;
    let (btc, staker) = staker(settings, btc_connector).await?;
    let bbn = connect_babylon(bbn_connector, settings)?;
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    let explorer = ExplorerClient::new(&settings.explorer_api_url)?;

    let delegation = api
        .v1_delegation(&staker.public_key_hex(), staking_txid)
        .await?
        .ok_or_else(|| anyhow!("Phase-1 delegation {} not found", staking_txid))?;
    let timelock = timelock.unwrap_or(delegation.timelock);
    let finality_providers = if finality_providers.is_empty() {
        delegation.finality_provider_pks_hex.clone()
    } else {
        finality_providers.to_vec()
    };

    let params_set = api.network_params().await?;
    let tip = btc.get_btc_tip_height().await?;
    let params = phase1_transition_params(&params_set, &delegation, tip)?.clone();

    let staking_tx = bitcoin::consensus::deserialize(&hex::decode(explorer.get_tx_hex(staking_txid).await?)?)?;
    let proof = explorer.inclusion_proof(staking_txid).await?;

    let context = SigningContext {
        staker: staker.clone(),
        utxos: Vec::new(),
        fee_rate: 1,
        params,
        finality_provider_pks: parse_finality_providers(&finality_providers)?,
        network: settings.network,
        bbn_address: bbn.address().await?,
    };
    let tracker = tracker(settings, api, &staker)?;

    let mut flow = StakingFlow::expand_phase1_delegation(
        &btc, &bbn, &tracker, context, staking_tx, timelock, proof, log_step,
    )?;
    flow.run().await?;
    println!("✅ Phase-1 delegation {} registered", staking_txid);
    Ok(())
}

async fn unbond(settings: &Settings, connector: &str, staking_txid: &str) -> Result<()> {
    txid::validate(staking_txid)?;
    let (btc, staker) = staker(settings, connector).await?;
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    let params = api.network_params().await?;
    let delegation = api
        .delegation(staking_txid)
        .await?
        .ok_or_else(|| anyhow!("Delegation {} not found", staking_txid))?;
    let tracker = tracker(settings, api, &staker)?;

    let unbonding_txid = submit_unbonding(&btc, &tracker, &params, &delegation).await?;
    println!("✅ Unbonding transaction broadcast: {}", unbonding_txid);
    Ok(())
}

async fn withdraw(settings: &Settings, connector: &str, staking_txid: &str, fee_rate: Option<u64>) -> Result<()> {
    txid::validate(staking_txid)?;
    let (btc, staker) = staker(settings, connector).await?;
    let api = StakingApiClient::new(&settings.staking_api_url)?;
    let params = api.network_params().await?;
    let delegation = api
        .delegation(staking_txid)
        .await?
        .ok_or_else(|| anyhow!("Delegation {} not found", staking_txid))?;
    let fee_rate = match fee_rate {
        Some(rate) => rate,
        None => btc.get_network_fees().await?.hour,
    };
    let tracker = tracker(settings, api, &staker)?;

    let withdrawal_txid =
        submit_withdrawal(&btc, &tracker, &params, &delegation, settings.network, fee_rate).await?;
    println!("✅ Withdrawal transaction broadcast: {}", withdrawal_txid);
    Ok(())
}
