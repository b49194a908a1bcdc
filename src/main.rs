//! BulkSend deployer entrypoint.
//!
//! Probes the deployer's balance on every selected network, deploys the
//! BulkSend contract to the affordable ones in sequence, writes the
//! deployment report and optionally hands ownership to a new owner.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `DEPLOYER_PRIVATE_KEY` signing key (required)
//! - `DEPLOY_NETWORKS` comma-separated chain ids, all mainnets when unset
//! - `NEW_OWNER` transfer ownership after deploying when set
//! - `RPC_URLS_<SLUG>` per-network endpoint override
//! - `CONFIG_FILE` path of the TOML config, `deployer.toml` by default

use alloy::hex;
use alloy::primitives::{Address, Bytes};
use anyhow::{Context, bail};
use dotenvy::dotenv;
use std::path::Path;
use std::sync::Arc;

use bulksend_deployer::admin::{AdminClient, AdminSettings};
use bulksend_deployer::balance::{BalanceProber, ProbeOptions};
use bulksend_deployer::chain::Signer;
use bulksend_deployer::chain::evm::{EvmClientFactory, WalletSigner};
use bulksend_deployer::config::DeployerConfig;
use bulksend_deployer::deploy::{DeploymentSettings, DeploymentStatus, Deployer};
use bulksend_deployer::from_env;
use bulksend_deployer::network::NetworkCatalog;
use bulksend_deployer::ownership::{OwnershipTransfer, TransferStatus};
use bulksend_deployer::report::DeploymentReport;
use bulksend_deployer::telemetry::Telemetry;
use bulksend_deployer::transport::FallbackTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = match DeployerConfig::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            tracing::info!("Using default configuration");
            DeployerConfig::default()
        }
    };

    let catalog = Arc::new(build_catalog(&config));
    let private_key = std::env::var(from_env::ENV_PRIVATE_KEY)
        .with_context(|| format!("{} is not set", from_env::ENV_PRIVATE_KEY))?;
    let request_timeout = config.transport.request_timeout();
    let signer = Arc::new(WalletSigner::new(&private_key, Arc::clone(&catalog), request_timeout)?);
    let factory = Arc::new(EvmClientFactory::new(request_timeout)?);
    let transport = FallbackTransport::new(Arc::clone(&catalog), factory);
    tracing::info!(deployer = %signer.address(), networks = catalog.ids().len(), "Deployer initialized");

    let requested = match std::env::var(from_env::ENV_DEPLOY_NETWORKS) {
        Ok(raw) if !raw.trim().is_empty() => from_env::parse_network_ids(&raw)?,
        _ => catalog.mainnet_ids(),
    };
    for id in &requested {
        catalog.require(*id)?;
    }

    let affordable = probe_affordable(&transport, signer.address(), &requested, &config).await?;
    if affordable.is_empty() {
        bail!("no selected chain has enough balance to deploy");
    }

    let bytecode = read_bytecode(Path::new(&config.deployment.bytecode_path))?;
    let deployer = Deployer::new(
        signer.clone(),
        transport.clone(),
        bytecode,
        DeploymentSettings::from(&config),
    );
    deployer.set_selection(affordable);

    let mut records = deployer.deploy(None).await?;
    for round in 1..=config.deployment.retry_failed_rounds {
        if !records.iter().any(|r| r.status == DeploymentStatus::Failed) {
            break;
        }
        tracing::info!(round, "Retrying failed deployments");
        records = deployer.retry_failed().await?;
    }

    for record in &records {
        match record.status {
            DeploymentStatus::Success => tracing::info!(
                network = %record.network_name,
                address = ?record.address,
                tx_hash = ?record.tx_hash,
                "Deployed"
            ),
            _ => tracing::error!(
                network = %record.network_name,
                error = record.error.as_deref().unwrap_or("unknown"),
                "Deployment failed"
            ),
        }
    }

    let report = DeploymentReport::from_records(&records);
    if report.is_empty() {
        tracing::warn!("No successful deployments, report not written");
    } else {
        report
            .write_to_dir(&config.deployment.report_dir)
            .context("writing deployment report")?;
    }

    if let Ok(raw) = std::env::var(from_env::ENV_NEW_OWNER) {
        let new_owner: Address = raw
            .trim()
            .parse()
            .with_context(|| format!("{} is not an address", from_env::ENV_NEW_OWNER))?;
        let admin = AdminClient::new(signer, transport, AdminSettings::from(&config));
        let states = OwnershipTransfer::new(admin).transfer_all(&records, new_owner).await?;
        for (network_id, state) in states {
            if state.status == TransferStatus::Success {
                tracing::info!(network_id, %new_owner, tx_hash = ?state.tx_hash, "Ownership transferred");
            } else {
                tracing::error!(network_id, error = state.error.as_deref().unwrap_or("unknown"), "Ownership transfer failed");
            }
        }
    }

    Ok(())
}

/// Built-in catalog with TOML overrides, then `RPC_URLS_<SLUG>` on top.
fn build_catalog(config: &DeployerConfig) -> NetworkCatalog {
    let mut catalog = NetworkCatalog::builtin().with_overrides(&config.networks);
    let env_overrides: Vec<(u64, String, Vec<String>)> = catalog
        .iter()
        .filter_map(|n| from_env::rpc_urls(&n.slug()).map(|urls| (n.id, n.slug(), urls)))
        .collect();
    for (id, slug, urls) in env_overrides {
        tracing::info!(network = %slug, endpoints = urls.len(), "Using RPC endpoints from {}", from_env::rpc_urls_var(&slug));
        catalog = catalog.with_rpc_urls(id, urls);
    }
    catalog
}

/// Probe every requested chain and keep the ones the deployer can afford.
async fn probe_affordable(
    transport: &FallbackTransport,
    address: Address,
    requested: &[u64],
    config: &DeployerConfig,
) -> anyhow::Result<Vec<u64>> {
    let prober = BalanceProber::new(transport.clone());
    if let Some(session) = prober.probe(Some(address), requested, ProbeOptions::from(&config.probe)) {
        session.await.context("balance probe task failed")?;
    }

    let catalog = transport.catalog();
    let mut affordable = Vec::with_capacity(requested.len());
    for probe in prober.snapshot().iter() {
        let name = catalog.display_name(probe.network_id);
        if let Some(error) = &probe.error {
            tracing::warn!(network = %name, error = %error, "Balance unavailable, skipping");
            continue;
        }
        let balance = probe.formatted_balance().unwrap_or_else(|| "-".to_string());
        if probe.has_enough_balance() {
            tracing::info!(network = %name, balance = %balance, symbol = %probe.symbol, "Balance OK");
            affordable.push(probe.network_id);
        } else {
            tracing::warn!(
                network = %name,
                balance = %balance,
                symbol = %probe.symbol,
                min_balance = ?probe.min_balance,
                "Insufficient balance, skipping"
            );
        }
    }
    Ok(affordable)
}

fn read_bytecode(path: &Path) -> anyhow::Result<Bytes> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading bytecode from {}", path.display()))?;
    let trimmed = raw.trim();
    let decoded = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .with_context(|| format!("{} is not hex-encoded bytecode", path.display()))?;
    if decoded.is_empty() {
        bail!("bytecode file {} is empty", path.display());
    }
    Ok(Bytes::from(decoded))
}
