//! Staggered multi-chain balance and gas probing.
//!
//! A probing session fetches, for every requested network, the account's
//! native balance and the current gas price, and derives the minimum balance a
//! deployment needs there. Networks are processed in consecutive chunks of
//! `concurrency`: every probe in a chunk runs concurrently, and the next chunk
//! starts only after all of them settled. This bounds outbound requests
//! without serializing everything.
//!
//! State is published as an immutable snapshot through a `watch` channel, one
//! [`BalanceProbe`] per requested network in request order. Every update
//! replaces the whole snapshot.
//!
//! Starting a session cancels the previous one. A cancelled session's late
//! results are dropped: the cancellation check and the write happen under the
//! channel's lock, and the new session resets the snapshot only after
//! cancelling, so a stale write can never land after the reset.

use alloy::primitives::{Address, U256};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::errors;
use crate::network::NetworkDescriptor;
use crate::transport::FallbackTransport;

/// Display precision of [`format_balance`].
const DISPLAY_DECIMALS: u8 = 4;
const PROBE_ERROR_MAX_LEN: usize = 100;

/// Live state of one network within a probing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceProbe {
    pub network_id: u64,
    /// Smallest-unit balance, absent until fetched or when fetching failed.
    pub balance: Option<U256>,
    pub symbol: String,
    pub decimals: u8,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Minimum balance needed to deploy, absent until computed.
    pub min_balance: Option<U256>,
}

impl BalanceProbe {
    fn loading(network: &NetworkDescriptor) -> Self {
        Self {
            network_id: network.id,
            balance: None,
            symbol: network.symbol.clone(),
            decimals: network.decimals,
            is_loading: true,
            error: None,
            min_balance: None,
        }
    }

    fn unknown(network_id: u64) -> Self {
        Self {
            network_id,
            balance: None,
            symbol: "ETH".to_string(),
            decimals: 18,
            is_loading: false,
            error: Some(format!("No RPC configured for chain {network_id}")),
            min_balance: None,
        }
    }

    pub fn has_enough_balance(&self) -> bool {
        has_enough_balance(self.balance, self.min_balance)
    }

    pub fn formatted_balance(&self) -> Option<String> {
        format_balance(self.balance, self.decimals)
    }
}

/// Session options.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Chunk size; `0` is treated as `1`.
    pub concurrency: usize,
    /// When `false` the snapshot is cleared and nothing is fetched.
    pub enabled: bool,
    pub deploy_gas_estimate: u64,
    pub gas_buffer: f64,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions::from(&ProbeConfig::default())
    }
}

impl From<&ProbeConfig> for ProbeOptions {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            enabled: true,
            deploy_gas_estimate: config.deploy_gas_estimate,
            gas_buffer: config.gas_buffer,
        }
    }
}

type Snapshot = Arc<Vec<BalanceProbe>>;

pub struct BalanceProber {
    transport: FallbackTransport,
    state: Arc<watch::Sender<Snapshot>>,
    session: Mutex<Option<CancellationToken>>,
}

impl BalanceProber {
    pub fn new(transport: FallbackTransport) -> Self {
        let (state, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            transport,
            state: Arc::new(state),
            session: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.state.borrow())
    }

    /// Cancel the in-flight session, if any, without touching the snapshot.
    pub fn cancel(&self) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = session.take() {
            token.cancel();
        }
    }

    /// Start a new probing session for `address` over `network_ids`.
    ///
    /// Any previous session is cancelled first. Returns `None` and clears the
    /// snapshot when `address` is absent, probing is disabled, or there is
    /// nothing to probe.
    pub fn probe(
        &self,
        address: Option<Address>,
        network_ids: &[u64],
        options: ProbeOptions,
    ) -> Option<JoinHandle<()>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = session.take() {
            tracing::debug!("Superseding in-flight balance session");
            previous.cancel();
        }

        let mut ids: Vec<u64> = Vec::with_capacity(network_ids.len());
        for id in network_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }

        let address = match address {
            Some(address) if options.enabled && !ids.is_empty() => address,
            _ => {
                self.state.send_replace(Arc::new(Vec::new()));
                return None;
            }
        };

        let token = CancellationToken::new();
        *session = Some(token.clone());

        let catalog = Arc::clone(self.transport.catalog());
        let mut initial = Vec::with_capacity(ids.len());
        let mut targets = Vec::with_capacity(ids.len());
        for id in &ids {
            match catalog.get(*id) {
                Some(network) => {
                    initial.push(BalanceProbe::loading(network));
                    targets.push(network.clone());
                }
                None => initial.push(BalanceProbe::unknown(*id)),
            }
        }
        self.state.send_replace(Arc::new(initial));

        let chunk_size = options.concurrency.max(1);
        tracing::debug!(%address, networks = targets.len(), chunk_size, "Starting balance session");

        let transport = self.transport.clone();
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            for (n, chunk) in targets.chunks(chunk_size).enumerate() {
                if token.is_cancelled() {
                    tracing::debug!(chunk = n, "Balance session cancelled");
                    return;
                }
                tracing::debug!(chunk = n, size = chunk.len(), "Probing chunk");
                join_all(
                    chunk
                        .iter()
                        .map(|network| probe_network(&transport, &state, &token, address, network, &options)),
                )
                .await;
            }
            tracing::debug!("Balance session complete");
        }))
    }
}

async fn probe_network(
    transport: &FallbackTransport,
    state: &watch::Sender<Snapshot>,
    token: &CancellationToken,
    address: Address,
    network: &NetworkDescriptor,
    options: &ProbeOptions,
) {
    let id = network.id;
    let (balance, gas_price) = tokio::join!(
        transport.call_with_fallback(id, Some(token), |client| async move { client.get_balance(address).await }),
        transport.call_with_fallback(id, Some(token), |client| async move { client.get_gas_price().await }),
    );

    let min_balance = match gas_price {
        Ok(price) => Some(min_deploy_balance(price, options.deploy_gas_estimate, options.gas_buffer)),
        Err(e) => {
            tracing::debug!(network_id = id, error = %e, "Gas price unavailable, using fallback minimum");
            match network.fallback_min_balance() {
                Ok(min) => Some(min),
                Err(e) => {
                    tracing::warn!(network_id = id, error = %e, "No usable minimum balance");
                    None
                }
            }
        }
    };

    let (balance, error) = match balance {
        Ok(balance) => (Some(balance), None),
        Err(e) => {
            tracing::warn!(network_id = id, error = %e, "Balance fetch failed");
            (None, Some(errors::truncate(&e.to_string(), PROBE_ERROR_MAX_LEN)))
        }
    };

    state.send_if_modified(|snapshot| {
        if token.is_cancelled() {
            return false;
        }
        let Some(pos) = snapshot.iter().position(|p| p.network_id == id) else {
            return false;
        };
        let mut next = snapshot.as_ref().clone();
        let entry = &mut next[pos];
        entry.balance = balance;
        entry.error = error;
        entry.min_balance = min_balance;
        entry.is_loading = false;
        *snapshot = Arc::new(next);
        true
    });
}

/// `gas_price * gas_estimate * buffer` in the smallest unit.
///
/// The buffer is applied in thousandths, so `1.2` multiplies by `1200 / 1000`.
pub fn min_deploy_balance(gas_price: u128, gas_estimate: u64, buffer: f64) -> U256 {
    let permille = (buffer * 1000.0).round().max(0.0) as u64;
    U256::from(gas_price) * U256::from(gas_estimate) * U256::from(permille) / U256::from(1000u64)
}

/// Whether `balance` covers `min_balance`.
///
/// An absent balance is never enough; an absent minimum is assumed affordable.
pub fn has_enough_balance(balance: Option<U256>, min_balance: Option<U256>) -> bool {
    match (balance, min_balance) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(balance), Some(min)) => balance >= min,
    }
}

/// Smallest-unit `balance` rendered with four decimals, rounded half up.
pub fn format_balance(balance: Option<U256>, decimals: u8) -> Option<String> {
    let balance = balance?;
    let ten = U256::from(10u64);
    let scaled = if decimals >= DISPLAY_DECIMALS {
        let divisor = ten.pow(U256::from(decimals - DISPLAY_DECIMALS));
        (balance + divisor / U256::from(2u64)) / divisor
    } else {
        balance * ten.pow(U256::from(DISPLAY_DECIMALS - decimals))
    };
    let unit = U256::from(10_000u64);
    let whole = scaled / unit;
    let frac = (scaled % unit).as_limbs()[0];
    Some(format!("{whole}.{frac:04}"))
}
