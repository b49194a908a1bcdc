//! alloy-backed implementations of the chain seams.
//!
//! [`EvmClientFactory`] hands out read-only [`EvmChainClient`]s, one per
//! endpoint URL, all sharing a single pooled reqwest client. [`WalletSigner`]
//! wraps a local private key and keeps exactly one wallet provider, rebuilt
//! whenever the active chain changes.

use alloy::hex;
use alloy::network::{Ethereum, EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::Http;
use alloy::transports::http::reqwest::{Client, Url};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::chain::{ChainClient, ClientFactory, DeployError, Receipt, Signer};
use crate::network::NetworkCatalog;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn http_client(request_timeout: Duration) -> Result<Client, DeployError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| DeployError::Config(format!("failed to build HTTP client: {e}")))
}

fn parse_url(url: &str) -> Result<Url, DeployError> {
    url.parse::<Url>()
        .map_err(|e| DeployError::Config(format!("invalid RPC url {url}: {e}")))
}

fn root_provider(http: Client, url: Url) -> RootProvider<Ethereum> {
    RootProvider::<Ethereum>::new(RpcClient::new(Http::with_client(http, url), false))
}

pub struct EvmClientFactory {
    http: Client,
}

impl EvmClientFactory {
    pub fn new(request_timeout: Duration) -> Result<Self, DeployError> {
        Ok(Self {
            http: http_client(request_timeout)?,
        })
    }
}

impl ClientFactory for EvmClientFactory {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, DeployError> {
        let parsed = parse_url(url)?;
        Ok(Arc::new(EvmChainClient {
            endpoint: url.to_string(),
            provider: root_provider(self.http.clone(), parsed),
        }))
    }
}

pub struct EvmChainClient {
    endpoint: String,
    provider: RootProvider<Ethereum>,
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_balance(&self, address: Address) -> Result<U256, DeployError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| categorize_transport_error(e, "eth_getBalance"))
    }

    async fn get_gas_price(&self) -> Result<u128, DeployError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| categorize_transport_error(e, "eth_gasPrice"))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider
            .call(tx)
            .await
            .map_err(|e| categorize_transport_error(e, "eth_call"))
    }

    async fn wait_for_transaction_receipt(
        &self,
        hash: TxHash,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Receipt, DeployError> {
        let started = tokio::time::Instant::now();
        loop {
            let found = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| categorize_transport_error(e, "eth_getTransactionReceipt"))?;
            if let Some(receipt) = found {
                tracing::info!(
                    endpoint = %self.endpoint,
                    tx_hash = %hash,
                    success = receipt.status(),
                    receipt_wait_ms = started.elapsed().as_millis() as u64,
                    "Transaction confirmed"
                );
                return Ok(Receipt {
                    transaction_hash: receipt.transaction_hash,
                    contract_address: receipt.contract_address,
                    success: receipt.status(),
                });
            }
            if started.elapsed() + poll_interval > timeout {
                tracing::warn!(endpoint = %self.endpoint, tx_hash = %hash, "Receipt wait timed out");
                return Err(DeployError::ReceiptTimeout {
                    tx_hash: hash,
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

struct ActiveChain {
    network_id: u64,
    url: String,
    provider: DynProvider<Ethereum>,
}

/// Local-key signer that submits on whichever chain it was last switched to.
pub struct WalletSigner {
    address: Address,
    wallet: EthereumWallet,
    catalog: Arc<NetworkCatalog>,
    http: Client,
    active: RwLock<Option<ActiveChain>>,
}

impl WalletSigner {
    pub fn new(private_key: &str, catalog: Arc<NetworkCatalog>, request_timeout: Duration) -> Result<Self, DeployError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|_| DeployError::Config("private key is not a valid 32-byte hex string".to_string()))?;
        let address = signer.address();
        Ok(Self {
            address,
            wallet: EthereumWallet::from(signer),
            catalog,
            http: http_client(request_timeout)?,
            active: RwLock::new(None),
        })
    }

    async fn send(&self, tx: TransactionRequest, context: &str) -> Result<(u64, TxHash), DeployError> {
        let guard = self.active.read().await;
        let active = guard
            .as_ref()
            .ok_or_else(|| DeployError::Signer("no active chain, switch network first".to_string()))?;
        let pending = active
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| categorize_transport_error(e, context))?;
        Ok((active.network_id, *pending.tx_hash()))
    }
}

#[async_trait]
impl Signer for WalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    /// Picks the first endpoint in catalog order that answers with the
    /// expected chain id and binds the wallet provider to it.
    async fn switch_network(&self, network_id: u64) -> Result<(), DeployError> {
        let network = self.catalog.require(network_id)?;
        if self.active_network().await == Some(network_id) {
            return Ok(());
        }

        let mut last_error = None;
        for (i, url) in network.rpc_urls.iter().enumerate() {
            let parsed = match parse_url(url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let probe = root_provider(self.http.clone(), parsed.clone());
            match probe.get_chain_id().await {
                Ok(id) if id == network_id => {
                    let client = RpcClient::new(Http::with_client(self.http.clone(), parsed), false);
                    let provider = ProviderBuilder::new()
                        .wallet(self.wallet.clone())
                        .connect_client(client)
                        .erased();
                    tracing::info!(network = %network, url = %url, endpoint = i, "Signer attached");
                    *self.active.write().await = Some(ActiveChain {
                        network_id,
                        url: url.clone(),
                        provider,
                    });
                    return Ok(());
                }
                Ok(id) => {
                    tracing::error!(url = %url, expected = network_id, got = id, "RPC #{i} chainId mismatch, skipped");
                    last_error = Some(DeployError::Rpc(format!(
                        "endpoint {url} reports chain {id}, expected {network_id}"
                    )));
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "RPC #{i} unreachable, skipped");
                    last_error = Some(categorize_transport_error(e, "eth_chainId"));
                }
            }
        }
        Err(last_error.unwrap_or(DeployError::AllEndpointsFailed(network_id)))
    }

    async fn active_network(&self) -> Option<u64> {
        self.active.read().await.as_ref().map(|a| a.network_id)
    }

    async fn deploy_contract(&self, bytecode: Bytes) -> Result<TxHash, DeployError> {
        let tx = TransactionRequest::default().with_deploy_code(bytecode);
        let (network_id, tx_hash) = self.send(tx, "deploy").await?;
        tracing::info!(network_id, %tx_hash, "Deployment transaction sent");
        Ok(tx_hash)
    }

    async fn write_contract(&self, to: Address, calldata: Bytes) -> Result<TxHash, DeployError> {
        let tx = TransactionRequest::default().with_to(to).with_input(calldata);
        let (network_id, tx_hash) = self.send(tx, "write").await?;
        tracing::info!(network_id, %to, %tx_hash, "Transaction sent");
        Ok(tx_hash)
    }
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.address)
            .field("active", &self.active.try_read().ok().and_then(|a| a.as_ref().map(|a| a.url.clone())))
            .finish_non_exhaustive()
    }
}

/// Decode `Error(string)` and `Panic(uint256)` revert payloads.
fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data)).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    match bytes[..4] {
        [0x08, 0xc3, 0x79, 0xa0] if bytes.len() >= 68 => {
            let len = bytes[36..68]
                .iter()
                .fold(0usize, |acc, &b| acc.saturating_mul(256).saturating_add(b as usize));
            let end = 68usize.checked_add(len).filter(|end| *end <= bytes.len() && len <= 1024)?;
            String::from_utf8(bytes[68..end].to_vec()).ok()
        }
        [0x4e, 0x48, 0x7b, 0x71] if bytes.len() >= 36 => Some(format!("Panic(0x{:02x})", bytes[35])),
        _ => Some(format!("UnknownError(0x{})", hex::encode(&bytes[..4]))),
    }
}

/// Pull the revert payload out of a debug-formatted JSON-RPC error.
fn extract_revert(err_str: &str) -> Option<String> {
    for marker in ["data: Some(RawValue(\"", "data: Some(RawValue(\\\""] {
        if let Some(idx) = err_str.find(marker) {
            let rest = &err_str[idx + marker.len()..];
            let end = rest.find(|c: char| !(c.is_ascii_hexdigit() || c == 'x' || c == 'X'))?;
            if let Some(reason) = decode_revert_reason(&rest[..end]) {
                return Some(reason);
            }
        }
    }
    None
}

/// Map an alloy transport error to a [`DeployError`].
///
/// The transport's own wording is kept so that retry classification still sees
/// `timeout`, `429` and the like. Reverts are reduced to their decoded reason.
fn categorize_transport_error(e: impl std::fmt::Debug + std::fmt::Display, context: &str) -> DeployError {
    let err_str = format!("{e:?}");

    if let Some(reason) = extract_revert(&err_str) {
        tracing::error!("{context}: execution reverted: {reason}");
        return DeployError::Rpc(format!("{context}: execution reverted: {reason}"));
    }

    if err_str.contains("Too many open files") || err_str.contains("EMFILE") {
        tracing::error!("{context}: file descriptor exhaustion: {err_str}");
        return DeployError::Rpc(format!("{context}: connection pool exhausted"));
    }

    let message = e.to_string();
    tracing::debug!("{context}: {err_str}");
    DeployError::Rpc(format!("{context}: {message}"))
}
