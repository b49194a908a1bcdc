//! Ordered endpoint fallback for one logical RPC call.
//!
//! Tries a network's endpoints in strict catalog order and returns the first
//! success. Any failure (connect, timeout, JSON-RPC error) moves on to the next
//! endpoint. Attempts are sequential, never raced.
//!
//! No backoff happens here: when every endpoint fails, the last error is
//! returned and the caller decides whether to retry the whole operation.
//! The caller's cancellation token is checked before every attempt.

use alloy::primitives::TxHash;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainClient, ClientFactory, DeployError, Receipt};
use crate::network::NetworkCatalog;

#[derive(Clone)]
pub struct FallbackTransport {
    catalog: Arc<NetworkCatalog>,
    factory: Arc<dyn ClientFactory>,
}

impl FallbackTransport {
    pub fn new(catalog: Arc<NetworkCatalog>, factory: Arc<dyn ClientFactory>) -> Self {
        Self { catalog, factory }
    }

    pub fn catalog(&self) -> &Arc<NetworkCatalog> {
        &self.catalog
    }

    /// Run `op` against each endpoint of `network_id` until one succeeds.
    ///
    /// Fails with [`DeployError::Aborted`] if `cancel` is set before an attempt,
    /// with the last endpoint error when all endpoints fail, and with
    /// [`DeployError::AllEndpointsFailed`] when there was nothing to try.
    pub async fn call_with_fallback<T, F, Fut>(
        &self,
        network_id: u64,
        cancel: Option<&CancellationToken>,
        op: F,
    ) -> Result<T, DeployError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        self.call_with_failover(network_id, cancel, op, |_| true).await
    }

    /// Wait for `tx_hash` until `started + timeout`, one deadline shared by
    /// every endpoint.
    ///
    /// Endpoint errors move on to the next endpoint. A receipt timeout ends
    /// the wait without trying the remaining endpoints.
    pub async fn wait_for_receipt(
        &self,
        network_id: u64,
        tx_hash: TxHash,
        poll_interval: Duration,
        timeout: Duration,
        started: Instant,
    ) -> Result<Receipt, DeployError> {
        let deadline = started + timeout;
        let timed_out = DeployError::ReceiptTimeout {
            tx_hash,
            seconds: timeout.as_secs(),
        };
        self.call_with_failover(
            network_id,
            None,
            |client| {
                let timed_out = timed_out.clone();
                async move {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(timed_out);
                    }
                    client.wait_for_transaction_receipt(tx_hash, poll_interval, remaining).await
                }
            },
            |e| !matches!(e, DeployError::ReceiptTimeout { .. }),
        )
        .await
        .map_err(|e| match e {
            DeployError::ReceiptTimeout { .. } => timed_out,
            other => other,
        })
    }

    async fn call_with_failover<T, F, Fut>(
        &self,
        network_id: u64,
        cancel: Option<&CancellationToken>,
        mut op: F,
        fail_over: impl Fn(&DeployError) -> bool,
    ) -> Result<T, DeployError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let network = self.catalog.require(network_id)?;
        let mut last_error: Option<DeployError> = None;

        for (i, url) in network.rpc_urls.iter().enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                tracing::debug!(network_id, endpoint = i, "Call cancelled before attempt");
                return Err(DeployError::Aborted);
            }

            let client = match self.factory.connect(url) {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(network_id, endpoint = i, url = %url, error = %e, "Client build failed, trying next");
                    last_error = Some(e);
                    continue;
                }
            };

            match op(client).await {
                Ok(value) => {
                    if i > 0 {
                        tracing::debug!(network_id, endpoint = i, url = %url, "Served by fallback endpoint");
                    }
                    return Ok(value);
                }
                Err(e) if fail_over(&e) => {
                    tracing::warn!(network_id, endpoint = i, url = %url, error = %e, "Endpoint error, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(DeployError::AllEndpointsFailed(network_id)))
    }
}
