//! Switch-settle-write-confirm plumbing shared by the post-deploy flows.

use alloy::primitives::{Address, Bytes, TxHash};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{DeployError, Signer};
use crate::config::DeployerConfig;
use crate::transport::FallbackTransport;

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub switch_settle_delay: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl Default for AdminSettings {
    fn default() -> Self {
        AdminSettings::from(&DeployerConfig::default())
    }
}

impl From<&DeployerConfig> for AdminSettings {
    fn from(config: &DeployerConfig) -> Self {
        Self {
            switch_settle_delay: config.deployment.switch_settle_delay(),
            receipt_poll_interval: config.deployment.receipt_poll_interval(),
            receipt_timeout: config.deployment.receipt_timeout(),
        }
    }
}

/// A signer plus read access, driving contract admin calls one chain at a time.
#[derive(Clone)]
pub struct AdminClient {
    signer: Arc<dyn Signer>,
    transport: FallbackTransport,
    settings: AdminSettings,
}

impl AdminClient {
    pub fn new(signer: Arc<dyn Signer>, transport: FallbackTransport, settings: AdminSettings) -> Self {
        Self {
            signer,
            transport,
            settings,
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn transport(&self) -> &FallbackTransport {
        &self.transport
    }

    /// Attach the signer to `network_id` and wait for the switch to settle.
    pub async fn switch_to(&self, network_id: u64) -> Result<(), DeployError> {
        self.transport.catalog().require(network_id)?;
        self.signer.switch_network(network_id).await?;
        if !self.settings.switch_settle_delay.is_zero() {
            tokio::time::sleep(self.settings.switch_settle_delay).await;
        }
        Ok(())
    }

    /// `eth_call` on `network_id` through the fallback transport.
    pub async fn read(&self, network_id: u64, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        self.transport
            .call_with_fallback(network_id, None, |client| {
                let data = data.clone();
                async move { client.call(to, data).await }
            })
            .await
    }

    /// Submit `calldata` to `to` on the active chain and wait for a successful receipt.
    pub async fn write_and_confirm(&self, network_id: u64, to: Address, calldata: Bytes) -> Result<TxHash, DeployError> {
        let tx_hash = self.signer.write_contract(to, calldata).await?;
        tracing::info!(network_id, %to, %tx_hash, "Admin transaction submitted");

        let receipt = self
            .transport
            .wait_for_receipt(
                network_id,
                tx_hash,
                self.settings.receipt_poll_interval,
                self.settings.receipt_timeout,
                tokio::time::Instant::now(),
            )
            .await?;

        if !receipt.success {
            return Err(DeployError::Reverted(tx_hash));
        }
        Ok(tx_hash)
    }
}
