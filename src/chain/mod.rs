//! Chain access seams: the error type, the read-only [`ChainClient`], and the
//! transaction-submitting [`Signer`].
//!
//! Everything above this module talks to chains only through these traits. The
//! production implementations over alloy live in [`evm`]; tests substitute
//! in-memory mocks.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod evm;

/// Errors raised by chain access and the flows built on top of it.
///
/// The `Display` text is what [`crate::errors::classify`] inspects, so only
/// variants that wrap a remote failure carry retryable wording.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeployError {
    /// RPC request failed; the message is the transport's own text.
    #[error("RPC error: {0}")]
    Rpc(String),
    /// The signer refused or failed to submit.
    #[error("Signer error: {0}")]
    Signer(String),
    /// The caller's cancellation token was already set.
    #[error("Operation aborted")]
    Aborted,
    #[error("All RPC endpoints failed for chain {0}")]
    AllEndpointsFailed(u64),
    #[error("Unknown chain id {0}")]
    UnknownNetwork(u64),
    #[error("Transaction {0} reverted")]
    Reverted(TxHash),
    #[error("Receipt for {0} has no contract address")]
    MissingContractAddress(TxHash),
    #[error("Timed out waiting for receipt of {tx_hash} after {seconds}s")]
    ReceiptTimeout { tx_hash: TxHash, seconds: u64 },
    #[error("A deployment run is already in progress")]
    RunInProgress,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Subset of a transaction receipt the deploy and admin flows care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    /// Set for contract-creation transactions.
    pub contract_address: Option<Address>,
    /// `false` when the transaction reverted.
    pub success: bool,
}

/// Read access to one chain through a single RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The endpoint this client is bound to.
    fn endpoint(&self) -> &str;

    async fn get_balance(&self, address: Address) -> Result<U256, DeployError>;

    /// Current gas price in wei.
    async fn get_gas_price(&self) -> Result<u128, DeployError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError>;

    /// Poll for `hash` every `poll_interval` until a receipt exists or
    /// `timeout` elapses.
    async fn wait_for_transaction_receipt(
        &self,
        hash: TxHash,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Receipt, DeployError>;
}

/// Builds a [`ChainClient`] bound to exactly one endpoint URL.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, DeployError>;
}

/// A signing capability attached to at most one chain at a time.
///
/// Only one chain can be active, so callers must serialize
/// `switch_network` and the submission that follows it.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    /// Attach to `network_id`. Completes once the signer submits there.
    async fn switch_network(&self, network_id: u64) -> Result<(), DeployError>;

    async fn active_network(&self) -> Option<u64>;

    /// Submit a contract-creation transaction on the active chain.
    async fn deploy_contract(&self, bytecode: Bytes) -> Result<TxHash, DeployError>;

    /// Submit a call to `to` with `calldata` on the active chain.
    async fn write_contract(&self, to: Address, calldata: Bytes) -> Result<TxHash, DeployError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, classify};

    #[test]
    fn only_remote_failures_read_as_retryable() {
        assert_eq!(
            classify(&DeployError::Rpc("error sending request: connection refused".into()).to_string()),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&DeployError::ReceiptTimeout { tx_hash: TxHash::ZERO, seconds: 180 }.to_string()),
            ErrorKind::Network
        );
        assert_eq!(classify(&DeployError::UnknownNetwork(1).to_string()), ErrorKind::Unknown);
        assert_eq!(classify(&DeployError::Config("bad bytecode".into()).to_string()), ErrorKind::Unknown);
        assert_eq!(classify(&DeployError::AllEndpointsFailed(56).to_string()), ErrorKind::Unknown);
        assert_eq!(classify(&DeployError::Reverted(TxHash::ZERO).to_string()), ErrorKind::Unknown);
        assert_eq!(classify(&DeployError::Aborted.to_string()), ErrorKind::Unknown);
    }

    #[test]
    fn signer_rejection_is_not_retried() {
        let err = DeployError::Signer("User rejected the request".into());
        assert_eq!(classify(&err.to_string()), ErrorKind::UserRejected);
    }
}
