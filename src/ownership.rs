//! Ownership handover of deployed contracts.
//!
//! `transfer_all` walks the successful deployments in order and calls
//! `transferOwnership(newOwner)` on each, skipping networks already
//! transferred in this session. `accept_ownership` is the receiving side of a
//! two-step handover: it checks `pendingOwner()` against the signer before
//! calling `acceptOwnership()`.

use alloy::primitives::{Address, TxHash};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

use crate::admin::AdminClient;
use crate::chain::DeployError;
use crate::contract;
use crate::deploy::{DeploymentRecord, DeploymentStatus};
use crate::errors;

const TRANSFER_ERROR_MAX_LEN: usize = 100;
const ACCEPT_ERROR_MAX_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Idle,
    Switching,
    Transferring,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub status: TransferStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

impl TransferState {
    fn with_status(status: TransferStatus) -> Self {
        Self {
            status,
            tx_hash: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptStatus {
    Idle,
    Switching,
    Checking,
    Accepting,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptState {
    pub network_id: Option<u64>,
    pub status: AcceptStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

type TransferStates = Arc<BTreeMap<u64, TransferState>>;

pub struct OwnershipTransfer {
    admin: AdminClient,
    transfers: watch::Sender<TransferStates>,
    accept: watch::Sender<AcceptState>,
    run_lock: Mutex<()>,
}

impl OwnershipTransfer {
    pub fn new(admin: AdminClient) -> Self {
        let (transfers, _) = watch::channel(Arc::new(BTreeMap::new()));
        let (accept, _) = watch::channel(AcceptState {
            network_id: None,
            status: AcceptStatus::Idle,
            tx_hash: None,
            error: None,
        });
        Self {
            admin,
            transfers,
            accept,
            run_lock: Mutex::new(()),
        }
    }

    pub fn watch_transfers(&self) -> watch::Receiver<TransferStates> {
        self.transfers.subscribe()
    }

    pub fn watch_accept(&self) -> watch::Receiver<AcceptState> {
        self.accept.subscribe()
    }

    /// Current state for `network_id`; `Idle` when never attempted.
    pub fn state(&self, network_id: u64) -> TransferState {
        self.transfers
            .borrow()
            .get(&network_id)
            .cloned()
            .unwrap_or_else(|| TransferState::with_status(TransferStatus::Idle))
    }

    fn set_state(&self, network_id: u64, state: TransferState) {
        self.transfers.send_modify(|states| {
            let mut next = states.as_ref().clone();
            next.insert(network_id, state);
            *states = Arc::new(next);
        });
    }

    /// Transfer every successful deployment in `records` to `new_owner`, in order.
    pub async fn transfer_all(
        &self,
        records: &[DeploymentRecord],
        new_owner: Address,
    ) -> Result<BTreeMap<u64, TransferState>, DeployError> {
        validate_new_owner(new_owner)?;
        let _run = self.run_lock.try_lock().map_err(|_| DeployError::RunInProgress)?;

        for record in records.iter().filter(|r| r.status == DeploymentStatus::Success) {
            let Some(contract) = record.address else {
                continue;
            };
            if self.state(record.network_id).status == TransferStatus::Success {
                tracing::debug!(network_id = record.network_id, "Ownership already transferred, skipping");
                continue;
            }
            self.transfer_on(record.network_id, contract, new_owner).await;
        }
        Ok(self.transfers.borrow().as_ref().clone())
    }

    /// Transfer ownership of a single deployment.
    pub async fn transfer_one(&self, record: &DeploymentRecord, new_owner: Address) -> Result<TransferState, DeployError> {
        validate_new_owner(new_owner)?;
        let contract = record.address.ok_or_else(|| {
            DeployError::InvalidInput(format!("no deployed contract on chain {}", record.network_id))
        })?;
        let _run = self.run_lock.try_lock().map_err(|_| DeployError::RunInProgress)?;
        Ok(self.transfer_on(record.network_id, contract, new_owner).await)
    }

    async fn transfer_on(&self, network_id: u64, contract: Address, new_owner: Address) -> TransferState {
        self.set_state(network_id, TransferState::with_status(TransferStatus::Switching));

        let result = async {
            self.admin.switch_to(network_id).await?;
            self.set_state(network_id, TransferState::with_status(TransferStatus::Transferring));
            self.admin
                .write_and_confirm(network_id, contract, contract::transfer_ownership(new_owner))
                .await
        }
        .await;

        let state = match result {
            Ok(tx_hash) => {
                tracing::info!(network_id, %contract, %new_owner, %tx_hash, "Ownership transferred");
                TransferState {
                    status: TransferStatus::Success,
                    tx_hash: Some(tx_hash),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(network_id, %contract, error = %e, "Ownership transfer failed");
                TransferState {
                    status: TransferStatus::Failed,
                    tx_hash: None,
                    error: Some(errors::truncate(&e.to_string(), TRANSFER_ERROR_MAX_LEN)),
                }
            }
        };
        self.set_state(network_id, state.clone());
        state
    }

    /// Accept a pending ownership handover of `contract` on `network_id`.
    pub async fn accept_ownership(&self, network_id: u64, contract: Address) -> Result<TxHash, DeployError> {
        let _run = self.run_lock.try_lock().map_err(|_| DeployError::RunInProgress)?;
        let set = |status: AcceptStatus, tx_hash: Option<TxHash>, error: Option<String>| {
            self.accept.send_replace(AcceptState {
                network_id: Some(network_id),
                status,
                tx_hash,
                error,
            });
        };

        set(AcceptStatus::Switching, None, None);
        let result = async {
            self.admin.switch_to(network_id).await?;

            set(AcceptStatus::Checking, None, None);
            let raw = self.admin.read(network_id, contract, contract::pending_owner()).await?;
            let pending = contract::decode_pending_owner(&raw)?;
            let me = self.admin.signer_address();
            if pending != me {
                return Err(DeployError::InvalidInput(format!(
                    "Connected wallet is not the pending owner. Pending owner: {pending}"
                )));
            }

            set(AcceptStatus::Accepting, None, None);
            self.admin
                .write_and_confirm(network_id, contract, contract::accept_ownership())
                .await
        }
        .await;

        match result {
            Ok(tx_hash) => {
                tracing::info!(network_id, %contract, %tx_hash, "Ownership accepted");
                set(AcceptStatus::Success, Some(tx_hash), None);
                Ok(tx_hash)
            }
            Err(e) => {
                tracing::error!(network_id, %contract, error = %e, "Accepting ownership failed");
                set(
                    AcceptStatus::Failed,
                    None,
                    Some(errors::truncate(&e.to_string(), ACCEPT_ERROR_MAX_LEN)),
                );
                Err(e)
            }
        }
    }
}

fn validate_new_owner(new_owner: Address) -> Result<(), DeployError> {
    if new_owner.is_zero() {
        return Err(DeployError::InvalidInput("new owner must not be the zero address".to_string()));
    }
    Ok(())
}
