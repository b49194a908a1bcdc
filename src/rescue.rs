//! Recovery of assets stuck in a deployed contract.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::Serialize;
use tokio::sync::{Mutex, watch};

use crate::admin::AdminClient;
use crate::chain::DeployError;
use crate::contract;
use crate::errors;

const RESCUE_ERROR_MAX_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescueAsset {
    Native,
    Erc20 { token: Address },
    Erc721 { token: Address, token_id: U256 },
    Erc1155 { token: Address, token_id: U256, amount: U256 },
}

impl RescueAsset {
    pub fn kind(&self) -> &'static str {
        match self {
            RescueAsset::Native => "native",
            RescueAsset::Erc20 { .. } => "erc20",
            RescueAsset::Erc721 { .. } => "erc721",
            RescueAsset::Erc1155 { .. } => "erc1155",
        }
    }

    fn validate(&self) -> Result<(), DeployError> {
        match self {
            RescueAsset::Erc20 { token } | RescueAsset::Erc721 { token, .. } | RescueAsset::Erc1155 { token, .. }
                if token.is_zero() =>
            {
                Err(DeployError::InvalidInput("token address must not be zero".to_string()))
            }
            RescueAsset::Erc1155 { amount, .. } if amount.is_zero() => {
                Err(DeployError::InvalidInput("amount must be greater than zero".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn calldata(&self, recipient: Address) -> Bytes {
        match *self {
            RescueAsset::Native => contract::withdraw_stuck_native(recipient),
            RescueAsset::Erc20 { token } => contract::withdraw_stuck_token(token, recipient),
            RescueAsset::Erc721 { token, token_id } => contract::withdraw_stuck_erc721(token, recipient, token_id),
            RescueAsset::Erc1155 {
                token,
                token_id,
                amount,
            } => contract::withdraw_stuck_erc1155(token, recipient, token_id, amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RescueStatus {
    Idle,
    Switching,
    Withdrawing,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescueState {
    pub status: RescueStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

pub struct Rescuer {
    admin: AdminClient,
    state: watch::Sender<RescueState>,
    run_lock: Mutex<()>,
}

impl Rescuer {
    pub fn new(admin: AdminClient) -> Self {
        let (state, _) = watch::channel(RescueState {
            status: RescueStatus::Idle,
            tx_hash: None,
            error: None,
        });
        Self {
            admin,
            state,
            run_lock: Mutex::new(()),
        }
    }

    pub fn watch(&self) -> watch::Receiver<RescueState> {
        self.state.subscribe()
    }

    fn set(&self, status: RescueStatus, tx_hash: Option<TxHash>, error: Option<String>) {
        self.state.send_replace(RescueState { status, tx_hash, error });
    }

    /// Withdraw `asset` from `contract` on `network_id`. The recipient
    /// defaults to the signer's own address.
    pub async fn rescue(
        &self,
        network_id: u64,
        contract: Address,
        recipient: Option<Address>,
        asset: RescueAsset,
    ) -> Result<TxHash, DeployError> {
        asset.validate()?;
        let recipient = recipient.unwrap_or_else(|| self.admin.signer_address());
        if recipient.is_zero() {
            return Err(DeployError::InvalidInput("recipient must not be the zero address".to_string()));
        }
        let _run = self.run_lock.try_lock().map_err(|_| DeployError::RunInProgress)?;

        self.set(RescueStatus::Switching, None, None);
        let result = async {
            self.admin.switch_to(network_id).await?;
            self.set(RescueStatus::Withdrawing, None, None);
            self.admin
                .write_and_confirm(network_id, contract, asset.calldata(recipient))
                .await
        }
        .await;

        match result {
            Ok(tx_hash) => {
                tracing::info!(network_id, %contract, %recipient, asset = asset.kind(), %tx_hash, "Stuck assets withdrawn");
                self.set(RescueStatus::Success, Some(tx_hash), None);
                Ok(tx_hash)
            }
            Err(e) => {
                tracing::error!(network_id, %contract, asset = asset.kind(), error = %e, "Rescue failed");
                self.set(
                    RescueStatus::Failed,
                    None,
                    Some(errors::truncate(&e.to_string(), RESCUE_ERROR_MAX_LEN)),
                );
                Err(e)
            }
        }
    }
}
