//! Sequential multi-chain deployment.
//!
//! One signer can only be attached to one chain at a time, so networks are
//! deployed strictly one after another: network K+1 is not switched to until
//! network K reached `success` or `failed`. A short pause separates
//! consecutive deployments, and every chain switch is followed by a settle
//! delay before anything is submitted.
//!
//! Per network:
//!
//! ```text
//! pending -> deploying -> (retrying <-> deploying)* -> success | failed
//! ```
//!
//! Submission and receipt confirmation each run under [`with_retry`]. A
//! failure on one network is recorded and the run moves on. Runs are not
//! cancellable once started.

use alloy::primitives::{Address, Bytes, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};

use crate::chain::{DeployError, Signer};
use crate::config::DeployerConfig;
use crate::errors;
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::FallbackTransport;

/// Max length of the error text stored on a failed record.
pub const FAILURE_MESSAGE_MAX_LEN: usize = 120;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Retrying,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl Display for DeploymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "pending"),
            DeploymentStatus::Deploying => write!(f, "deploying"),
            DeploymentStatus::Retrying => write!(f, "retrying"),
            DeploymentStatus::Success => write!(f, "success"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of deploying to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network_id: u64,
    pub network_name: String,
    pub address: Option<Address>,
    /// Set as soon as the transaction is submitted, before confirmation.
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub status: DeploymentStatus,
    /// Retry attempt currently backing off, `0` when none.
    pub attempt: u32,
    /// When the record reached `success`.
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    fn pending(network_id: u64, network_name: String) -> Self {
        Self {
            network_id,
            network_name,
            address: None,
            tx_hash: None,
            error: None,
            status: DeploymentStatus::Pending,
            attempt: 0,
            deployed_at: None,
        }
    }
}

/// Progress notification emitted on every status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentEvent {
    pub network_id: u64,
    pub status: DeploymentStatus,
    pub detail: String,
}

/// Timing and retry knobs of a [`Deployer`].
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub inter_deploy_delay: Duration,
    pub switch_settle_delay: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        DeploymentSettings::from(&DeployerConfig::default())
    }
}

impl From<&DeployerConfig> for DeploymentSettings {
    fn from(config: &DeployerConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            base_delay: config.retry.base_delay(),
            max_delay: config.retry.max_delay(),
            inter_deploy_delay: config.deployment.inter_deploy_delay(),
            switch_settle_delay: config.deployment.switch_settle_delay(),
            receipt_poll_interval: config.deployment.receipt_poll_interval(),
            receipt_timeout: config.deployment.receipt_timeout(),
        }
    }
}

type Records = Arc<Vec<DeploymentRecord>>;

/// Publishes record snapshots and events. Cloned into retry observers.
#[derive(Clone)]
struct Progress {
    records: Arc<watch::Sender<Records>>,
    events: broadcast::Sender<DeploymentEvent>,
}

impl Progress {
    fn emit(&self, network_id: u64, status: DeploymentStatus, detail: impl Into<String>) {
        // No subscribers is fine.
        let _ = self.events.send(DeploymentEvent {
            network_id,
            status,
            detail: detail.into(),
        });
    }

    /// Replace the record of `network_id` with an updated copy, then emit.
    fn update(
        &self,
        network_id: u64,
        status: DeploymentStatus,
        detail: impl Into<String>,
        apply: impl FnOnce(&mut DeploymentRecord),
    ) {
        self.records.send_modify(|records| {
            if let Some(pos) = records.iter().position(|r| r.network_id == network_id) {
                let mut next = records.as_ref().clone();
                apply(&mut next[pos]);
                next[pos].status = status;
                *records = Arc::new(next);
            }
        });
        self.emit(network_id, status, detail);
    }

    fn status_of(&self, network_id: u64) -> Option<DeploymentStatus> {
        self.records
            .borrow()
            .iter()
            .find(|r| r.network_id == network_id)
            .map(|r| r.status)
    }
}

pub struct Deployer {
    signer: Arc<dyn Signer>,
    transport: FallbackTransport,
    bytecode: Bytes,
    settings: DeploymentSettings,
    selection: RwLock<Vec<u64>>,
    progress: Progress,
    run_lock: Mutex<()>,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Deployer {
    pub fn new(
        signer: Arc<dyn Signer>,
        transport: FallbackTransport,
        bytecode: Bytes,
        settings: DeploymentSettings,
    ) -> Self {
        let (records, _) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            signer,
            transport,
            bytecode,
            settings,
            selection: RwLock::new(Vec::new()),
            progress: Progress {
                records: Arc::new(records),
                events,
            },
            run_lock: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// Networks a fresh run deploys to, in order. Repeated ids are dropped.
    pub fn set_selection(&self, network_ids: Vec<u64>) {
        let mut unique = Vec::with_capacity(network_ids.len());
        for id in network_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        *self.selection.write().unwrap_or_else(PoisonError::into_inner) = unique;
    }

    pub fn selection(&self) -> Vec<u64> {
        self.selection.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.progress.records.borrow().as_ref().clone()
    }

    pub fn watch_records(&self) -> watch::Receiver<Records> {
        self.progress.records.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.progress.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Deploy to `network_ids`, or to the whole selection when `None`.
    ///
    /// `None` starts a fresh run and discards earlier records. `Some` merges
    /// into the existing records, resetting only the listed networks. Returns
    /// the records once every targeted network reached a terminal status.
    pub async fn deploy(&self, network_ids: Option<Vec<u64>>) -> Result<Vec<DeploymentRecord>, DeployError> {
        let _run = self.run_lock.try_lock().map_err(|_| DeployError::RunInProgress)?;
        self.running.store(true, Ordering::Release);
        let _running = RunningFlag(&self.running);
        let catalog = Arc::clone(self.transport.catalog());

        let targets = match network_ids {
            None => {
                let targets = self.selection();
                let fresh = targets
                    .iter()
                    .map(|id| DeploymentRecord::pending(*id, catalog.display_name(*id)))
                    .collect::<Vec<_>>();
                self.progress.records.send_replace(Arc::new(fresh));
                targets
            }
            Some(ids) => {
                let mut targets: Vec<u64> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !targets.contains(&id) {
                        targets.push(id);
                    }
                }
                self.progress.records.send_modify(|records| {
                    let mut next = records.as_ref().clone();
                    for id in &targets {
                        let reset = DeploymentRecord::pending(*id, catalog.display_name(*id));
                        match next.iter_mut().find(|r| r.network_id == *id) {
                            Some(existing) => *existing = reset,
                            None => next.push(reset),
                        }
                    }
                    *records = Arc::new(next);
                });
                targets
            }
        };

        if targets.is_empty() {
            tracing::info!("Nothing to deploy");
            return Ok(self.records());
        }

        tracing::info!(networks = ?targets, "Starting deployment run");
        for id in &targets {
            self.progress.emit(*id, DeploymentStatus::Pending, "queued");
        }

        for (k, id) in targets.iter().enumerate() {
            if k > 0 && !self.settings.inter_deploy_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_deploy_delay).await;
            }
            self.deploy_network(*id).await;
        }

        let records = self.records();
        let succeeded = records.iter().filter(|r| r.status == DeploymentStatus::Success).count();
        tracing::info!(succeeded, total = records.len(), "Deployment run complete");
        Ok(records)
    }

    /// Re-run every network whose record is `failed`.
    pub async fn retry_failed(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let failed = self
            .records()
            .iter()
            .filter(|r| r.status == DeploymentStatus::Failed)
            .map(|r| r.network_id)
            .collect::<Vec<_>>();
        tracing::info!(networks = ?failed, "Retrying failed deployments");
        self.deploy(Some(failed)).await
    }

    async fn deploy_network(&self, network_id: u64) {
        let started = std::time::Instant::now();
        match self.try_deploy_network(network_id).await {
            Ok((tx_hash, address)) => {
                tracing::info!(
                    network_id,
                    %tx_hash,
                    %address,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Contract deployed"
                );
                self.progress
                    .update(network_id, DeploymentStatus::Success, format!("deployed at {address}"), |r| {
                        r.address = Some(address);
                        r.tx_hash = Some(tx_hash);
                        r.error = None;
                        r.attempt = 0;
                        r.deployed_at = Some(Utc::now());
                    });
            }
            Err(e) => {
                let message = errors::truncate(&e.to_string(), FAILURE_MESSAGE_MAX_LEN);
                tracing::error!(
                    network_id,
                    error = %e,
                    kind = %errors::classify(&e.to_string()),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Deployment failed"
                );
                self.progress.update(network_id, DeploymentStatus::Failed, message.clone(), |r| {
                    r.error = Some(message);
                    r.attempt = 0;
                });
            }
        }
    }

    async fn try_deploy_network(&self, network_id: u64) -> Result<(TxHash, Address), DeployError> {
        self.transport.catalog().require(network_id)?;

        self.progress.emit(network_id, DeploymentStatus::Pending, "switching network");
        self.signer.switch_network(network_id).await?;
        if !self.settings.switch_settle_delay.is_zero() {
            tokio::time::sleep(self.settings.switch_settle_delay).await;
        }

        self.progress
            .update(network_id, DeploymentStatus::Deploying, "deploying contract", |r| r.error = None);

        let policy = self.retry_policy(network_id);
        let tx_hash = with_retry(policy.clone(), || {
            self.resume_deploying(network_id);
            let signer = Arc::clone(&self.signer);
            let bytecode = self.bytecode.clone();
            async move { signer.deploy_contract(bytecode).await }
        })
        .await?;

        tracing::info!(network_id, %tx_hash, "Deployment submitted");
        self.progress
            .update(network_id, DeploymentStatus::Deploying, format!("submitted {tx_hash}"), |r| {
                r.tx_hash = Some(tx_hash)
            });

        // One deadline covers every retry; running out of it is final.
        let poll = self.settings.receipt_poll_interval;
        let timeout = self.settings.receipt_timeout;
        let waiting_since = tokio::time::Instant::now();
        let receipt_policy = policy.with_predicate(|e: &DeployError| {
            !matches!(e, DeployError::ReceiptTimeout { .. }) && errors::is_retryable(&e.to_string())
        });
        let receipt = with_retry(receipt_policy, || {
            self.resume_deploying(network_id);
            self.transport
                .wait_for_receipt(network_id, tx_hash, poll, timeout, waiting_since)
        })
        .await?;

        if !receipt.success {
            return Err(DeployError::Reverted(tx_hash));
        }
        let address = receipt
            .contract_address
            .ok_or(DeployError::MissingContractAddress(tx_hash))?;
        Ok((tx_hash, address))
    }

    /// Flip a `retrying` record back to `deploying` as the next attempt starts.
    fn resume_deploying(&self, network_id: u64) {
        if self.progress.status_of(network_id) == Some(DeploymentStatus::Retrying) {
            self.progress
                .update(network_id, DeploymentStatus::Deploying, "retrying now", |r| r.attempt = 0);
        }
    }

    fn retry_policy(&self, network_id: u64) -> RetryPolicy<DeployError> {
        let progress = self.progress.clone();
        let max_retries = self.settings.max_retries;
        RetryPolicy::new(max_retries, self.settings.base_delay, self.settings.max_delay).with_observer(
            move |err: &DeployError, attempt, delay| {
                let message = errors::user_message(&err.to_string());
                tracing::warn!(
                    network_id,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Deployment step failed, retrying"
                );
                progress.update(
                    network_id,
                    DeploymentStatus::Retrying,
                    format!("attempt {attempt}/{max_retries}: {message}"),
                    |r| {
                        r.attempt = attempt;
                        r.error = Some(message.clone());
                    },
                );
            },
        )
    }
}
