//! In-memory chain collaborators shared by the unit tests.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::{ChainClient, ClientFactory, DeployError, Receipt, Signer};
use crate::network::{NetworkCatalog, NetworkDescriptor, Tier};

pub const ONE_ETHER: u128 = 1_000_000_000_000_000_000;
pub const ONE_GWEI: u128 = 1_000_000_000;

/// Catalog of `Mock <id>` networks, each with the single endpoint `mock://<id>`.
pub fn mock_catalog(ids: &[u64]) -> NetworkCatalog {
    NetworkCatalog::new(
        ids.iter()
            .map(|&id| NetworkDescriptor {
                id,
                name: format!("Mock {id}"),
                symbol: "ETH".to_string(),
                decimals: 18,
                rpc_urls: vec![mock_url(id)],
                explorer_url: None,
                min_balance_fallback: "0.01".to_string(),
                tier: Tier::P1,
            })
            .collect(),
    )
}

pub fn mock_url(id: u64) -> String {
    format!("mock://{id}")
}

pub fn tx_hash(n: u64) -> TxHash {
    TxHash::left_padding_from(&n.to_be_bytes())
}

pub fn success_receipt(hash: TxHash) -> Receipt {
    Receipt {
        transaction_hash: hash,
        contract_address: Some(Address::from_word(hash)),
        success: true,
    }
}

type ReceiptFn = Arc<dyn Fn(TxHash) -> Result<Receipt, DeployError> + Send + Sync>;

/// Tracks how many gauged calls run at once and when each started.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

pub struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGauge {
    pub fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.starts.lock().unwrap().push(Instant::now());
        GaugeGuard(Arc::clone(self))
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of calls started at each distinct instant, in time order.
    pub fn waves(&self) -> Vec<usize> {
        let mut starts = self.starts.lock().unwrap().clone();
        starts.sort();
        let mut waves: Vec<(Instant, usize)> = Vec::new();
        for start in starts {
            match waves.last_mut() {
                Some((at, count)) if *at == start => *count += 1,
                _ => waves.push((start, 1)),
            }
        }
        waves.into_iter().map(|(_, count)| count).collect()
    }
}

pub struct MockChainClient {
    pub url: String,
    balance: Result<U256, DeployError>,
    gas_price: Result<u128, DeployError>,
    call_result: Result<Bytes, DeployError>,
    receipts: ReceiptFn,
    latency: Duration,
    calls: AtomicU32,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl MockChainClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            balance: Ok(U256::from(ONE_ETHER)),
            gas_price: Ok(ONE_GWEI),
            call_result: Ok(Bytes::new()),
            receipts: Arc::new(|hash| Ok(success_receipt(hash))),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            gauge: None,
        }
    }

    pub fn with_balance(mut self, balance: Result<U256, DeployError>) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_gas_price(mut self, gas_price: Result<u128, DeployError>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_call_result(mut self, result: Result<Bytes, DeployError>) -> Self {
        self.call_result = result;
        self
    }

    pub fn with_receipts(mut self, f: impl Fn(TxHash) -> Result<Receipt, DeployError> + Send + Sync + 'static) -> Self {
        self.receipts = Arc::new(f);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Gauge `get_balance` calls, one per balance probe.
    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, DeployError> {
        let _guard = self.gauge.as_ref().map(|g| g.enter());
        self.answer().await;
        self.balance.clone()
    }

    async fn get_gas_price(&self) -> Result<u128, DeployError> {
        self.answer().await;
        self.gas_price.clone()
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, DeployError> {
        self.answer().await;
        self.call_result.clone()
    }

    async fn wait_for_transaction_receipt(
        &self,
        hash: TxHash,
        _poll_interval: Duration,
        _timeout: Duration,
    ) -> Result<Receipt, DeployError> {
        self.answer().await;
        (self.receipts)(hash)
    }
}

#[derive(Clone)]
pub struct MockFactory {
    clients: Arc<HashMap<String, Arc<MockChainClient>>>,
    pub connects: Arc<AtomicU32>,
}

impl MockFactory {
    pub fn new(clients: Vec<MockChainClient>) -> Self {
        Self {
            clients: Arc::new(clients.into_iter().map(|c| (c.url.clone(), Arc::new(c))).collect()),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn client(&self, url: &str) -> Arc<MockChainClient> {
        Arc::clone(self.clients.get(url).expect("no mock client for url"))
    }
}

impl ClientFactory for MockFactory {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, DeployError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.clients.get(url) {
            Some(client) => Ok(Arc::clone(client) as Arc<dyn ChainClient>),
            None => Err(DeployError::Rpc(format!("error sending request for url ({url}): connection refused"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerCall {
    Switch(u64),
    Deploy(u64),
    Write { network_id: u64, to: Address, calldata: Bytes },
}

type Scripted = Mutex<HashMap<u64, VecDeque<Result<TxHash, DeployError>>>>;

/// Signer whose per-network submissions are scripted; unscripted ones succeed.
pub struct MockSigner {
    address: Address,
    active: Mutex<Option<u64>>,
    log: Mutex<Vec<SignerCall>>,
    deploys: Scripted,
    writes: Scripted,
    switch_errors: Mutex<HashMap<u64, DeployError>>,
    counter: AtomicU32,
}

impl MockSigner {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            active: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            deploys: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashMap::new()),
            switch_errors: Mutex::new(HashMap::new()),
            counter: AtomicU32::new(0),
        }
    }

    pub fn script_deploys(&self, network_id: u64, results: Vec<Result<TxHash, DeployError>>) {
        self.deploys.lock().unwrap().insert(network_id, results.into());
    }

    pub fn script_writes(&self, network_id: u64, results: Vec<Result<TxHash, DeployError>>) {
        self.writes.lock().unwrap().insert(network_id, results.into());
    }

    pub fn fail_switch(&self, network_id: u64, error: DeployError) {
        self.switch_errors.lock().unwrap().insert(network_id, error);
    }

    pub fn calls(&self) -> Vec<SignerCall> {
        self.log.lock().unwrap().clone()
    }

    fn active_or_err(&self) -> Result<u64, DeployError> {
        self.active
            .lock()
            .unwrap()
            .ok_or_else(|| DeployError::Signer("no active chain".to_string()))
    }

    fn next(&self, scripted: &Scripted, network_id: u64) -> Result<TxHash, DeployError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) as u64;
        scripted
            .lock()
            .unwrap()
            .get_mut(&network_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(tx_hash(network_id * 1000 + n)))
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn switch_network(&self, network_id: u64) -> Result<(), DeployError> {
        self.log.lock().unwrap().push(SignerCall::Switch(network_id));
        if let Some(err) = self.switch_errors.lock().unwrap().get(&network_id) {
            return Err(err.clone());
        }
        *self.active.lock().unwrap() = Some(network_id);
        Ok(())
    }

    async fn active_network(&self) -> Option<u64> {
        *self.active.lock().unwrap()
    }

    async fn deploy_contract(&self, _bytecode: Bytes) -> Result<TxHash, DeployError> {
        let network_id = self.active_or_err()?;
        self.log.lock().unwrap().push(SignerCall::Deploy(network_id));
        self.next(&self.deploys, network_id)
    }

    async fn write_contract(&self, to: Address, calldata: Bytes) -> Result<TxHash, DeployError> {
        let network_id = self.active_or_err()?;
        self.log.lock().unwrap().push(SignerCall::Write { network_id, to, calldata });
        self.next(&self.writes, network_id)
    }
}
