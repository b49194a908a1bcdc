use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulksend_deployer::balance::{BalanceProber, ProbeOptions};
use bulksend_deployer::chain::{ChainClient, ClientFactory, DeployError, Receipt, Signer};
use bulksend_deployer::deploy::{DeploymentSettings, DeploymentStatus, Deployer};
use bulksend_deployer::network::{NetworkCatalog, NetworkDescriptor, Tier};
use bulksend_deployer::report::DeploymentReport;
use bulksend_deployer::transport::FallbackTransport;

const DEPLOYER: Address = Address::repeat_byte(0xde);
const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

// ── helpers ──

fn network(id: u64, name: &str, rpc_urls: &[&str]) -> NetworkDescriptor {
    NetworkDescriptor {
        id,
        name: name.to_string(),
        symbol: "ETH".to_string(),
        decimals: 18,
        rpc_urls: rpc_urls.iter().map(|u| u.to_string()).collect(),
        explorer_url: None,
        min_balance_fallback: "0.01".to_string(),
        tier: Tier::P1,
    }
}

/// Every endpoint answers the same way; `down` endpoints refuse to connect.
struct Chains {
    down: HashSet<String>,
    balances: Vec<(String, u128)>,
}

struct Endpoint {
    url: String,
    balance: u128,
}

#[async_trait]
impl ChainClient for Endpoint {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, DeployError> {
        Ok(U256::from(self.balance))
    }

    async fn get_gas_price(&self) -> Result<u128, DeployError> {
        Ok(1_000_000_000)
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, DeployError> {
        Ok(Bytes::new())
    }

    async fn wait_for_transaction_receipt(
        &self,
        hash: TxHash,
        _poll_interval: Duration,
        _timeout: Duration,
    ) -> Result<Receipt, DeployError> {
        Ok(Receipt {
            transaction_hash: hash,
            contract_address: Some(Address::from_word(hash)),
            success: true,
        })
    }
}

impl ClientFactory for Chains {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, DeployError> {
        if self.down.contains(url) {
            return Err(DeployError::Rpc(format!("error sending request for url ({url}): connection refused")));
        }
        let balance = self
            .balances
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, b)| *b)
            .unwrap_or(ONE_ETHER);
        Ok(Arc::new(Endpoint {
            url: url.to_string(),
            balance,
        }))
    }
}

/// Signer that rejects deploys on `rejecting` chains until it is cleared.
struct FlakySigner {
    active: Mutex<Option<u64>>,
    rejecting: Mutex<HashSet<u64>>,
    nonce: AtomicU32,
}

#[async_trait]
impl Signer for FlakySigner {
    fn address(&self) -> Address {
        DEPLOYER
    }

    async fn switch_network(&self, network_id: u64) -> Result<(), DeployError> {
        *self.active.lock().unwrap() = Some(network_id);
        Ok(())
    }

    async fn active_network(&self) -> Option<u64> {
        *self.active.lock().unwrap()
    }

    async fn deploy_contract(&self, _bytecode: Bytes) -> Result<TxHash, DeployError> {
        let network_id = self.active.lock().unwrap().expect("switched before deploying");
        if self.rejecting.lock().unwrap().contains(&network_id) {
            return Err(DeployError::Signer("insufficient funds for gas * price + value".to_string()));
        }
        let n = self.nonce.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(TxHash::left_padding_from(&(network_id * 100 + n).to_be_bytes()))
    }

    async fn write_contract(&self, _to: Address, _calldata: Bytes) -> Result<TxHash, DeployError> {
        Err(DeployError::Signer("not used".to_string()))
    }
}

// ── tests ──

#[tokio::test(start_paused = true)]
async fn probe_deploy_retry_and_export() {
    let catalog = Arc::new(NetworkCatalog::new(vec![
        network(1, "Ethereum", &["http://eth-a", "http://eth-b"]),
        network(10, "OP Mainnet", &["http://op-a"]),
        network(137, "Polygon", &["http://polygon-a"]),
        network(8453, "Base", &["http://base-a"]),
    ]));
    let factory = Chains {
        down: HashSet::from(["http://eth-a".to_string()]),
        balances: vec![("http://polygon-a".to_string(), 0)],
    };
    let transport = FallbackTransport::new(Arc::clone(&catalog), Arc::new(factory));

    // Probe: Polygon is broke, Ethereum is served by its second endpoint.
    let prober = BalanceProber::new(transport.clone());
    prober
        .probe(Some(DEPLOYER), &catalog.ids(), ProbeOptions::default())
        .expect("session started")
        .await
        .unwrap();
    let affordable: Vec<u64> = prober
        .snapshot()
        .iter()
        .filter(|p| p.error.is_none() && p.has_enough_balance())
        .map(|p| p.network_id)
        .collect();
    assert_eq!(affordable, vec![1, 10, 8453]);

    // Deploy: OP rejects with a non-retryable error the first time round.
    let signer = Arc::new(FlakySigner {
        active: Mutex::new(None),
        rejecting: Mutex::new(HashSet::from([10])),
        nonce: AtomicU32::new(0),
    });
    let deployer = Deployer::new(
        signer.clone(),
        transport,
        Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
        DeploymentSettings::default(),
    );
    deployer.set_selection(affordable);

    let records = deployer.deploy(None).await.unwrap();
    let statuses: Vec<_> = records.iter().map(|r| (r.network_id, r.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (1, DeploymentStatus::Success),
            (10, DeploymentStatus::Failed),
            (8453, DeploymentStatus::Success),
        ]
    );
    let op = records.iter().find(|r| r.network_id == 10).unwrap();
    assert!(op.error.as_deref().unwrap().contains("insufficient funds"));

    // Retry: only OP is re-run, the others keep their results.
    signer.rejecting.lock().unwrap().clear();
    let before = records.clone();
    let records = deployer.retry_failed().await.unwrap();
    assert!(records.iter().all(|r| r.status == DeploymentStatus::Success));
    assert_eq!(records[0], before[0]);
    assert_eq!(records[2], before[2]);

    // Export: one entry per successful network, keyed by slug.
    let dir = tempfile::tempdir().unwrap();
    let path = DeploymentReport::from_records(&records).write_to_dir(dir.path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    let contracts = json["contracts"].as_object().unwrap();
    assert_eq!(contracts.len(), 3);
    assert_eq!(contracts["op_mainnet"]["chainId"], 10);
    assert_eq!(
        contracts["ethereum"]["address"],
        records[0].address.unwrap().to_string()
    );
}
