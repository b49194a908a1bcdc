//! Supported networks and their RPC endpoints.
//!
//! The built-in catalog is ordered by deployment priority: the two largest
//! chains first (p0), then the major L2s and sidechains (p1), then the rest
//! (p2). Sepolia is the only testnet. Each network lists several public RPC
//! mirrors that the fallback transport tries in order.

use alloy::primitives::U256;
use alloy::primitives::utils::parse_units;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use crate::chain::DeployError;
use crate::config::NetworkOverride;

/// Deployment priority tier of a network.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    P0,
    P1,
    P2,
    Testnet,
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::P0 => write!(f, "p0"),
            Tier::P1 => write!(f, "p1"),
            Tier::P2 => write!(f, "p2"),
            Tier::Testnet => write!(f, "testnet"),
        }
    }
}

/// Static description of one EVM network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// EIP-155 chain id.
    pub id: u64,
    pub name: String,
    /// Native asset symbol.
    pub symbol: String,
    /// Native asset decimals.
    pub decimals: u8,
    /// Candidate endpoints, tried in order.
    pub rpc_urls: Vec<String>,
    pub explorer_url: Option<String>,
    /// Minimum balance used when no gas price can be fetched, in native units.
    pub min_balance_fallback: String,
    pub tier: Tier,
}

impl NetworkDescriptor {
    /// Lowercase name with whitespace runs replaced by `_`, e.g. `bnb_smart_chain`.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    pub fn is_testnet(&self) -> bool {
        self.tier == Tier::Testnet
    }

    /// Static fallback minimum converted to the smallest unit.
    pub fn fallback_min_balance(&self) -> Result<U256, DeployError> {
        parse_units(&self.min_balance_fallback, self.decimals)
            .map(|units| units.get_absolute())
            .map_err(|e| {
                DeployError::Config(format!(
                    "invalid minimum balance '{}' for chain {}: {e}",
                    self.min_balance_fallback, self.id
                ))
            })
    }

    /// Block explorer link for a transaction, when an explorer is known.
    pub fn tx_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url.as_ref().map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

impl Display for NetworkDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Lowercase `name` and collapse whitespace runs into `_`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

fn descriptor(
    id: u64,
    name: &str,
    symbol: &str,
    min_balance: &str,
    explorer: &str,
    tier: Tier,
    rpc_urls: &[&str],
) -> NetworkDescriptor {
    NetworkDescriptor {
        id,
        name: name.to_string(),
        symbol: symbol.to_string(),
        decimals: 18,
        rpc_urls: rpc_urls.iter().map(|u| u.to_string()).collect(),
        explorer_url: Some(explorer.to_string()),
        min_balance_fallback: min_balance.to_string(),
        tier,
    }
}

static BUILTIN_NETWORKS: Lazy<Vec<NetworkDescriptor>> = Lazy::new(|| {
    vec![
        descriptor(
            1,
            "Ethereum",
            "ETH",
            "0.01",
            "https://etherscan.io",
            Tier::P0,
            &[
                "https://eth.llamarpc.com",
                "https://rpc.ankr.com/eth",
                "https://1rpc.io/eth",
                "https://ethereum.publicnode.com",
            ],
        ),
        descriptor(
            56,
            "BNB Smart Chain",
            "BNB",
            "0.005",
            "https://bscscan.com",
            Tier::P0,
            &[
                "https://bsc-dataseed.binance.org",
                "https://bsc-dataseed1.defibit.io",
                "https://rpc.ankr.com/bsc",
                "https://1rpc.io/bnb",
                "https://bsc.publicnode.com",
            ],
        ),
        descriptor(
            42161,
            "Arbitrum One",
            "ETH",
            "0.001",
            "https://arbiscan.io",
            Tier::P1,
            &[
                "https://arb1.arbitrum.io/rpc",
                "https://rpc.ankr.com/arbitrum",
                "https://1rpc.io/arb",
                "https://arbitrum.publicnode.com",
            ],
        ),
        descriptor(
            137,
            "Polygon",
            "POL",
            "1",
            "https://polygonscan.com",
            Tier::P1,
            &[
                "https://polygon-rpc.com",
                "https://rpc.ankr.com/polygon",
                "https://1rpc.io/matic",
                "https://polygon-bor.publicnode.com",
            ],
        ),
        descriptor(
            8453,
            "Base",
            "ETH",
            "0.001",
            "https://basescan.org",
            Tier::P1,
            &[
                "https://mainnet.base.org",
                "https://base.llamarpc.com",
                "https://rpc.ankr.com/base",
                "https://1rpc.io/base",
                "https://base.publicnode.com",
            ],
        ),
        descriptor(
            10,
            "OP Mainnet",
            "ETH",
            "0.001",
            "https://optimistic.etherscan.io",
            Tier::P2,
            &[
                "https://mainnet.optimism.io",
                "https://rpc.ankr.com/optimism",
                "https://1rpc.io/op",
                "https://optimism.publicnode.com",
            ],
        ),
        descriptor(
            43114,
            "Avalanche",
            "AVAX",
            "0.1",
            "https://snowtrace.io",
            Tier::P2,
            &[
                "https://api.avax.network/ext/bc/C/rpc",
                "https://rpc.ankr.com/avalanche",
                "https://1rpc.io/avax/c",
                "https://avalanche-c-chain.publicnode.com",
            ],
        ),
        descriptor(
            59144,
            "Linea Mainnet",
            "ETH",
            "0.001",
            "https://lineascan.build",
            Tier::P2,
            &[
                "https://rpc.linea.build",
                "https://linea.drpc.org",
                "https://1rpc.io/linea",
                "https://linea.blockpi.network/v1/rpc/public",
            ],
        ),
        descriptor(
            324,
            "ZKsync Era",
            "ETH",
            "0.001",
            "https://era.zksync.network",
            Tier::P2,
            &[
                "https://mainnet.era.zksync.io",
                "https://zksync.drpc.org",
                "https://1rpc.io/zksync2-era",
                "https://zksync-era.blockpi.network/v1/rpc/public",
            ],
        ),
        descriptor(
            11155111,
            "Sepolia",
            "ETH",
            "0.01",
            "https://sepolia.etherscan.io",
            Tier::Testnet,
            &[
                "https://rpc.sepolia.org",
                "https://rpc.ankr.com/eth_sepolia",
                "https://1rpc.io/sepolia",
                "https://ethereum-sepolia.publicnode.com",
            ],
        ),
    ]
});

/// Ordered, immutable set of known networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCatalog {
    networks: Vec<NetworkDescriptor>,
}

impl Default for NetworkCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl NetworkCatalog {
    /// The built-in networks in priority order.
    pub fn builtin() -> Self {
        Self {
            networks: BUILTIN_NETWORKS.clone(),
        }
    }

    /// A catalog over arbitrary descriptors. Later duplicates of an id are dropped.
    pub fn new(networks: Vec<NetworkDescriptor>) -> Self {
        let mut unique: Vec<NetworkDescriptor> = Vec::with_capacity(networks.len());
        for network in networks {
            if unique.iter().any(|n| n.id == network.id) {
                tracing::warn!(chain_id = network.id, "Duplicate chain id in catalog, ignoring");
                continue;
            }
            unique.push(network);
        }
        Self { networks: unique }
    }

    pub fn get(&self, id: u64) -> Option<&NetworkDescriptor> {
        self.networks.iter().find(|n| n.id == id)
    }

    pub fn require(&self, id: u64) -> Result<&NetworkDescriptor, DeployError> {
        self.get(id).ok_or(DeployError::UnknownNetwork(id))
    }

    pub fn by_slug(&self, slug: &str) -> Option<&NetworkDescriptor> {
        self.networks.iter().find(|n| n.slug() == slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.networks.iter().map(|n| n.id).collect()
    }

    /// Non-testnet ids in priority order.
    pub fn mainnet_ids(&self) -> Vec<u64> {
        self.networks.iter().filter(|n| !n.is_testnet()).map(|n| n.id).collect()
    }

    /// Display name for `id`, or `Chain <id>` when unknown.
    pub fn display_name(&self, id: u64) -> String {
        self.get(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("Chain {id}"))
    }

    /// Apply per-slug overrides. Non-empty `rpc_urls` replace the built-in
    /// list; `min_balance` replaces the fallback minimum. Unknown slugs are
    /// logged and ignored.
    pub fn with_overrides(mut self, overrides: &HashMap<String, NetworkOverride>) -> Self {
        for (slug, o) in overrides {
            let Some(network) = self.networks.iter_mut().find(|n| n.slug() == *slug) else {
                tracing::warn!(slug = %slug, "Override for unknown network ignored");
                continue;
            };
            if !o.rpc_urls.is_empty() {
                tracing::info!(slug = %slug, urls = o.rpc_urls.len(), "Using configured RPC endpoints");
                network.rpc_urls = o.rpc_urls.clone();
            }
            if let Some(min_balance) = &o.min_balance {
                network.min_balance_fallback = min_balance.clone();
            }
        }
        self
    }

    /// Replace the endpoint list of `id`. Unknown ids are ignored.
    pub fn with_rpc_urls(mut self, id: u64, urls: Vec<String>) -> Self {
        if let Some(network) = self.networks.iter_mut().find(|n| n.id == id) {
            network.rpc_urls = urls;
        }
        self
    }
}
