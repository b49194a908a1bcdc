//! Environment variable names and parsers used by the deployer binary.

use crate::chain::DeployError;

pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "deployer.toml";

/// Hex private key of the deploying account.
pub const ENV_PRIVATE_KEY: &str = "DEPLOYER_PRIVATE_KEY";
/// Comma-separated chain ids to deploy to. Defaults to every mainnet.
pub const ENV_DEPLOY_NETWORKS: &str = "DEPLOY_NETWORKS";
/// When set, ownership of every deployed contract is transferred here.
pub const ENV_NEW_OWNER: &str = "NEW_OWNER";

const ENV_RPC_URLS_PREFIX: &str = "RPC_URLS_";

/// `RPC_URLS_<SLUG>` for a network slug, e.g. `RPC_URLS_BNB_SMART_CHAIN`.
pub fn rpc_urls_var(slug: &str) -> String {
    format!("{ENV_RPC_URLS_PREFIX}{}", slug.to_uppercase())
}

/// Endpoint override for `slug` from the environment, if set and non-empty.
pub fn rpc_urls(slug: &str) -> Option<Vec<String>> {
    let raw = std::env::var(rpc_urls_var(slug)).ok()?;
    let urls = parse_list(&raw);
    (!urls.is_empty()).then_some(urls)
}

/// Split a comma-separated value, trimming entries and dropping empty ones.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a `DEPLOY_NETWORKS` value into chain ids, keeping order and dropping repeats.
pub fn parse_network_ids(raw: &str) -> Result<Vec<u64>, DeployError> {
    let mut ids = Vec::new();
    for item in parse_list(raw) {
        let id: u64 = item
            .parse()
            .map_err(|_| DeployError::InvalidInput(format!("'{item}' is not a chain id")))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
