//! JSON export of successful deployments.
//!
//! ```json
//! {
//!   "generatedAt": "2025-01-01T00:00:00.000Z",
//!   "contracts": {
//!     "ethereum": { "address": "0x…", "chainId": 1, "txHash": "0x…", "deployedAt": "…" }
//!   }
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::deploy::{DeploymentRecord, DeploymentStatus};
use crate::network::slugify;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEntry {
    pub address: String,
    pub chain_id: u64,
    pub tx_hash: Option<String>,
    pub deployed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub generated_at: String,
    /// Keyed by network slug.
    pub contracts: BTreeMap<String, ContractEntry>,
}

fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl DeploymentReport {
    pub fn from_records(records: &[DeploymentRecord]) -> Self {
        Self::from_records_at(records, Utc::now())
    }

    /// Build the report as of `now`. Only successful records with an address are included.
    pub fn from_records_at(records: &[DeploymentRecord], now: DateTime<Utc>) -> Self {
        let contracts = records
            .iter()
            .filter(|r| r.status == DeploymentStatus::Success)
            .filter_map(|r| {
                let address = r.address?;
                Some((
                    slugify(&r.network_name),
                    ContractEntry {
                        address: address.to_string(),
                        chain_id: r.network_id,
                        tx_hash: r.tx_hash.map(|h| h.to_string()),
                        deployed_at: iso8601(r.deployed_at.unwrap_or(now)),
                    },
                ))
            })
            .collect();
        Self {
            generated_at: iso8601(now),
            contracts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `deployments-YYYY-MM-DD.json`, dated by `generated_at`.
    pub fn file_name(&self) -> String {
        let date = self.generated_at.get(..10).unwrap_or("undated");
        format!("deployments-{date}.json")
    }

    /// Write the report into `dir`, creating it if needed. Returns the file path.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ReportError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_json_pretty()?)?;
        tracing::info!(path = %path.display(), contracts = self.contracts.len(), "Deployment report written");
        Ok(path)
    }
}
