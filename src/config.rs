//! Configuration file parsing for the deployer.
//!
//! This module loads `deployer.toml` (or the file named by `CONFIG_FILE`) with
//! retry, transport, balance-probing and deployment timing settings, plus
//! per-network endpoint overrides.
//!
//! Configuration is optional: every section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::from_env;

/// Complete deployer configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployerConfig {
    pub retry: RetryConfig,
    pub transport: TransportConfig,
    pub probe: ProbeConfig,
    pub deployment: DeploymentConfig,
    /// Per-network overrides keyed by network slug (e.g. `ethereum`, `bnb_smart_chain`).
    pub networks: HashMap<String, NetworkOverride>,
}

impl DeployerConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed or holds out-of-range values,
    /// returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.probe.validate()
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var(from_env::ENV_CONFIG_FILE)
            .unwrap_or_else(|_| from_env::DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(config_path)
    }
}

/// Backoff retry settings applied around deploy submission and receipt waits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Upper bound of any single backoff delay, jitter included.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-endpoint HTTP client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for individual RPC requests in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Balance prober settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Networks probed at once. Chunks of this size run one after another.
    pub concurrency: usize,
    /// Gas units assumed for one contract deployment.
    pub deploy_gas_estimate: u64,
    /// Multiplier applied on top of `gas_price * deploy_gas_estimate`.
    pub gas_buffer: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            deploy_gas_estimate: 2_500_000,
            gas_buffer: 1.2,
        }
    }
}

impl ProbeConfig {
    /// `gas_buffer` must be a finite, positive multiplier.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !self.gas_buffer.is_finite() || self.gas_buffer <= 0.0 {
            return Err(config::ConfigError::Message(format!(
                "probe.gas_buffer must be a positive number, got {}",
                self.gas_buffer
            )));
        }
        Ok(())
    }
}

/// Deployment orchestrator timing and artifacts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Pause between two consecutive network deployments.
    pub inter_deploy_delay_ms: u64,
    /// Pause after a signer chain switch before submitting.
    pub switch_settle_delay_ms: u64,
    pub receipt_poll_interval_ms: u64,
    /// Give up on a single receipt wait after this many seconds.
    pub receipt_timeout_seconds: u64,
    /// Hex-encoded creation bytecode of the contract.
    pub bytecode_path: PathBuf,
    /// Directory receiving `deployments-YYYY-MM-DD.json`.
    pub report_dir: PathBuf,
    /// Extra `retry_failed` rounds the binary runs after the first pass.
    pub retry_failed_rounds: u32,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            inter_deploy_delay_ms: 2000,
            switch_settle_delay_ms: 500,
            receipt_poll_interval_ms: 5000,
            receipt_timeout_seconds: 180,
            bytecode_path: PathBuf::from("contracts/BulkSend.bin"),
            report_dir: PathBuf::from("deployments"),
            retry_failed_rounds: 0,
        }
    }
}

impl DeploymentConfig {
    pub fn inter_deploy_delay(&self) -> Duration {
        Duration::from_millis(self.inter_deploy_delay_ms)
    }

    pub fn switch_settle_delay(&self) -> Duration {
        Duration::from_millis(self.switch_settle_delay_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }
}

/// Override of the built-in settings for one network.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkOverride {
    /// Replaces the built-in endpoint list when non-empty.
    pub rpc_urls: Vec<String>,
    /// Replaces the static fallback minimum balance, in native units (e.g. `"0.02"`).
    pub min_balance: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DeployerConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(10));
        assert_eq!(config.transport.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe.concurrency, 5);
        assert_eq!(config.probe.deploy_gas_estimate, 2_500_000);
        assert_eq!(config.deployment.inter_deploy_delay(), Duration::from_secs(2));
        assert_eq!(config.deployment.switch_settle_delay(), Duration::from_millis(500));
        assert_eq!(config.deployment.receipt_poll_interval(), Duration::from_secs(5));
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config_str = r#"
[retry]
max_retries = 5

[deployment]
inter_deploy_delay_ms = 3000
retry_failed_rounds = 2
"#;

        let config: DeployerConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.deployment.inter_deploy_delay_ms, 3000);
        assert_eq!(config.deployment.switch_settle_delay_ms, 500);
        assert_eq!(config.deployment.retry_failed_rounds, 2);
        assert_eq!(config.probe.gas_buffer, 1.2);
    }

    #[test]
    fn test_network_overrides() {
        let config_str = r#"
[networks.ethereum]
rpc_urls = ["https://eth.example.org", "https://eth-backup.example.org"]

[networks.polygon]
min_balance = "2.5"
"#;

        let config: DeployerConfig = toml::from_str(config_str).unwrap();
        let eth = config.networks.get("ethereum").unwrap();
        assert_eq!(eth.rpc_urls.len(), 2);
        assert!(eth.min_balance.is_none());
        let polygon = config.networks.get("polygon").unwrap();
        assert!(polygon.rpc_urls.is_empty());
        assert_eq!(polygon.min_balance.as_deref(), Some("2.5"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = DeployerConfig::from_file("/nonexistent/deployer.toml").unwrap();
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[probe]\nconcurrency = 3\n\n[transport]\nrequest_timeout_seconds = 15").unwrap();

        let config = DeployerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.probe.concurrency, 3);
        assert_eq!(config.transport.request_timeout_seconds, 15);
        assert_eq!(config.deployment.receipt_timeout_seconds, 180);
    }

    #[test]
    fn test_non_positive_gas_buffer_is_rejected() {
        for value in ["-1.0", "0.0"] {
            let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
            writeln!(file, "[probe]\ngas_buffer = {value}").unwrap();

            let err = DeployerConfig::from_file(file.path()).unwrap_err();
            assert!(err.to_string().contains("gas_buffer"), "got {err}");
        }
    }

    #[test]
    fn test_gas_buffer_must_be_finite() {
        for gas_buffer in [f64::NAN, f64::INFINITY] {
            let probe = ProbeConfig { gas_buffer, ..ProbeConfig::default() };
            assert!(probe.validate().is_err());
        }
        assert!(ProbeConfig::default().validate().is_ok());
    }
}
