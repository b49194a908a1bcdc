//! Tracing subscriber setup for the deployer binary.
//!
//! Log level comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: Option<String>,
    version: Option<String>,
}

/// Handle returned by [`Telemetry::register`]; carries the service identity for log lines.
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    pub name: String,
    pub version: String,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Install the global `fmt` subscriber. A second call keeps the first subscriber.
    pub fn register(self) -> TelemetryHandle {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .is_ok();

        let handle = TelemetryHandle {
            name: self.name.unwrap_or_else(|| "bulksend-deployer".to_string()),
            version: self.version.unwrap_or_else(|| "unknown".to_string()),
        };
        if installed {
            tracing::info!(service = %handle.name, version = %handle.version, "Telemetry registered");
        }
        handle
    }
}
