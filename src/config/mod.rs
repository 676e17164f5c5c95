//! Application configuration.
//!
//! Loaded once at startup from a JSON file.
//!
//! ## Loading order
//!
//! 1. `--config` CLI flag (path to JSON file)
//! 2. `MTLINK_CONFIG` environment variable
//! 3. `config.json` in the current working directory

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Default per-fetch timeout in milliseconds. Should stay at or below half
/// the polling interval so a slow agent cannot block its poller.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server port, e.g. "8080".
    pub server_port: String,

    /// Kafka bootstrap brokers (host:port). Empty list disables the Kafka
    /// sink and publishes to the log sink instead.
    #[serde(default)]
    pub kafka_brokers: Vec<String>,

    /// Kafka topic receiving snapshot messages.
    #[serde(default)]
    pub kafka_topic: String,

    /// Total timeout applied to each outbound probe/current fetch.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from the given JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the config path: explicit flag, then env var, then cwd default.
    pub fn resolve_path(cli_path: Option<String>) -> String {
        if let Some(path) = cli_path {
            return path;
        }
        if let Ok(path) = std::env::var("MTLINK_CONFIG") {
            return path;
        }
        "config.json".to_string()
    }

    /// Bind address for the HTTP server ("0.0.0.0:<server_port>").
    pub fn server_addr(&self) -> String {
        format!("0.0.0.0:{}", self.server_port)
    }
}
