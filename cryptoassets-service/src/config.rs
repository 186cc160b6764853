//! Structured service configuration: a single TOML document, loaded from a
//! path given on the CLI or `CRYPTOASSETS_CONFIG`, overridable with
//! `CRYPTOASSETS_*` environment variables for containerized deployment.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub coins: HashMap<String, CoinConfig>,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub event_sinks: Vec<EventSinkConfig>,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_pool_size() -> u32 {
    8
}

#[derive(Debug, Deserialize)]
pub struct CoinConfig {
    pub backend: BackendConfig,
    pub confirmation_threshold: i32,
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// An in-memory test double; used for local development and the
    /// `scan-received --dry-run` style exercising of the engine.
    Mock,
    /// A full node speaking JSON-RPC.
    NodeRpc { url: String, cookie_file: Option<String> },
    /// A hosted wallet HTTP API.
    HostedWallet { base_url: String, api_key: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    #[default]
    None,
    NamedPipe {
        path: String,
    },
    HttpHook {
        bind_address: String,
    },
    PubSub {
        channel: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSinkConfig {
    Http { url: String },
    Subprocess { program: String, args: Vec<String> },
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_broadcast_period")]
    pub broadcast_period_seconds: u64,
    #[serde(default = "default_confirmation_poll_period")]
    pub confirmation_poll_period_seconds: u64,
    #[serde(default = "default_transaction_retries")]
    pub transaction_retries: u32,
    pub inspection_bind_address: Option<String>,
}

fn default_broadcast_period() -> u64 {
    30
}

fn default_confirmation_poll_period() -> u64 {
    60
}

fn default_transaction_retries() -> u32 {
    3
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            broadcast_period_seconds: default_broadcast_period(),
            confirmation_poll_period_seconds: default_confirmation_poll_period(),
            transaction_retries: default_transaction_retries(),
            inspection_bind_address: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("failed to read config at {}: {err}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("failed to parse config at {}: {err}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = r#"
            [database]
            url = "postgres://localhost/cryptoassets"

            [coins.btc]
            confirmation_threshold = 3
            testnet = true
            backend = { kind = "mock" }
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert_eq!(config.database.max_connections, 8);
        let btc = &config.coins["btc"];
        assert_eq!(btc.confirmation_threshold, 3);
        assert!(btc.testnet);
        assert_eq!(config.service.broadcast_period_seconds, 30);
    }
}
