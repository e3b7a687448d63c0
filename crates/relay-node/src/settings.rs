//! Node settings: optional `relay.toml` overlaid with `RELAY_*` environment
//! variables, `__` separating nested keys (e.g. `RELAY_QUEUE__GAS_LIMIT`).

use relay_queue::QueueConfig;
use relay_store::{CouchConfig, DatabaseNames};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub signer: SignerSettings,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_couch_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Network suffix for database names; `mainnet` has none.
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// Explicit database names, replacing the ones derived from `network`.
    #[serde(default)]
    pub databases: Option<DatabaseNames>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignerSettings {
    /// Endpoint holding the custodial key. Defaults to the ledger endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
}

fn default_couch_url() -> String {
    "http://localhost:5984".into()
}

fn default_network() -> String {
    "mainnet".into()
}

fn default_store_timeout_ms() -> u64 {
    20_000
}

fn default_rpc_url() -> String {
    "http://localhost:8545".into()
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    4_000
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_couch_url(),
            username: None,
            password: None,
            network: default_network(),
            timeout_ms: default_store_timeout_ms(),
            databases: None,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            timeout_ms: default_rpc_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StoreSettings {
    pub fn couch_config(&self) -> CouchConfig {
        CouchConfig {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout_ms: self.timeout_ms,
            databases: self
                .databases
                .clone()
                .unwrap_or_else(|| DatabaseNames::for_network(&self.network)),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_builder(
            config::Config::builder().add_source(config::File::with_name("relay").required(false)),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn signer_url(&self) -> &str {
        self.signer.rpc_url.as_deref().unwrap_or(&self.ledger.rpc_url)
    }
}
