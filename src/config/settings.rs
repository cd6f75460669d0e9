use crate::error::{BlockchainError, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::load);

pub static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";

const CONFIG_PATH_KEY: &str = "LEDGER_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "node.toml";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const KNOWN_NODES_KEY: &str = "KNOWN_NODES";
const DATA_DIR_KEY: &str = "DATA_DIR";

/// Values as they appear in `node.toml`; anything left out keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node_addr: String,
    pub node_id: Option<String>,
    pub mining_addr: Option<String>,
    pub known_nodes: Vec<String>,
    pub data_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub read_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            node_addr: DEFAULT_NODE_ADDR.to_string(),
            node_id: None,
            mining_addr: None,
            known_nodes: vec![DEFAULT_NODE_ADDR.to_string()],
            data_dir: PathBuf::from("data"),
            connect_timeout_ms: 5000,
            read_timeout_secs: 60,
        }
    }
}

pub struct Config {
    inner: RwLock<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self::from_settings(self.settings())
    }
}

impl Config {
    pub fn from_settings(settings: Settings) -> Config {
        Config {
            inner: RwLock::new(settings),
        }
    }

    /// Defaults, then the config file, then environment overrides. A broken
    /// config file is reported and skipped.
    pub fn load() -> Config {
        let path = env::var(CONFIG_PATH_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config = if path.exists() {
            match Config::from_file(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring configuration file {}: {e}", path.display());
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        config.apply_env(|key| env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Config::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        let settings: Settings = toml::from_str(text)?;
        Ok(Config::from_settings(settings))
    }

    pub fn apply_env<F>(&self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            inner.node_addr = addr;
        }
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            inner.node_id = Some(node_id);
        }
        if let Some(addr) = lookup(MINING_ADDRESS_KEY) {
            inner.mining_addr = Some(addr);
        }
        if let Some(nodes) = lookup(KNOWN_NODES_KEY) {
            inner.known_nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            inner.data_dir = PathBuf::from(dir);
        }
    }

    pub fn settings(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_node_addr(&self) -> String {
        self.settings().node_addr
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        self.settings().mining_addr
    }

    pub fn set_mining_addr(&self, addr: String) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).mining_addr = Some(addr);
    }

    pub fn is_miner(&self) -> bool {
        self.settings().mining_addr.is_some()
    }

    /// Configured id, else the port of the node address
    /// ("127.0.0.1:2001" -> "2001").
    pub fn get_node_id(&self) -> String {
        let settings = self.settings();
        if let Some(node_id) = settings.node_id {
            return node_id;
        }
        match settings.node_addr.rsplit(':').next() {
            Some(port) if !port.is_empty() => port.to_string(),
            _ => "default".to_string(),
        }
    }

    pub fn get_known_nodes(&self) -> Vec<String> {
        self.settings().known_nodes
    }

    pub fn get_data_dir(&self) -> PathBuf {
        self.settings().data_dir
    }

    pub fn chain_path(&self) -> PathBuf {
        self.get_data_dir().join(format!("node_{}", self.get_node_id()))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.get_data_dir().join(format!("wallet_{}.dat", self.get_node_id()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.settings().connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.settings().read_timeout_secs)
    }
}
