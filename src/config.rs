//! Startup configuration, read once.
//!
//! Values come from a TOML file (path in `CARBONCOIN_CONFIG`, default
//! `carboncoin.toml`; a missing file means all defaults), then environment
//! overrides, then the positional command line `<port> [private_key]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::blockchain::pow::EngineKind;
use crate::blockchain::ChainRules;
use crate::node::role::NodeRole;

pub const CONFIG_PATH_VAR: &str = "CARBONCOIN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "carboncoin.toml";
const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub coin: CoinSettings,
    pub node: NodeSettings,
    pub economics: EconomicsSettings,
    pub mining: MiningSettings,
    pub network: NetworkSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinSettings {
    pub name: String,
    pub symbol: String,
}

impl Default for CoinSettings {
    fn default() -> Self {
        CoinSettings {
            name: "CarbonCoin".to_string(),
            symbol: "CC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Interface the HTTP server binds to
    pub host: String,
    pub port: u16,
    /// URL other nodes use to reach this one; derived from the port if unset
    pub public_url: Option<String>,
    /// Explicit role; derived from the port if unset
    pub role: Option<NodeRole>,
    /// Hex private key to run with; a fresh wallet is created if unset
    pub private_key: Option<String>,
    pub data_dir: PathBuf,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            host: "127.0.0.1".to_string(),
            port: 5000,
            public_url: None,
            role: None,
            private_key: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// How much a miner forwards once its balance crosses the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurplusPolicy {
    /// Send exactly the threshold amount
    #[default]
    Threshold,
    /// Send the whole available balance
    All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EconomicsSettings {
    pub mining_reward: f64,
    /// Default amount for reward assignments
    pub assign_reward: f64,
    pub auto_transfer_threshold: f64,
    pub auto_transfer_policy: SurplusPolicy,
    pub max_transactions_per_block: usize,
}

impl Default for EconomicsSettings {
    fn default() -> Self {
        EconomicsSettings {
            mining_reward: 10.0,
            assign_reward: 5.0,
            auto_transfer_threshold: 100.0,
            auto_transfer_policy: SurplusPolicy::Threshold,
            max_transactions_per_block: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiningSettings {
    pub difficulty: usize,
    pub engine: EngineKind,
    /// Start the mining loop when a miner boots
    pub autostart: bool,
    /// Pause between mining rounds
    pub pause_ms: u64,
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            difficulty: 3,
            engine: EngineKind::Auto,
            autostart: true,
            pause_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub bootstrap_peers: Vec<String>,
    pub miner_ports: Vec<u16>,
    pub collection_port: u16,
    pub collection_url: String,
    /// Skip the `/address` lookup on the collection node when set
    pub collection_address: Option<String>,
    pub peer_timeout_ms: u64,
    pub chain_timeout_ms: u64,
    pub sync_interval_ms: u64,
    pub auto_transfer_interval_ms: u64,
    pub sync_on_start: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            bootstrap_peers: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
                "http://localhost:3002".to_string(),
                "http://localhost:7000".to_string(),
            ],
            miner_ports: vec![3000, 3001, 3002],
            collection_port: 7000,
            collection_url: "http://localhost:7000".to_string(),
            collection_address: None,
            peer_timeout_ms: 5_000,
            chain_timeout_ms: 10_000,
            sync_interval_ms: 2_000,
            auto_transfer_interval_ms: 5_000,
            sync_on_start: true,
        }
    }
}

impl NetworkSettings {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn auto_transfer_interval(&self) -> Duration {
        Duration::from_millis(self.auto_transfer_interval_ms)
    }
}

impl Settings {
    /// Loads the config file named by `CARBONCOIN_CONFIG` and applies
    /// environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = Self::from_file(Path::new(&path))?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Reads a TOML file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values no node could run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        // a SHA-256 hex digest has 64 characters
        if self.mining.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::InvalidValue {
                key: "mining.difficulty".to_string(),
                value: self.mining.difficulty.to_string(),
            });
        }
        Ok(())
    }

    /// Applies `CARBONCOIN_*` overrides looked up through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("CARBONCOIN_PORT") {
            self.node.port = parse_port("CARBONCOIN_PORT", &port)?;
        }
        if let Some(host) = var("CARBONCOIN_HOST") {
            self.node.host = host;
        }
        if let Some(url) = var("CARBONCOIN_PUBLIC_URL") {
            self.node.public_url = Some(url);
        }
        if let Some(key) = var("CARBONCOIN_PRIVATE_KEY") {
            self.node.private_key = Some(key);
        }
        if let Some(role) = var("CARBONCOIN_ROLE") {
            self.node.role = Some(role.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CARBONCOIN_ROLE".to_string(),
                value: role.clone(),
            })?);
        }
        if let Some(dir) = var("CARBONCOIN_DATA_DIR") {
            self.node.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Applies the positional arguments `<port> [private_key]`
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), ConfigError> {
        if let Some(port) = args.first() {
            self.node.port = parse_port("port", port)?;
        }
        if let Some(key) = args.get(1) {
            self.node.private_key = Some(key.clone());
        }
        Ok(())
    }

    /// The configured role, or the one implied by the port
    pub fn role(&self) -> NodeRole {
        self.node.role.unwrap_or_else(|| {
            NodeRole::from_port(
                self.node.port,
                &self.network.miner_ports,
                self.network.collection_port,
            )
        })
    }

    /// Base URL peers use to reach this node
    pub fn node_url(&self) -> String {
        match &self.node.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.node.port),
        }
    }

    pub fn chain_rules(&self) -> ChainRules {
        ChainRules {
            difficulty: self.mining.difficulty,
            mining_reward: self.economics.mining_reward,
            max_transactions_per_block: self.economics.max_transactions_per_block,
        }
    }

    /// sled database directory of this node
    pub fn storage_dir(&self) -> PathBuf {
        self.node.data_dir.join(format!("node-{}", self.node.port))
    }

    /// Directory of the registry shared by all nodes on this machine
    pub fn registry_dir(&self) -> PathBuf {
        self.node.data_dir.join("registry")
    }

    pub fn mining_pause(&self) -> Duration {
        Duration::from_millis(self.mining.pause_ms)
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.coin.symbol, "CC");
        assert_eq!(settings.economics.mining_reward, 10.0);
        assert_eq!(settings.economics.assign_reward, 5.0);
        assert_eq!(settings.economics.auto_transfer_threshold, 100.0);
        assert_eq!(settings.economics.max_transactions_per_block, 1);
        assert_eq!(settings.mining.difficulty, 3);
        assert_eq!(settings.network.bootstrap_peers.len(), 4);
        assert_eq!(settings.role(), NodeRole::User);
    }

    #[test]
    fn test_partial_toml() {
        let settings = Settings::from_toml(
            r#"
            [node]
            port = 3001

            [mining]
            difficulty = 2
            engine = "portable"

            [economics]
            auto_transfer_policy = "all"
            "#,
        )
        .unwrap();

        assert_eq!(settings.role(), NodeRole::Miner);
        assert_eq!(settings.mining.difficulty, 2);
        assert_eq!(settings.mining.engine, EngineKind::Portable);
        assert_eq!(settings.economics.auto_transfer_policy, SurplusPolicy::All);
        assert_eq!(settings.economics.mining_reward, 10.0);
        assert_eq!(settings.node_url(), "http://localhost:3001");
    }

    #[test]
    fn test_env_and_args_override() {
        let vars: HashMap<&str, &str> = [
            ("CARBONCOIN_PORT", "7000"),
            ("CARBONCOIN_ROLE", "user"),
            ("CARBONCOIN_DATA_DIR", "/tmp/cc"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.node.port, 7000);
        assert_eq!(settings.role(), NodeRole::User);
        assert_eq!(settings.storage_dir(), PathBuf::from("/tmp/cc/node-7000"));

        settings
            .apply_args(&["3002".to_string(), "ab".to_string()])
            .unwrap();
        assert_eq!(settings.node.port, 3002);
        assert_eq!(settings.node.private_key.as_deref(), Some("ab"));
    }

    #[test]
    fn test_bad_values() {
        let mut settings = Settings::default();
        assert!(settings.apply_args(&["not-a-port".to_string()]).is_err());
        assert!(settings
            .apply_env(|key| (key == "CARBONCOIN_ROLE").then(|| "king".to_string()))
            .is_err());
        assert!(Settings::from_toml("[mining]\ndifficulty = \"hard\"").is_err());
        assert!(Settings::from_toml("[mining]\ndifficulty = 64").is_ok());
        assert!(matches!(
            Settings::from_toml("[mining]\ndifficulty = 65"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
