//! Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./offgrid.yaml` (current directory - highest priority)
//! 2. `~/.config/offgrid/offgrid.yaml` (user config directory)
//! 3. `/etc/offgrid/offgrid.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files. Every section is optional; a node with no config at all runs
//! with generated identity and defaults.
//!
//! ```yaml
//! node:
//!   nickname: "Alice"
//! tcp:
//!   listen: "0.0.0.0:7448"
//!   peers:
//!     - name: "bob-laptop"
//!       address: "BB:22:CC:44:EE:66"
//!       endpoint: "192.168.1.20:7448"
//! ```

use crate::transport::DeviceInfo;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "offgrid.yaml";

/// Default TCP listen address.
const DEFAULT_TCP_LISTEN: &str = "0.0.0.0:7448";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Node identity configuration (`node.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Nickname shown to other nodes (`node.nickname`). Defaults to the
    /// transport-reported device name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    /// Device name reported to peers (`node.device_name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Radio address override (`node.address`). If unset, a random
    /// address is generated at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One statically configured TCP peer (`tcp.peers[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpPeerConfig {
    /// Device name for display.
    pub name: String,
    /// Radio address of the peer.
    pub address: String,
    /// Socket endpoint to dial, `host:port`.
    pub endpoint: String,
}

/// TCP transport configuration (`tcp.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Enable the TCP transport (`tcp.enabled`). Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Listen address (`tcp.listen`). Defaults to "0.0.0.0:7448".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Paired devices reachable over TCP (`tcp.peers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<TcpPeerConfig>,
}

impl TcpConfig {
    /// Whether the transport is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Get the listen address, using the default if not configured.
    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_TCP_LISTEN)
    }
}

/// File handling configuration (`files.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Where received files land (`files.download_dir`). Defaults to the
    /// platform downloads directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl FilesConfig {
    /// Resolve the download directory.
    pub fn download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node identity (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// TCP transport (`tcp.*`).
    #[serde(default)]
    pub tcp: TcpConfig,

    /// File handling (`files.*`).
    #[serde(default)]
    pub files: FilesConfig,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge the standard search paths.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        Self::load_from_paths(&Self::search_paths())
    }

    /// Fold the given paths, lowest priority first, into one config.
    ///
    /// Missing files are skipped; the returned list names the files that
    /// were actually read, in the order their values were applied.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        paths.iter().filter(|p| p.exists()).try_fold(
            (Config::default(), Vec::new()),
            |(mut merged, mut read), path| {
                merged.merge(Self::load_file(path)?);
                read.push(path.clone());
                Ok((merged, read))
            },
        )
    }

    /// Parse one YAML config file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) => {
                return Err(ConfigError::ReadFile {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseYaml {
            path: path.to_owned(),
            source,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/offgrid").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("offgrid").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        if other.node.nickname.is_some() {
            self.node.nickname = other.node.nickname;
        }
        if other.node.device_name.is_some() {
            self.node.device_name = other.node.device_name;
        }
        if other.node.address.is_some() {
            self.node.address = other.node.address;
        }
        if other.tcp.enabled.is_some() {
            self.tcp.enabled = other.tcp.enabled;
        }
        if other.tcp.listen.is_some() {
            self.tcp.listen = other.tcp.listen;
        }
        if !other.tcp.peers.is_empty() {
            self.tcp.peers = other.tcp.peers;
        }
        if other.files.download_dir.is_some() {
            self.files.download_dir = other.files.download_dir;
        }
    }

    /// Build the local device identity from this configuration.
    ///
    /// Generates a random radio address when none is configured; call once
    /// at startup and reuse the result, the generated address is not
    /// stable across calls.
    pub fn local_device(&self) -> DeviceInfo {
        let address = self.node.address.clone().unwrap_or_else(|| {
            let raw: u64 = rand::thread_rng().gen();
            format!("{:012X}", raw & 0xFFFF_FFFF_FFFF)
        });
        let name = self.node.device_name.clone().unwrap_or_else(|| {
            let tag: String = address.chars().take(4).collect();
            format!("OffGrid-{}", tag)
        });
        DeviceInfo { name, address }
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
