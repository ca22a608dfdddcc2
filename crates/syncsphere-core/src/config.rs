//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/syncsphere/config.toml)
//! 3. Environment variables (SYNCSPHERE_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::{
    default_device_name, EngineConfig, ReconnectPolicy, SessionConfig, DEFAULT_CHUNK_SIZE,
};

/// Environment variable prefix
const ENV_PREFIX: &str = "SYNCSPHERE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the peer
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Folder to keep in sync
    #[serde(default)]
    pub sync_root: Option<PathBuf>,

    /// Name sent to the peer in `hello`
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Fixed delay before reconnecting
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Stop after this many consecutive failed connects (unset = retry forever)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Seconds between rescans while idle
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,

    /// Upload chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            sync_root: None,
            device_name: default_device_name(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: None,
            rescan_interval_secs: default_rescan_interval_secs(),
            chunk_size: default_chunk_size(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SYNCSPHERE_SERVER_URL, SYNCSPHERE_SYNC_ROOT, ...)
    /// 2. Config file (~/.config/syncsphere/config.toml or SYNCSPHERE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        // Empty string clears the root
        if let Ok(val) = std::env::var(format!("{}_SYNC_ROOT", ENV_PREFIX)) {
            self.sync_root = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var(format!("{}_DEVICE_NAME", ENV_PREFIX)) {
            if !val.is_empty() {
                self.device_name = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_RECONNECT_DELAY_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.reconnect_delay_ms = ms;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_RESCAN_INTERVAL_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.rescan_interval_secs = secs;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            bail!(
                "server_url must start with ws:// or wss:// (got {:?})",
                self.server_url
            );
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.rescan_interval_secs == 0 {
            bail!("rescan_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Set a single value by key, as used by `syncsphere config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server_url" => self.server_url = value.to_string(),
            "sync_root" => {
                self.sync_root = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "device_name" => self.device_name = value.to_string(),
            "reconnect_delay_ms" => {
                self.reconnect_delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid reconnect_delay_ms: {:?}", value))?
            }
            "max_reconnect_attempts" => {
                self.max_reconnect_attempts = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().with_context(|| {
                        format!("Invalid max_reconnect_attempts: {:?}", value)
                    })?)
                }
            }
            "rescan_interval_secs" => {
                self.rescan_interval_secs = value
                    .parse()
                    .with_context(|| format!("Invalid rescan_interval_secs: {:?}", value))?
            }
            "chunk_size" => {
                self.chunk_size = value
                    .parse()
                    .with_context(|| format!("Invalid chunk_size: {:?}", value))?
            }
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            _ => bail!(
                "Unknown config key: {}. Valid keys: server_url, sync_root, device_name, \
                 reconnect_delay_ms, max_reconnect_attempts, rescan_interval_secs, \
                 chunk_size, log_file",
                key
            ),
        }
        self.validate()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SYNCSPHERE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syncsphere")
            .join("config.toml")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.server_url.clone(),
            reconnect: ReconnectPolicy {
                delay: self.reconnect_delay(),
                max_attempts: self.max_reconnect_attempts,
            },
            rescan_interval: self.rescan_interval(),
        }
    }

    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            device_name: self.device_name.clone(),
            sync_root: self.sync_root.clone(),
            chunk_size: self.chunk_size,
        }
    }
}

fn default_server_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_rescan_interval_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
