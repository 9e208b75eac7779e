//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use spanscope_clients::ClientsConfig;

use crate::socket_utils;

/// Fallback control socket when no per-user directory is available
const FALLBACK_IPC_SOCKET: &str = "/tmp/spanscope.sock";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address the span server listens on
    pub listen_addr: String,

    /// Unix socket path for control commands
    pub ipc_socket_path: String,

    /// Seconds to wait before restarting a failed span server
    pub retry_delay_secs: u64,

    /// Spans kept per client (oldest dropped first)
    pub buffer_capacity: usize,

    /// Start the span server as soon as the daemon is up
    pub autostart: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let defaults = ClientsConfig::default();
        Self {
            config_path: Self::default_config_path(),
            listen_addr: spanscope_clients::socket::DEFAULT_LISTEN_ADDR.to_string(),
            ipc_socket_path: socket_utils::default_ipc_socket_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|_| FALLBACK_IPC_SOCKET.to_string()),
            retry_delay_secs: defaults.retry_delay.as_secs(),
            buffer_capacity: defaults.buffer_capacity,
            autostart: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    /// Load configuration from `config_path`, writing defaults there if it doesn't exist
    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: DaemonConfig = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            config.config_path = config_path;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save()
                .context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Reject settings the span server cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.retry_delay_secs > 0,
            "retry_delay_secs must be at least 1 (got 0)"
        );
        Ok(())
    }

    /// Library settings derived from this configuration
    pub fn clients_config(&self) -> ClientsConfig {
        ClientsConfig {
            buffer_capacity: self.buffer_capacity,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spanscope")
            .join("config.toml")
    }
}
