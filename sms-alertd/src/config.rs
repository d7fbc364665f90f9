//! Daemon Configuration
//!
//! TOML configuration for the alert daemon: the core alert settings plus
//! daemon-local concerns (paths, control socket, messaging application
//! identity). A missing file is replaced with saved defaults on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sms_alert_core::AlertConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon-local settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Alerting behavior handed to the core
    #[serde(default)]
    pub alert: AlertConfig,

    /// Storage paths
    #[serde(default)]
    pub paths: PathConfig,
}

/// Daemon-local settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Identity of the native messaging application; arrivals while it is
    /// foregrounded stay passive
    #[serde(default = "default_messaging_app")]
    pub messaging_app: String,

    /// Control socket path; defaults to `<data_dir>/control.sock`
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// Data directory (message store, session snapshots, socket)
    pub data_dir: PathBuf,
}

fn default_messaging_app() -> String {
    "org.gnome.Messages".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            messaging_app: default_messaging_app(),
            socket_path: None,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("sms-alertd");

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("sms-alertd");

        Self {
            config_dir,
            data_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            alert: AlertConfig::default(),
            paths: PathConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating the default
    /// file when none exists
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("sms-alertd");
        Self::load_from(&config_dir.join("daemon.toml"))
    }

    /// Load configuration from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir)
            .context("Failed to create config directory")?;

        let config_path = self.paths.config_dir.join("daemon.toml");
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir)
            .context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir)
            .context("Failed to create data directory")?;
        Ok(())
    }

    /// Path of the SQLite message store
    pub fn database_path(&self) -> PathBuf {
        self.paths.data_dir.join("messages.db")
    }

    /// Path of the control socket
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("control.sock"))
    }

    /// Path of the serialized popup session snapshot
    pub fn session_snapshot_path(&self) -> PathBuf {
        self.paths.data_dir.join("session.json")
    }
}
