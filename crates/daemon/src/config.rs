//! Configuration management for the editd daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/editd/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::RootId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;

/// Default address the TCP transport listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4044";

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The listen address does not parse as a socket address.
    #[error("listen_addr is not a valid socket address: {0}")]
    InvalidListenAddr(String),

    /// The log level is not a known value.
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    /// No content roots are configured.
    #[error("no content roots configured; add at least one under [roots]")]
    NoRoots,

    /// A configured content root does not exist.
    #[error("content root {name:?} is not a directory: {path}")]
    MissingRoot {
        /// The root's name.
        name: String,
        /// The configured directory.
        path: String,
    },
}

/// Main configuration structure for the editd daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Content roots by name; workspace paths resolve against these.
    pub roots: BTreeMap<String, PathBuf>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the TCP transport listens on.
    pub listen_addr: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional directory for daily-rotated log files. Logs go to stderr
    /// only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("editd")
        .join("config.toml")
}

impl Config {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, falling back to defaults
    /// if the file does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - EDITD_LISTEN_ADDR: Override the transport listen address
    /// - EDITD_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("EDITD_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.daemon.listen_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("EDITD_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is unusable for a
    /// running daemon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(
                self.daemon.listen_addr.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        for (name, path) in &self.roots {
            if !path.is_dir() {
                return Err(ConfigError::MissingRoot {
                    name: name.clone(),
                    path: path.display().to_string(),
                });
            }
        }

        Ok(())
    }

    /// The session-scoped view of this configuration: the content root
    /// lookup handed to the session core at initialization.
    pub fn session_config(&self) -> SessionConfig {
        let roots = self
            .roots
            .iter()
            .map(|(name, path)| (RootId::new(name.clone()), path.clone()))
            .collect();
        SessionConfig::new(roots)
    }

    /// The configured root directories, for confining the file access
    /// provider.
    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.roots.values().cloned().collect()
    }
}
