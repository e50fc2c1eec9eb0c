//! Configuration management for the fsgate gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/fsgate/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{MachineId, MachineInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("upload_buffer_size must be greater than 0, got {0}")]
    InvalidUploadBufferSize(usize),

    #[error("operation_timeout_secs must be at most 86400, got {0}")]
    InvalidOperationTimeout(u64),

    #[error("machine id {0} is configured more than once")]
    DuplicateMachine(MachineId),

    #[error("machine {0} has an empty host")]
    EmptyHost(MachineId),

    #[error("machine {0} has an empty username")]
    EmptyUsername(MachineId),

    #[error("machine {0} needs a password or a private_key_path")]
    MissingCredentials(MachineId),

    #[error("machine {id} host_key_fingerprint must look like SHA256:<base64>, got {value}")]
    InvalidFingerprint { id: MachineId, value: String },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General gateway configuration.
    pub gateway: GatewayConfig,

    /// Upload/write tuning.
    pub transfer: TransferConfig,

    /// Managed machines reachable over SSH.
    pub machines: Vec<MachineConfig>,
}

/// General gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory for gateway data (mount store, logs).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Path of the JSON mount store. Defaults to `<data_dir>/mounts.json`.
    pub mount_store: Option<PathBuf>,

    /// Deadline for a single remote step in seconds (0 = no deadline).
    pub operation_timeout_secs: u64,
}

/// Upload/write tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes copied per chunk while streaming an upload.
    pub upload_buffer_size: usize,
}

/// A managed machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub id: MachineId,
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Pinned host key, `SHA256:<base64>` as printed by `ssh-keygen -lf`.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl MachineConfig {
    /// Descriptor used for audit attribution.
    pub fn info(&self) -> MachineInfo {
        MachineInfo {
            id: self.id,
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }

    /// TCP connect and socket timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            mount_store: None,
            operation_timeout_secs: 300,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_buffer_size: 32 * 1024, // 32KB
        }
    }
}

impl GatewayConfig {
    /// Resolved mount store path.
    pub fn mount_store_path(&self) -> PathBuf {
        self.mount_store
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mounts.json"))
    }

    /// Per-step deadline, if any.
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsgate")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsgate")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FSGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FSGATE_MOUNT_STORE: Override the mount store path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FSGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.gateway.log_level = level;
            }
        }

        if let Ok(store) = std::env::var("FSGATE_MOUNT_STORE") {
            if !store.is_empty() {
                tracing::info!("Overriding mount_store from environment: {}", store);
                self.gateway.mount_store = Some(PathBuf::from(store));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.gateway.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.gateway.log_level.clone()));
        }

        if self.transfer.upload_buffer_size == 0 {
            return Err(ConfigError::InvalidUploadBufferSize(
                self.transfer.upload_buffer_size,
            ));
        }

        if self.gateway.operation_timeout_secs > 86400 {
            return Err(ConfigError::InvalidOperationTimeout(
                self.gateway.operation_timeout_secs,
            ));
        }

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.id) {
                return Err(ConfigError::DuplicateMachine(machine.id));
            }
            if machine.host.trim().is_empty() {
                return Err(ConfigError::EmptyHost(machine.id));
            }
            if machine.username.trim().is_empty() {
                return Err(ConfigError::EmptyUsername(machine.id));
            }
            if machine.password.is_none() && machine.private_key_path.is_none() {
                return Err(ConfigError::MissingCredentials(machine.id));
            }
            if let Some(ref fp) = machine.host_key_fingerprint {
                let valid = fp
                    .strip_prefix("SHA256:")
                    .map(|b64| !b64.is_empty())
                    .unwrap_or(false);
                if !valid {
                    return Err(ConfigError::InvalidFingerprint {
                        id: machine.id,
                        value: fp.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
