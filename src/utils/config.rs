//! Configuration management for the LAN messenger.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters.

use crate::crypto::SecureTransport;
use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "messenger.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "MESSENGER";

/// Directory under the platform config dir searched for [`DEFAULT_CONFIG_FILE`]
pub const APP_DIR_NAME: &str = "lan-messenger";

/// Complete configuration for the messenger application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Network configuration
    pub network: NetworkConfig,
    /// Cryptographic configuration
    pub crypto: CryptoConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sockets and discovery timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address both sockets bind to
    pub bind_address: String,
    /// UDP port for presence announcements
    pub discovery_port: u16,
    /// UDP port for sealed messages
    pub message_port: u16,
    /// Destination address for announcements
    pub broadcast_address: String,
    /// Seconds between announcements
    pub announce_interval_secs: u64,
}

/// Cryptographic configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Hex-encoded 256-bit key shared out of band. A fresh key is generated
    /// per process when absent, which only lets an instance talk to itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory received files are written to
    pub received_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            discovery_port: crate::defaults::DISCOVERY_PORT,
            message_port: crate::defaults::MESSAGE_PORT,
            broadcast_address: crate::defaults::BROADCAST_ADDRESS.to_string(),
            announce_interval_secs: crate::defaults::ANNOUNCE_INTERVAL.as_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            received_dir: PathBuf::from(crate::defaults::RECEIVED_DIR),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Socket address for the discovery listener
    pub fn discovery_bind_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.discovery_port))
    }

    /// Socket address for the message listener
    pub fn message_bind_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.message_port))
    }

    /// Parsed broadcast destination
    pub fn broadcast_ip(&self) -> Result<IpAddr> {
        parse_ip("network.broadcast_address", &self.broadcast_address)
    }

    fn bind_ip(&self) -> Result<IpAddr> {
        parse_ip("network.bind_address", &self.bind_address)
    }
}

impl CryptoConfig {
    /// Build the transport from the shared key, or generate a fresh one
    pub fn build_transport(&self) -> Result<SecureTransport> {
        match &self.shared_key {
            Some(key) => SecureTransport::from_key_hex(key.trim()),
            None => Ok(SecureTransport::generate()),
        }
    }
}

fn parse_ip(field: &str, value: &str) -> Result<IpAddr> {
    value.parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

impl MessengerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit `config_file` must exist. Without one, the working
    /// directory and then the platform config directory are searched.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            config = config.merge(Self::from_file(path)?);
        } else {
            for location in Self::default_locations() {
                if location.exists() {
                    log::debug!("Loading configuration from {}", location.display());
                    config = config.merge(Self::from_file(&location)?);
                    break;
                }
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Places searched when no configuration file is given
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join(APP_DIR_NAME).join(DEFAULT_CONFIG_FILE));
        }
        locations
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Merge this configuration with another, preferring values from other
    pub fn merge(mut self, other: Self) -> Self {
        self.network = other.network;
        self.crypto = other.crypto;
        self.storage = other.storage;
        self.logging = other.logging;
        self
    }

    /// Apply `MESSENGER_*` environment overrides
    pub fn merge_from_env(self) -> Result<Self> {
        self.merge_from_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `var`, keyed by full variable name
    pub fn merge_from_vars<F>(mut self, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |suffix: &str| format!("{ENV_PREFIX}_{suffix}");

        if let Some(port) = var(&key("DISCOVERY_PORT")) {
            self.network.discovery_port = parse_port(&key("DISCOVERY_PORT"), port)?;
        }
        if let Some(port) = var(&key("MESSAGE_PORT")) {
            self.network.message_port = parse_port(&key("MESSAGE_PORT"), port)?;
        }
        if let Some(address) = var(&key("BROADCAST_ADDRESS")) {
            self.network.broadcast_address = address;
        }
        if let Some(shared_key) = var(&key("SHARED_KEY")) {
            self.crypto.shared_key = Some(shared_key);
        }
        if let Some(dir) = var(&key("RECEIVED_DIR")) {
            self.storage.received_dir = PathBuf::from(dir);
        }
        if let Some(level) = var(&key("LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        let network = &self.network;
        for (field, port) in [
            ("network.discovery_port", network.discovery_port),
            ("network.message_port", network.message_port),
        ] {
            if port == 0 {
                return Err(invalid(field, "0"));
            }
        }
        if network.discovery_port == network.message_port {
            return Err(invalid(
                "network.message_port",
                &format!("{} (same as discovery_port)", network.message_port),
            ));
        }
        if network.announce_interval_secs == 0 {
            return Err(invalid("network.announce_interval_secs", "0"));
        }
        network.discovery_bind_addr()?;
        network.broadcast_ip()?;

        if let Some(key) = &self.crypto.shared_key {
            if SecureTransport::from_key_hex(key.trim()).is_err() {
                // Never echo key material
                return Err(invalid("crypto.shared_key", "<malformed>"));
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(invalid("logging.level", &self.logging.level)),
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let dir = &self.storage.received_dir;
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|_| ConfigError::DirectoryCreation {
                path: dir.display().to_string(),
            })?;
        }
        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn parse_port(field: &str, value: String) -> Result<u16> {
    value.parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into()
    })
}

fn invalid(field: &str, value: &str) -> crate::MessengerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
