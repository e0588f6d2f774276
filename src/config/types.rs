//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::listen::{ListenConfig, TlsConfig};
use super::upstream::UpstreamConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bouncer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bouncer identity and authentication policy.
    #[serde(default)]
    pub bouncer: BouncerConfig,
    /// Plaintext listener.
    pub listen: ListenConfig,
    /// Optional TLS listener (required for certificate fingerprint auth).
    pub tls: Option<TlsConfig>,
    /// Account storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upstream connection policy shared by all accounts.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

/// Bouncer identity and authentication policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncerConfig {
    /// Name used as the prefix of locally generated numerics.
    #[serde(default = "default_name")]
    pub name: String,
    /// Nick of the pseudo-user that carries bouncer notices and commands.
    #[serde(default = "default_bot_nick")]
    pub bot_nick: String,
    /// Create unknown accounts on first login (the very first account is
    /// always created regardless of this setting).
    #[serde(default)]
    pub auto_create: bool,
    /// Wrong password attempts allowed per connection.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
    /// Seconds a new connection may spend authenticating.
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout: u64,
    /// Server type given to newly created accounts.
    #[serde(default = "default_server_type")]
    pub default_server_type: String,
    /// Lines buffered per downstream socket before it is dropped as too slow.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            bot_nick: default_bot_nick(),
            auto_create: false,
            max_auth_attempts: default_max_auth_attempts(),
            registration_timeout: default_registration_timeout(),
            default_server_type: default_server_type(),
            send_queue: default_send_queue(),
        }
    }
}

/// Account storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path of the redb account database.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_name() -> String {
    "slbnc".to_string()
}

fn default_bot_nick() -> String {
    "-BNC".to_string()
}

fn default_max_auth_attempts() -> u32 {
    3
}

fn default_registration_timeout() -> u64 {
    60
}

fn default_server_type() -> String {
    "irc".to_string()
}

fn default_send_queue() -> usize {
    1024
}

fn default_storage_path() -> String {
    "slbnc.redb".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
