//! Upstream connection policy.
//!
//! These settings are shared by every account; the per-account server pool
//! and identity live on the account itself.

use serde::Deserialize;
use std::time::Duration;

/// Upstream connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Seconds allowed for the TCP (and TLS) connect.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Verify upstream TLS certificates against the system roots.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Connect accounts that have servers configured as soon as they are loaded.
    #[serde(default = "default_true")]
    pub autoconnect: bool,
    /// AWAY message set upstream while no client is attached.
    #[serde(default)]
    pub away_message: Option<String>,
    /// Lines buffered toward the upstream server.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            verify_tls: true,
            autoconnect: true,
            away_message: None,
            send_queue: default_send_queue(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Reconnect backoff policy.
///
/// The delay starts at `initial_delay` and doubles after every failed attempt
/// up to `max_delay`. `max_attempts = 0` retries forever.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let secs = self
            .initial_delay
            .saturating_mul(1u64 << shift)
            .min(self.max_delay.max(self.initial_delay));
        Duration::from_secs(secs)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_send_queue() -> usize {
    512
}

fn default_initial_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    20
}
