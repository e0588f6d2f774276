//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, BouncerConfig, StorageConfig, LoggingConfig)
//! - [`listen`]: Downstream listener configuration (ListenConfig, TlsConfig, ClientAuth)
//! - [`upstream`]: Upstream connection policy (UpstreamConfig, ReconnectConfig)
//! - [`validation`]: Startup validation of a loaded config

mod listen;
mod types;
mod upstream;
pub mod validation;

pub use listen::{ClientAuth, ListenConfig, TlsConfig};
pub use types::{BouncerConfig, Config, ConfigError, LogFormat, LoggingConfig, StorageConfig};
pub use upstream::{ReconnectConfig, UpstreamConfig};
