//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{ClientAuth, Config};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bouncer.name is required")]
    MissingName,
    #[error("bouncer.bot_nick must be a single token, got '{0}'")]
    InvalidBotNick(String),
    #[error("bouncer.max_auth_attempts must be at least 1")]
    ZeroAuthAttempts,
    #[error("bouncer.send_queue must be at least 1")]
    ZeroSendQueue,
    #[error("tls.cert_path does not exist: {0}")]
    TlsCertNotFound(String),
    #[error("tls.key_path does not exist: {0}")]
    TlsKeyNotFound(String),
    #[error("tls.ca_path is required when client_auth is enabled")]
    TlsCaMissing,
    #[error("storage.path parent directory does not exist: {0}")]
    StoragePathInvalid(String),
    #[error("upstream.reconnect.max_delay ({max}) is smaller than initial_delay ({initial})")]
    ReconnectDelays { initial: u64, max: u64 },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bouncer.name.is_empty() {
        errors.push(ValidationError::MissingName);
    }
    let bot = &config.bouncer.bot_nick;
    if bot.is_empty() || bot.contains([' ', ':', '!', '@']) {
        errors.push(ValidationError::InvalidBotNick(bot.clone()));
    }
    if config.bouncer.max_auth_attempts == 0 {
        errors.push(ValidationError::ZeroAuthAttempts);
    }
    if config.bouncer.send_queue == 0 || config.upstream.send_queue == 0 {
        errors.push(ValidationError::ZeroSendQueue);
    }

    if let Some(ref tls) = config.tls {
        if !Path::new(&tls.cert_path).exists() {
            errors.push(ValidationError::TlsCertNotFound(tls.cert_path.clone()));
        }
        if !Path::new(&tls.key_path).exists() {
            errors.push(ValidationError::TlsKeyNotFound(tls.key_path.clone()));
        }
        if tls.client_auth != ClientAuth::None && tls.ca_path.is_none() {
            errors.push(ValidationError::TlsCaMissing);
        }
    }

    let storage = Path::new(&config.storage.path);
    if let Some(parent) = storage.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::StoragePathInvalid(config.storage.path.clone()));
    }

    let reconnect = &config.upstream.reconnect;
    if reconnect.max_delay < reconnect.initial_delay {
        errors.push(ValidationError::ReconnectDelays {
            initial: reconnect.initial_delay,
            max: reconnect.max_delay,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
