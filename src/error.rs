//! Unified error handling for slbnc.
//!
//! Handshake failures are not errors here: the authenticator reports them on
//! the wire and tracks them as state. This module covers account
//! administration, upstream connections and command dispatch.

use crate::account::StoreError;
use thiserror::Error;

// ============================================================================
// Account Errors (registry and administration)
// ============================================================================

/// Errors raised by account administration.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account already exists: {0}")]
    AccountExists(String),

    #[error("no such account: {0}")]
    AccountNotFound(String),

    #[error("invalid account name: {0}")]
    InvalidName(String),

    #[error("invalid confirmation code")]
    InvalidConfirmationCode,

    #[error("no deletion pending for {0}")]
    NoPendingDeletion(String),

    #[error("you cannot do that to your own account")]
    SelfTarget,

    #[error("{0}")]
    AuthList(String),

    #[error("unknown server type: {0}")]
    UnknownServerType(String),

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl AccountError {
    /// Get a static error code string for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccountExists(_) => "account_exists",
            Self::AccountNotFound(_) => "account_not_found",
            Self::InvalidName(_) => "invalid_name",
            Self::InvalidConfirmationCode => "invalid_confirmation_code",
            Self::NoPendingDeletion(_) => "no_pending_deletion",
            Self::SelfTarget => "self_target",
            Self::AuthList(_) => "auth_list",
            Self::UnknownServerType(_) => "unknown_server_type",
            Self::Password(_) => "password",
            Self::Store(_) => "store_error",
        }
    }
}

// ============================================================================
// Upstream Errors (connection lifecycle)
// ============================================================================

/// Errors raised while connecting to or talking with an upstream server.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No configured server could be reached. Distinct from [`Self::Io`] so
    /// callers can tell "pool exhausted" from a failure on a live link.
    #[error("unable to connect {account}: {reason}")]
    UnableToConnect { account: String, reason: String },

    #[error("no servers configured")]
    NoServers,

    /// An explicit pool position (1-based) past the end of the pool.
    #[error("no server #{0}")]
    NoSuchServer(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("upstream connection closed")]
    Closed,

    #[error("send queue full")]
    Send,
}

impl UpstreamError {
    /// Get a static error code string for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnableToConnect { .. } => "unable_to_connect",
            Self::NoServers => "no_servers",
            Self::NoSuchServer(_) => "no_such_server",
            Self::Io(_) => "io_error",
            Self::Tls(_) => "tls_error",
            Self::Closed => "closed",
            Self::Send => "send_error",
        }
    }
}

// ============================================================================
// Command Errors (bot command dispatch)
// ============================================================================

/// Errors returned by bot commands. Every variant is reported back to the
/// issuing socket as a bot message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not enough parameters. Usage: {0}")]
    NeedMoreParams(&'static str),

    #[error("permission denied")]
    PermissionDenied,

    #[error("unknown command: {0}. Try 'help'")]
    UnknownCommand(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl CommandError {
    /// Get a static error code string for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams(_) => "need_more_params",
            Self::PermissionDenied => "permission_denied",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Invalid(_) => "invalid",
            Self::Account(e) => e.error_code(),
            Self::Upstream(e) => e.error_code(),
        }
    }
}

/// Result type for bot commands.
pub type CommandResult = Result<(), CommandError>;
