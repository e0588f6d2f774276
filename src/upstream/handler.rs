//! The live upstream session of one account.

use crate::error::UpstreamError;
use crate::network::UserSocket;
use async_trait::async_trait;
use std::sync::Arc;

/// An account's upstream session: the single path through which the account
/// talks to its remote server.
///
/// A handler owns its own reconnect policy. It stays installed on the account
/// while it retries, and removes itself when it gives up.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Server the handler is connected (or connecting) to, for display.
    fn server_label(&self) -> String;

    /// Whether the upstream link is currently registered and usable.
    fn is_connected(&self) -> bool;

    /// Queue a raw line toward the upstream server.
    fn send_line(&self, line: &str) -> Result<(), UpstreamError>;

    /// A line arrived from a downstream socket.
    fn data_received(&self, socket: &Arc<UserSocket>, line: &str);

    /// A socket attached to the account; bring it up to date.
    fn user_connected(&self, socket: &Arc<UserSocket>);

    /// Tear the session down. Returns once the upstream task has stopped.
    async fn shutdown(&self, reason: &str);
}
