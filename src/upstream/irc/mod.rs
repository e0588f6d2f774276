//! The `irc` server type: accounts bounce a plain IRC network connection.

mod handler;
mod state;

pub use handler::IrcConnectionHandler;
pub use state::{Reaction, UpstreamState};

use super::stream::{self, UpstreamStream};
use super::{ConnectionHandler, ServerType};
use crate::account::{Account, ServerEntry};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::network::UserSocket;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Registry name of the IRC server type.
pub const IRC_SERVER_TYPE: &str = "irc";

pub struct IrcServerType {
    config: Arc<UpstreamConfig>,
    tasks: TaskTracker,
}

impl IrcServerType {
    pub fn new(config: UpstreamConfig, tasks: TaskTracker) -> Self {
        Self {
            config: Arc::new(config),
            tasks,
        }
    }

    /// Connect in the background, reporting failure to the account.
    fn spawn_connect(&self, account: &Arc<Account>) {
        let account = Arc::clone(account);
        self.tasks.spawn(async move {
            if let Err(e) = account.ensure_connection(-1).await {
                warn!(account = %account.name(), error = %e, "Upstream connect failed");
                account.send_bot_message_to_all(&format!("Unable to connect upstream: {e}"));
            }
        });
    }
}

#[async_trait]
impl ServerType for IrcServerType {
    fn name(&self) -> &str {
        IRC_SERVER_TYPE
    }

    fn description(&self) -> &str {
        "IRC network (RFC 1459/2812)"
    }

    fn activate(&self, account: &Arc<Account>) {
        debug!(account = %account.name(), "IRC server type activated");
        if self.config.autoconnect
            && !account.is_suspended()
            && !account.upstream().servers.is_empty()
        {
            self.spawn_connect(account);
        }
    }

    fn deactivate(&self, account: &Arc<Account>) {
        debug!(account = %account.name(), "IRC server type deactivated");
    }

    fn user_connected(&self, account: &Arc<Account>, socket: &Arc<UserSocket>) {
        match account.connection() {
            Some(handler) => {
                handler.user_connected(socket);
                if account.socket_count() == 1
                    && self.config.away_message.is_some()
                    && handler.is_connected()
                {
                    let _ = handler.send_line("AWAY");
                }
            }
            None => {
                send_local_welcome(socket);
                if account.upstream().servers.is_empty() {
                    socket.send_bot_message(
                        "No upstream servers configured. Use: server add <host> [+]<port>",
                    );
                } else {
                    socket.send_bot_message("Connecting upstream...");
                    self.spawn_connect(account);
                }
            }
        }
    }

    fn user_disconnected(&self, account: &Arc<Account>, _socket: &UserSocket) {
        if account.socket_count() > 0 {
            return;
        }
        if let Some(away) = &self.config.away_message
            && let Some(handler) = account.connection()
            && handler.is_connected()
        {
            let _ = handler.send_line(&format!("AWAY :{away}"));
        }
    }

    async fn new_connection_handler(
        &self,
        account: &Arc<Account>,
        server_index: isize,
    ) -> Result<Arc<dyn ConnectionHandler>, UpstreamError> {
        let servers = account.upstream().servers;
        let (stream, server) = connect_to_pool(&servers, server_index, &self.config)
            .await
            .map_err(|e| UpstreamError::UnableToConnect {
                account: account.name().to_string(),
                reason: e.to_string(),
            })?;

        info!(
            account = %account.name(),
            server = %server.label(),
            tls = stream.is_tls(),
            "Upstream connected"
        );
        let handler = IrcConnectionHandler::start(
            account,
            Arc::clone(&self.config),
            &self.tasks,
            stream,
            server,
        );
        Ok(handler)
    }
}

/// Order in which to try a pool of `len` servers.
///
/// A non-negative `index` is tried alone, and an out-of-range one yields
/// nothing. A negative `index` puts a random server first with the rest
/// following in list order.
fn pool_order(len: usize, index: isize) -> Vec<usize> {
    if let Ok(i) = usize::try_from(index) {
        return if i < len { vec![i] } else { Vec::new() };
    }
    if len == 0 {
        return Vec::new();
    }
    let start = rand::thread_rng().gen_range(0..len);
    (0..len).map(|offset| (start + offset) % len).collect()
}

/// Try servers from the pool until one connects.
pub(crate) async fn connect_to_pool(
    servers: &[ServerEntry],
    index: isize,
    config: &UpstreamConfig,
) -> Result<(UpstreamStream, ServerEntry), UpstreamError> {
    if servers.is_empty() {
        return Err(UpstreamError::NoServers);
    }
    if let Ok(i) = usize::try_from(index)
        && i >= servers.len()
    {
        return Err(UpstreamError::NoSuchServer(i + 1));
    }
    let mut last_error = UpstreamError::NoServers;
    for i in pool_order(servers.len(), index) {
        let server = &servers[i];
        match stream::connect(server, config).await {
            Ok(stream) => return Ok((stream, server.clone())),
            Err(e) => {
                warn!(server = %server.label(), error = %e, "Upstream connect attempt failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Minimal registration burst for a client attached while upstream is down.
pub(crate) fn send_local_welcome(socket: &UserSocket) {
    let server = socket.server_name();
    let nick = socket.nickname();
    let version = env!("CARGO_PKG_VERSION");
    socket.send_line(format!(":{server} 001 {nick} :Welcome to {server}, {nick}"));
    socket.send_line(format!(
        ":{server} 002 {nick} :Your host is {server}, running slbnc-{version}"
    ));
    socket.send_line(format!(
        ":{server} 003 {nick} :This bouncer is not connected to a network yet"
    ));
    socket.send_line(format!(":{server} 004 {nick} {server} slbnc-{version} o o"));
    socket.send_line(format!(":{server} 422 {nick} :MOTD File is missing"));
}
