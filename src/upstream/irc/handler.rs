//! The per-account IRC session task.
//!
//! One task owns the upstream socket. It registers, answers `PING`, keeps
//! [`UpstreamState`] current, fans every other line out to the account's
//! sockets, and reconnects with backoff when the link drops. Downstream
//! lines reach it through a bounded queue.

use super::connect_to_pool;
use super::state::{Reaction, UpstreamState};
use crate::account::{Account, ServerEntry};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::irc::{Line, MAX_TAGGED_LINE_LEN, irc_eq};
use crate::network::{DebugFlag, UserSocket};
use crate::upstream::ConnectionHandler;
use crate::upstream::stream::UpstreamStream;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

/// Time allowed for the QUIT to flush on shutdown.
const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands a read-only socket may still send.
fn is_query(line: &Line<'_>) -> bool {
    match line.command.to_ascii_uppercase().as_str() {
        "WHO" | "WHOIS" | "WHOWAS" | "NAMES" | "LIST" | "ISON" | "USERHOST" | "PONG" => true,
        "MODE" | "TOPIC" => line.params.len() == 1,
        _ => false,
    }
}

/// Drop a leading `@tags` section.
fn strip_tags(raw: &str) -> &str {
    let raw = raw.trim_start();
    match raw.strip_prefix('@') {
        Some(rest) => rest.split_once(' ').map_or("", |(_, body)| body.trim_start()),
        None => raw,
    }
}

async fn write_line<S>(sink: &mut S, line: &str) -> Result<(), LinesCodecError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    sink.send(format!("{line}\r")).await
}

/// How one link ended.
enum LinkEnd {
    /// The owner shut the session down.
    Shutdown,
    /// The link failed; reconnect.
    Lost(String),
}

pub struct IrcConnectionHandler {
    account: Weak<Account>,
    account_name: String,
    config: Arc<UpstreamConfig>,
    server: RwLock<ServerEntry>,
    state: RwLock<UpstreamState>,
    connected: AtomicBool,
    link: Mutex<Option<mpsc::Sender<String>>>,
    cancel: CancellationToken,
    quit_reason: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IrcConnectionHandler {
    /// Take over a freshly connected stream and spawn the session task.
    pub(super) fn start(
        account: &Arc<Account>,
        config: Arc<UpstreamConfig>,
        tasks: &TaskTracker,
        stream: UpstreamStream,
        server: ServerEntry,
    ) -> Arc<Self> {
        let handler = Arc::new(Self {
            account: Arc::downgrade(account),
            account_name: account.name().to_string(),
            config,
            server: RwLock::new(server),
            state: RwLock::new(UpstreamState::default()),
            connected: AtomicBool::new(false),
            link: Mutex::new(None),
            cancel: CancellationToken::new(),
            quit_reason: Mutex::new(None),
            task: Mutex::new(None),
        });

        let span = info_span!("upstream", account = %handler.account_name);
        let task = tasks.spawn(Arc::clone(&handler).run(stream).instrument(span));
        *handler.task.lock() = Some(task);
        handler
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> UpstreamState {
        self.state.read().clone()
    }

    fn notify(&self, text: &str) {
        if let Some(account) = self.account.upgrade() {
            account.send_bot_message_to_all(text);
        }
    }

    async fn run(self: Arc<Self>, stream: UpstreamStream) {
        let mut next = Some(stream);
        let mut failures: u32 = 0;

        loop {
            let stream = match next.take() {
                Some(stream) => stream,
                None => match self.reconnect(&mut failures).await {
                    Some(stream) => stream,
                    None => break,
                },
            };

            let end = self.drive(stream).await;
            self.connected.store(false, Ordering::SeqCst);
            *self.link.lock() = None;

            match end {
                LinkEnd::Shutdown => {
                    debug!("Upstream session stopped");
                    return;
                }
                LinkEnd::Lost(reason) => {
                    let label = self.server_label();
                    warn!(server = %label, reason = %reason, "Upstream link lost");
                    self.notify(&format!("Disconnected from {label}: {reason}"));
                    failures = 0;
                }
            }
        }

        if let Some(account) = self.account.upgrade() {
            account.clear_connection_if(&*self);
        }
        info!("Upstream session gave up");
    }

    /// Wait out the backoff and try the pool again until a link is up, the
    /// attempt budget is spent, or the session is cancelled.
    async fn reconnect(&self, failures: &mut u32) -> Option<UpstreamStream> {
        loop {
            let account = self.account.upgrade()?;
            if account.is_retired() || account.is_suspended() {
                return None;
            }
            if self.config.reconnect.exhausted(*failures) {
                account.send_bot_message_to_all(&format!(
                    "Giving up on the upstream connection after {failures} failed attempt(s). Use 'connect' to retry."
                ));
                return None;
            }

            let delay = self.config.reconnect.delay_for(*failures + 1);
            account.send_bot_message_to_all(&format!(
                "Reconnecting in {}s (attempt {})...",
                delay.as_secs(),
                *failures + 1
            ));
            drop(account);

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let servers = self.account.upgrade()?.upstream().servers;
            if servers.is_empty() {
                self.notify("No servers configured; not reconnecting.");
                return None;
            }

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                attempt = connect_to_pool(&servers, -1, &self.config) => attempt,
            };
            match attempt {
                Ok((stream, server)) => {
                    info!(server = %server.label(), "Upstream reconnected");
                    *self.server.write() = server;
                    return Some(stream);
                }
                Err(e) => {
                    *failures += 1;
                    warn!(attempt = *failures, error = %e, "Upstream reconnect failed");
                    self.notify(&format!("Reconnect attempt {failures} failed: {e}"));
                }
            }
        }
    }

    /// Register on one link and pump lines until it ends.
    async fn drive(&self, stream: UpstreamStream) -> LinkEnd {
        let Some(account) = self.account.upgrade() else {
            return LinkEnd::Shutdown;
        };
        let settings = account.upstream();
        let name = account.name().to_string();
        drop(account);

        let server = self.server.read().clone();
        let nick = settings.nickname.clone().unwrap_or_else(|| name.clone());
        let username = settings.username.clone().unwrap_or_else(|| name.clone());
        let realname = settings.realname.clone().unwrap_or_else(|| name.clone());
        self.state
            .write()
            .begin_registration(&nick, settings.altnick.as_deref());

        let (tx, mut rx) = mpsc::channel(self.config.send_queue.max(1));
        *self.link.lock() = Some(tx);

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_TAGGED_LINE_LEN));
        let mut registration = Vec::with_capacity(3);
        if let Some(password) = &server.password {
            registration.push(format!("PASS {password}"));
        }
        registration.push(format!("NICK {nick}"));
        registration.push(format!("USER {username} 0 * :{realname}"));
        for line in &registration {
            if let Err(e) = write_line(&mut framed, line).await {
                return LinkEnd::Lost(e.to_string());
            }
        }
        debug!(server = %server.label(), nick = %nick, "Registration sent");

        let (mut sink, mut lines) = framed.split();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let reason = self
                        .quit_reason
                        .lock()
                        .clone()
                        .unwrap_or_else(|| "Bouncer shutting down".to_string());
                    let _ = tokio::time::timeout(QUIT_FLUSH_TIMEOUT, async {
                        let _ = write_line(&mut sink, &format!("QUIT :{reason}")).await;
                        let _ = sink.close().await;
                    })
                    .await;
                    return LinkEnd::Shutdown;
                }
                Some(line) = rx.recv() => {
                    if let Err(e) = write_line(&mut sink, &line).await {
                        return LinkEnd::Lost(e.to_string());
                    }
                }
                incoming = lines.next() => match incoming {
                    Some(Ok(line)) => {
                        for reply in self.handle_upstream_line(&line) {
                            if let Err(e) = write_line(&mut sink, &reply).await {
                                return LinkEnd::Lost(e.to_string());
                            }
                        }
                    }
                    Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                    None => return LinkEnd::Lost("connection closed by server".to_string()),
                },
            }
        }
    }

    /// Track and fan out one server line. Returns lines to write back.
    fn handle_upstream_line(&self, raw: &str) -> Vec<String> {
        let reaction = self.state.write().observe(raw);
        let account = self.account.upgrade();

        match reaction {
            Reaction::Pong(token) => vec![format!("PONG :{token}")],
            Reaction::Retry(nick) => {
                debug!(nick = %nick, "Nick rejected, retrying");
                vec![format!("NICK {nick}")]
            }
            Reaction::Registered { nick } => {
                self.connected.store(true, Ordering::SeqCst);
                let label = self.server_label();
                info!(server = %label, nick = %nick, "Upstream registered");

                let mut replies = Vec::new();
                if let Some(account) = &account {
                    for socket in account.sockets() {
                        let current = socket.nickname();
                        if !irc_eq(&current, &nick) {
                            socket.send_line(format!(":{current} NICK {nick}"));
                            socket.set_nickname(&nick);
                        }
                    }
                    account.send_line_to_all(raw);
                    account.send_bot_message_to_all(&format!("Connected to {label}."));
                    if account.socket_count() == 0
                        && let Some(away) = &self.config.away_message
                    {
                        replies.push(format!("AWAY :{away}"));
                    }
                }
                for channel in self.state.write().take_channels() {
                    replies.push(format!("JOIN {channel}"));
                }
                replies
            }
            Reaction::NickChanged { new, .. } => {
                if let Some(account) = &account {
                    for socket in account.sockets() {
                        socket.set_nickname(&new);
                    }
                    account.send_line_to_all(raw);
                }
                Vec::new()
            }
            Reaction::None => {
                if let Some(account) = &account {
                    account.send_line_to_all(raw);
                }
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for IrcConnectionHandler {
    fn server_label(&self) -> String {
        self.server.read().label()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_line(&self, line: &str) -> Result<(), UpstreamError> {
        let link = self.link.lock().clone();
        let Some(link) = link else {
            return Err(UpstreamError::Closed);
        };
        link.try_send(line.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => UpstreamError::Send,
            mpsc::error::TrySendError::Closed(_) => UpstreamError::Closed,
        })
    }

    fn data_received(&self, socket: &Arc<UserSocket>, raw: &str) {
        let Some(line) = Line::parse(raw) else {
            return;
        };
        let command = line.command.to_ascii_uppercase();

        match command.as_str() {
            "QUIT" => {
                socket.close("Client quit");
                return;
            }
            "PING" => {
                let server = self
                    .state
                    .read()
                    .server_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| socket.server_name().to_string());
                socket.send_line(format!(
                    ":{server} PONG {server} :{}",
                    line.param(0).unwrap_or_default()
                ));
                return;
            }
            // Registration is the bouncer's business once attached.
            "CAP" | "PASS" | "USER" => return,
            _ => {}
        }

        if socket.is_read_only() && !is_query(&line) {
            socket.send_bot_message(format!(
                "This connection is read-only; {command} was not sent."
            ));
            return;
        }
        if !self.is_connected() {
            socket.send_bot_message(format!(
                "Not connected to a server; {command} was not sent."
            ));
            return;
        }

        let body = strip_tags(raw);
        socket.send_debug(DebugFlag::Upstream, format!("-> {body}"));
        if let Err(e) = self.send_line(body) {
            warn!(account = %self.account_name, error = %e, "Dropping line to upstream");
            socket.send_bot_message(format!("Could not send to server: {e}"));
            return;
        }

        if matches!(command.as_str(), "PRIVMSG" | "NOTICE")
            && let Some(account) = socket.account()
        {
            let nick = self.state.read().nick().to_string();
            account.send_line_to_others(socket.id(), &format!(":{nick} {body}"));
        }
    }

    fn user_connected(&self, socket: &Arc<UserSocket>) {
        let (registered, nick, burst, channels) = {
            let state = self.state.read();
            (
                state.is_registered(),
                state.nick().to_string(),
                state.burst_for(state.nick()),
                state.channels(),
            )
        };

        if !registered {
            super::send_local_welcome(socket);
            socket.send_bot_message(format!("Connecting to {}...", self.server_label()));
            return;
        }

        let current = socket.nickname();
        if !irc_eq(&current, &nick) {
            socket.send_line(format!(":{current} NICK {nick}"));
            socket.set_nickname(&nick);
        }
        for line in burst {
            socket.send_line(line);
        }
        for channel in channels {
            socket.send_line(format!(":{nick} JOIN {channel}"));
            let _ = self.send_line(&format!("TOPIC {channel}"));
            let _ = self.send_line(&format!("NAMES {channel}"));
        }
    }

    async fn shutdown(&self, reason: &str) {
        self.quit_reason
            .lock()
            .get_or_insert_with(|| reason.to_string());
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.link.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_whitelist() {
        let ok = ["WHO #a", "whois bob", "NAMES #a", "MODE #a", "TOPIC #a", "PONG :x", "LIST"];
        for raw in ok {
            assert!(is_query(&Line::parse(raw).unwrap()), "{raw}");
        }
        let refused = ["PRIVMSG #a :hi", "MODE #a +o bob", "TOPIC #a :new", "JOIN #b", "NICK x"];
        for raw in refused {
            assert!(!is_query(&Line::parse(raw).unwrap()), "{raw}");
        }
    }

    #[test]
    fn tags_are_stripped() {
        assert_eq!(strip_tags("@label=1 PRIVMSG #a :hi"), "PRIVMSG #a :hi");
        assert_eq!(strip_tags("PRIVMSG #a :hi"), "PRIVMSG #a :hi");
        assert_eq!(strip_tags("@only"), "");
    }
}
