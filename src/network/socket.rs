//! Downstream client socket.
//!
//! A `UserSocket` is the handle the rest of the bouncer holds for one client
//! connection. Writes go through a bounded queue drained by the connection's
//! writer task, so sending never blocks the caller. Reads stay with the
//! connection task in [`super::connection`].

use crate::account::Account;
use crate::config::BouncerConfig;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process-unique socket identifier.
pub type SocketId = u64;

/// Per-socket debug output toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugFlag {
    /// Echo every line this socket sends upstream back as a bot message.
    Upstream,
    /// Log command dispatch for this socket as bot messages.
    Commands,
}

impl DebugFlag {
    pub const ALL: [DebugFlag; 2] = [DebugFlag::Upstream, DebugFlag::Commands];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Commands => "commands",
        }
    }
}

impl fmt::Display for DebugFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugFlag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upstream" => Ok(Self::Upstream),
            "commands" => Ok(Self::Commands),
            _ => Err(()),
        }
    }
}

#[derive(Default)]
struct SocketState {
    nickname: String,
    account: Weak<Account>,
    sub_client: String,
    client_type: String,
    read_only: bool,
    debug: BTreeSet<DebugFlag>,
}

/// A downstream client connection.
pub struct UserSocket {
    id: SocketId,
    peer_addr: SocketAddr,
    cert_fingerprint: Option<String>,
    server_name: Arc<str>,
    bot_nick: Arc<str>,
    outgoing: mpsc::Sender<String>,
    closed: CancellationToken,
    state: RwLock<SocketState>,
}

impl UserSocket {
    /// Create a socket handle and the receiving end of its send queue.
    pub fn new(
        id: SocketId,
        peer_addr: SocketAddr,
        cert_fingerprint: Option<String>,
        config: &BouncerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(config.send_queue.max(1));
        let socket = Arc::new(Self {
            id,
            peer_addr,
            cert_fingerprint,
            server_name: Arc::from(config.name.as_str()),
            bot_nick: Arc::from(config.bot_nick.as_str()),
            outgoing: tx,
            closed: CancellationToken::new(),
            state: RwLock::new(SocketState::default()),
        });
        (socket, rx)
    }

    #[inline]
    pub fn id(&self) -> SocketId {
        self.id
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Uppercase hex SHA-256 of the client's TLS certificate, if one was presented.
    pub fn cert_fingerprint(&self) -> Option<&str> {
        self.cert_fingerprint.as_deref()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn bot_nick(&self) -> &str {
        &self.bot_nick
    }

    /// Current nickname, or `*` before one was given.
    pub fn nickname(&self) -> String {
        let state = self.state.read();
        if state.nickname.is_empty() {
            "*".to_string()
        } else {
            state.nickname.clone()
        }
    }

    pub fn set_nickname(&self, nick: &str) {
        self.state.write().nickname = nick.to_string();
    }

    /// The account this socket is bound to, if it is still alive.
    pub fn account(&self) -> Option<Arc<Account>> {
        self.state.read().account.upgrade()
    }

    /// Bind this socket to an account slot.
    pub fn bind(&self, account: &Arc<Account>, sub_client: &str, client_type: &str) {
        let mut state = self.state.write();
        state.account = Arc::downgrade(account);
        state.sub_client = sub_client.to_string();
        state.client_type = client_type.to_string();
    }

    pub fn sub_client(&self) -> String {
        self.state.read().sub_client.clone()
    }

    pub fn client_type(&self) -> String {
        self.state.read().client_type.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.read().read_only
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.state.write().read_only = read_only;
    }

    pub fn debug_flag(&self, flag: DebugFlag) -> bool {
        self.state.read().debug.contains(&flag)
    }

    pub fn set_debug_flag(&self, flag: DebugFlag, enabled: bool) {
        let mut state = self.state.write();
        if enabled {
            state.debug.insert(flag);
        } else {
            state.debug.remove(&flag);
        }
    }

    pub fn debug_flags(&self) -> Vec<DebugFlag> {
        self.state.read().debug.iter().copied().collect()
    }

    /// Queue a raw line (without CRLF).
    ///
    /// A client that lets its queue fill up is disconnected rather than
    /// allowed to stall fan-out to everyone else.
    pub fn send_line(&self, line: impl Into<String>) {
        if self.closed.is_cancelled() {
            return;
        }
        match self.outgoing.try_send(line.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(socket = self.id, peer = %self.peer_addr, "Send queue full, dropping client");
                self.close("SendQ exceeded");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.cancel();
                self.detach();
            }
        }
    }

    /// Send a NOTICE from the bouncer bot. Each line of `text` becomes one notice.
    pub fn send_bot_message(&self, text: impl AsRef<str>) {
        let nick = self.nickname();
        for line in text.as_ref().lines() {
            self.send_line(format!(
                ":{}!bouncer@{} NOTICE {} :{}",
                self.bot_nick, self.server_name, nick, line
            ));
        }
    }

    /// Send a bot message only when `flag` is enabled on this socket.
    pub fn send_debug(&self, flag: DebugFlag, text: impl AsRef<str>) {
        if self.debug_flag(flag) {
            self.send_bot_message(format!("[{flag}] {}", text.as_ref()));
        }
    }

    /// Send a numeric reply from the bouncer itself.
    pub fn send_protocol_error(&self, code: u16, context: &str, message: &str) {
        let nick = self.nickname();
        let line = if context.is_empty() {
            format!(":{} {:03} {} :{}", self.server_name, code, nick, message)
        } else {
            format!(
                ":{} {:03} {} {} :{}",
                self.server_name, code, nick, context, message
            )
        };
        self.send_line(line);
    }

    /// Send `ERROR`, stop the connection and unregister from the account.
    ///
    /// Safe to call more than once and from any task.
    pub fn close(&self, reason: &str) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self
            .outgoing
            .try_send(format!("ERROR :Closing link: {} ({})", self.peer_addr.ip(), reason));
        self.closed.cancel();
        debug!(socket = self.id, reason = %reason, "Socket closed");
        self.detach();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the socket is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn detach(&self) {
        if let Some(account) = self.account() {
            account.detach_socket(self);
        }
    }
}

impl fmt::Debug for UserSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSocket")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{drain, socket};
    use super::*;

    #[test]
    fn bot_message_format() {
        let (sock, mut rx) = socket(1, "127.0.0.1:5000", None);
        sock.set_nickname("alice");
        sock.send_bot_message("hello\nworld");
        assert_eq!(drain(&mut rx), vec![
            ":-BNC!bouncer@slbnc NOTICE alice :hello",
            ":-BNC!bouncer@slbnc NOTICE alice :world",
        ]);
    }

    #[test]
    fn protocol_error_before_nick() {
        let (sock, mut rx) = socket(1, "127.0.0.1:5000", None);
        sock.send_protocol_error(464, "", "Password incorrect");
        sock.send_protocol_error(431, "NICK", "No nickname given");
        assert_eq!(drain(&mut rx), vec![
            ":slbnc 464 * :Password incorrect",
            ":slbnc 431 * NICK :No nickname given",
        ]);
    }

    #[test]
    fn close_is_idempotent_and_silences() {
        let (sock, mut rx) = socket(1, "127.0.0.1:5000", None);
        sock.close("bye");
        sock.close("again");
        sock.send_line("PING :x");
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERROR :Closing link"));
        assert!(lines[0].contains("bye"));
        assert!(sock.is_closed());
    }

    #[test]
    fn full_queue_closes_socket() {
        let config = BouncerConfig {
            send_queue: 2,
            ..Default::default()
        };
        let (sock, _rx) = UserSocket::new(1, "127.0.0.1:1".parse().unwrap(), None, &config);
        sock.send_line("a");
        sock.send_line("b");
        assert!(!sock.is_closed());
        sock.send_line("c");
        assert!(sock.is_closed());
    }

    #[test]
    fn debug_flags_toggle() {
        let (sock, mut rx) = socket(1, "127.0.0.1:5000", None);
        sock.send_debug(DebugFlag::Upstream, "hidden");
        assert!(drain(&mut rx).is_empty());

        sock.set_debug_flag(DebugFlag::Upstream, true);
        sock.send_debug(DebugFlag::Upstream, "PRIVMSG #a :hi");
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(sock.debug_flags(), vec![DebugFlag::Upstream]);

        assert_eq!("COMMANDS".parse::<DebugFlag>(), Ok(DebugFlag::Commands));
        assert!("nope".parse::<DebugFlag>().is_err());
    }
}
