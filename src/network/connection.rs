//! Connection - one downstream client, from first byte to close.
//!
//! Each connection runs in its own task:
//!
//! ```text
//! Phase 1: Handshake (Authenticator, bounded by registration_timeout)
//!    ↓
//! Phase 2: Attached loop
//!    reader ──▶ bot command?  ──▶ CommandRegistry
//!           └─▶ otherwise     ──▶ ConnectionHandler::data_received
//!    writer ◀── UserSocket send queue (fan-out, replies, bot notices)
//! ```

use crate::account::Account;
use crate::auth::{Authenticator, HandshakeOutcome};
use crate::bouncer::Bouncer;
use crate::commands::{CommandContext, CommandRegistry};
use crate::irc::{Line, MAX_TAGGED_LINE_LEN};
use crate::network::UserSocket;
use futures_util::{SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A client connection handler.
pub struct Connection<S> {
    bouncer: Arc<Bouncer>,
    stream: S,
    addr: SocketAddr,
    cert_fingerprint: Option<String>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        bouncer: Arc<Bouncer>,
        stream: S,
        addr: SocketAddr,
        cert_fingerprint: Option<String>,
    ) -> Self {
        Self {
            bouncer,
            stream,
            addr,
            cert_fingerprint,
        }
    }

    /// Run the connection until the client leaves or is closed.
    #[instrument(skip(self), fields(addr = %self.addr), name = "connection")]
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            bouncer,
            stream,
            addr,
            cert_fingerprint,
        } = self;

        let config = bouncer.config();
        let (socket, outgoing) = UserSocket::new(
            bouncer.next_socket_id(),
            addr,
            cert_fingerprint,
            &config.bouncer,
        );
        debug!(socket = socket.id(), tls_cert = socket.cert_fingerprint().is_some(), "Client connected");

        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_TAGGED_LINE_LEN));
        let (sink, mut lines) = framed.split();
        let writer = tokio::spawn(write_loop(sink, outgoing, socket.closed_token()));

        // Phase 1: Handshake
        let mut auth = Authenticator::new(Arc::clone(&bouncer), Arc::clone(&socket));
        let timeout = Duration::from_secs(config.bouncer.registration_timeout);
        let account = match tokio::time::timeout(timeout, handshake(&mut auth, &mut lines, &socket)).await {
            Ok(Some(account)) => Some(account),
            Ok(None) => None,
            Err(_) => {
                info!(socket = socket.id(), "Registration timed out");
                socket.close("Registration timed out");
                None
            }
        };

        // Phase 2: Attached loop
        if let Some(account) = account {
            info!(
                socket = socket.id(),
                account = %account.name(),
                sub_client = %socket.sub_client(),
                "Client logged in"
            );
            let closed = socket.closed_token();
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    line = lines.next() => match line {
                        Some(Ok(line)) => dispatch_line(&bouncer, &socket, &account, &line).await,
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            socket.close("Line too long");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(socket = socket.id(), error = %e, "Read error");
                            break;
                        }
                        None => break,
                    },
                }
            }
        }

        socket.close("Client disconnected");
        let _ = writer.await;
        info!(socket = socket.id(), "Client disconnected");
        Ok(())
    }
}

/// Feed lines to the authenticator until it settles.
async fn handshake<R>(
    auth: &mut Authenticator,
    lines: &mut R,
    socket: &UserSocket,
) -> Option<Arc<Account>>
where
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    let closed = socket.closed_token();
    loop {
        tokio::select! {
            _ = closed.cancelled() => return None,
            line = lines.next() => match line {
                Some(Ok(line)) => match auth.handle_line(&line) {
                    HandshakeOutcome::Continue => {}
                    HandshakeOutcome::Authenticated(account) => return Some(account),
                    HandshakeOutcome::Closed => return None,
                },
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    socket.close("Line too long");
                    return None;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Read error during handshake");
                    return None;
                }
                None => {
                    debug!("Client disconnected during handshake");
                    return None;
                }
            },
        }
    }
}

/// Route one line from an attached client.
async fn dispatch_line(bouncer: &Arc<Bouncer>, socket: &Arc<UserSocket>, account: &Arc<Account>, raw: &str) {
    if raw.trim().is_empty() {
        return;
    }

    if let Some(text) = CommandRegistry::extract(raw, socket.bot_nick()) {
        let ctx = CommandContext {
            bouncer,
            socket,
            account,
        };
        bouncer.commands().dispatch(&ctx, text).await;
        return;
    }

    match account.connection() {
        Some(handler) => handler.data_received(socket, raw),
        None => handle_offline(socket, raw),
    }
}

/// Client-only handling while the account has no upstream session.
fn handle_offline(socket: &UserSocket, raw: &str) {
    let Some(line) = Line::parse(raw) else {
        return;
    };
    let command = line.command.to_ascii_uppercase();
    match command.as_str() {
        "QUIT" => socket.close("Client quit"),
        "PING" => {
            let server = socket.server_name();
            socket.send_line(format!(
                ":{server} PONG {server} :{}",
                line.param(0).unwrap_or_default()
            ));
        }
        "PONG" | "CAP" | "PASS" | "USER" => {}
        _ => socket.send_bot_message(format!(
            "Not connected to a server; {command} was not sent. Use 'connect' to connect."
        )),
    }
}

/// Drain the socket's send queue onto the wire. Once the socket is closed,
/// whatever is still queued (the final `ERROR`) is flushed and the loop ends.
async fn write_loop<W>(mut sink: W, mut outgoing: mpsc::Receiver<String>, closed: CancellationToken)
where
    W: futures_util::Sink<String, Error = LinesCodecError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            line = outgoing.recv() => match line {
                Some(line) => {
                    if let Err(e) = sink.send(format!("{line}\r")).await {
                        debug!(error = %e, "Write error");
                        break;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => {
                while let Ok(line) = outgoing.try_recv() {
                    if sink.send(format!("{line}\r")).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}
