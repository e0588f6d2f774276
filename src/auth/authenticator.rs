//! Handshake state machine for a freshly accepted socket.
//!
//! The authenticator consumes NICK, USER and PASS until the socket is bound
//! to an account or runs out of attempts. Its status is derived from the
//! fields received so far every time it is queried; nothing about the state
//! is stored separately.

use super::ident::Identity;
use super::password::dummy_verify;
use crate::account::Account;
use crate::bouncer::Bouncer;
use crate::irc::Line;
use crate::network::UserSocket;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Nickname or realname still missing.
    WaitingForNickOrUser,
    /// Identity known, password required and not yet supplied.
    WaitingForPass,
    /// Everything needed for an authentication attempt is present.
    Ready,
    /// Authenticated, or out of attempts.
    Finished,
}

/// Result of feeding one line to the authenticator.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Keep reading handshake lines.
    Continue,
    /// The socket is now attached to this account.
    Authenticated(Arc<Account>),
    /// The socket was closed.
    Closed,
}

pub struct Authenticator {
    bouncer: Arc<Bouncer>,
    socket: Arc<UserSocket>,
    nickname: Option<String>,
    realname: Option<String>,
    user_username: Option<String>,
    pass_username: Option<String>,
    password: Option<String>,
    sub_client: String,
    client_type: String,
    remaining_attempts: u32,
    need_password: bool,
    succeeded: bool,
    pass_hint_sent: bool,
}

impl Authenticator {
    pub fn new(bouncer: Arc<Bouncer>, socket: Arc<UserSocket>) -> Self {
        let remaining_attempts = bouncer.config().bouncer.max_auth_attempts;
        Self {
            bouncer,
            socket,
            nickname: None,
            realname: None,
            user_username: None,
            pass_username: None,
            password: None,
            sub_client: String::new(),
            client_type: String::new(),
            remaining_attempts,
            need_password: true,
            succeeded: false,
            pass_hint_sent: false,
        }
    }

    pub fn status(&self) -> AuthStatus {
        if self.remaining_attempts == 0 || self.succeeded {
            AuthStatus::Finished
        } else if self.nickname.is_none() || self.realname.is_none() {
            AuthStatus::WaitingForNickOrUser
        } else if self.need_password && self.password.is_none() {
            AuthStatus::WaitingForPass
        } else {
            AuthStatus::Ready
        }
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    pub fn needs_password(&self) -> bool {
        self.need_password
    }

    pub fn sub_client(&self) -> &str {
        &self.sub_client
    }

    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    pub fn set_nickname(&mut self, nick: &str) {
        self.socket.set_nickname(nick);
        self.nickname = Some(nick.to_string());
    }

    /// `USER <username> <mode> <unused> :<realname>`.
    pub fn set_user(&mut self, username: &str, realname: &str) {
        self.user_username = Some(username.to_string());
        self.realname = Some(realname.to_string());

        let identity = Identity::split(username);
        self.sub_client = identity.sub_client.clone();
        self.client_type = identity.client_type.clone();
        if self.need_password && self.probe_alternate(&identity) {
            debug!(socket = self.socket.id(), account = %identity.account, "Alternate auth satisfied by USER");
            self.need_password = false;
        }
    }

    /// `PASS <credential>`: `user:password`, a bare identity satisfied by an
    /// auth provider, or a bare password, tried in that order.
    pub fn set_password(&mut self, credential: &str) {
        if let Some((username, password)) = credential.split_once(':') {
            self.pass_username = Some(username.to_string());
            self.password = Some(password.to_string());
            return;
        }

        let identity = Identity::split(credential);
        if self.probe_alternate(&identity) {
            debug!(socket = self.socket.id(), account = %identity.account, "Alternate auth satisfied by PASS");
            self.pass_username = Some(credential.to_string());
            self.need_password = false;
        } else {
            self.password = Some(credential.to_string());
        }
    }

    /// Providers are pure, so probing has no side effects and can repeat.
    fn probe_alternate(&self, identity: &Identity) -> bool {
        self.bouncer
            .accounts()
            .get(&identity.account)
            .is_some_and(|account| {
                account.check_alternate_authentication(
                    self.bouncer.providers(),
                    &self.socket,
                    &identity.sub_client,
                )
            })
    }

    /// Attempt to authenticate with what has been received. Call when
    /// [`Self::status`] is [`AuthStatus::Ready`].
    pub fn authenticate(&mut self) -> Option<Arc<Account>> {
        let username = self
            .pass_username
            .clone()
            .or_else(|| self.user_username.clone())
            .unwrap_or_default();
        let identity = Identity::split(&username);
        self.sub_client = identity.sub_client.clone();
        self.client_type = identity.client_type.clone();

        let accounts = self.bouncer.accounts();
        let password = self.password.clone().filter(|p| !p.is_empty());

        if let Some(password) = password.as_deref()
            && !accounts.exists(&identity.account)
            && (accounts.count() == 0 || self.bouncer.config().bouncer.auto_create)
        {
            match accounts.create_account(&identity.account, Some(password)) {
                Ok(account) => {
                    let note = if account.is_admin() {
                        " You are an administrator."
                    } else {
                        ""
                    };
                    self.socket
                        .send_bot_message(format!("Created account {}.{}", account.name(), note));
                }
                Err(e) => {
                    warn!(account = %identity.account, error = %e, code = e.error_code(), "Auto-create failed");
                }
            }
        }

        let account = accounts.get(&identity.account);
        let authenticated = match &account {
            Some(account) => account.check_authentication(
                self.bouncer.providers(),
                &self.socket,
                &identity.sub_client,
                password.as_deref(),
            ),
            None => {
                dummy_verify(password.as_deref().unwrap_or_default());
                false
            }
        };

        match account {
            Some(account) if authenticated => {
                if let Some(reason) = account.suspended_reason() {
                    info!(account = %account.name(), socket = self.socket.id(), "Login to suspended account refused");
                    self.remaining_attempts = 0;
                    self.socket
                        .send_bot_message(format!("Your account is suspended: {reason}"));
                    self.socket.close(&format!("Account suspended: {reason}"));
                    return None;
                }

                self.succeeded = true;
                if !account.attach_socket(&self.socket, &identity.sub_client, &identity.client_type) {
                    debug!(account = %account.name(), socket = self.socket.id(), "Socket closed during login");
                    return None;
                }
                info!(
                    account = %account.name(),
                    socket = self.socket.id(),
                    peer = %self.socket.peer_addr(),
                    "Client authenticated"
                );
                Some(account)
            }
            _ => {
                self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
                info!(
                    account = %identity.account,
                    socket = self.socket.id(),
                    remaining = self.remaining_attempts,
                    "Authentication failed"
                );
                self.socket.send_protocol_error(464, "", "Password incorrect");
                self.socket.send_bot_message(format!(
                    "Authentication failed. {} attempt(s) remaining.",
                    self.remaining_attempts
                ));
                if self.remaining_attempts == 0 {
                    self.socket.close("Too many failed login attempts");
                } else {
                    self.password = None;
                }
                None
            }
        }
    }

    /// Feed one handshake line.
    pub fn handle_line(&mut self, raw: &str) -> HandshakeOutcome {
        let Some(line) = Line::parse(raw) else {
            return HandshakeOutcome::Continue;
        };

        match line.command.to_ascii_uppercase().as_str() {
            "NICK" => match line.param(0).filter(|n| !n.is_empty()) {
                Some(nick) => self.set_nickname(nick),
                None => self.socket.send_protocol_error(431, "", "No nickname given"),
            },
            "USER" => {
                if line.params.len() < 4 {
                    self.socket
                        .send_protocol_error(461, "USER", "Not enough parameters");
                } else {
                    self.set_user(line.params[0], line.params[3]);
                }
            }
            "PASS" => match line.param(0) {
                Some(credential) => self.set_password(credential),
                None => self
                    .socket
                    .send_protocol_error(461, "PASS", "Not enough parameters"),
            },
            "CAP" => self.handle_cap(&line),
            "PING" => {
                let token = line.param(0).unwrap_or_default();
                let server = self.socket.server_name().to_string();
                self.socket
                    .send_line(format!(":{server} PONG {server} :{token}"));
            }
            "QUIT" => {
                self.socket.close("Client quit");
                return HandshakeOutcome::Closed;
            }
            _ => self
                .socket
                .send_protocol_error(451, "", "You have not registered"),
        }

        match self.status() {
            AuthStatus::Ready => match self.authenticate() {
                Some(account) => HandshakeOutcome::Authenticated(account),
                None if self.socket.is_closed() => HandshakeOutcome::Closed,
                None => HandshakeOutcome::Continue,
            },
            AuthStatus::WaitingForPass => {
                if !self.pass_hint_sent {
                    self.pass_hint_sent = true;
                    self.socket.send_bot_message(
                        "This bouncer requires a password. Send PASS account:password \
                         (or PASS account+subclient:password) to log in.",
                    );
                }
                HandshakeOutcome::Continue
            }
            AuthStatus::Finished if self.socket.is_closed() => HandshakeOutcome::Closed,
            _ => HandshakeOutcome::Continue,
        }
    }

    /// Just enough CAP for clients that wait on `CAP LS` before registering.
    fn handle_cap(&self, line: &Line<'_>) {
        let server = self.socket.server_name();
        let nick = self.socket.nickname();
        match line.param(0).map(|s| s.to_ascii_uppercase()).as_deref() {
            Some("LS") | Some("LIST") => {
                let sub = line.param(0).unwrap_or("LS").to_ascii_uppercase();
                self.socket.send_line(format!(":{server} CAP {nick} {sub} :"));
            }
            Some("REQ") => {
                let caps = line.param(1).unwrap_or_default();
                self.socket.send_line(format!(":{server} CAP {nick} NAK :{caps}"));
            }
            _ => {}
        }
    }
}
