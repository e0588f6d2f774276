//! Bouncer bot commands.
//!
//! Clients talk to the bouncer by messaging its bot nick
//! (`PRIVMSG -BNC :help`) or with a raw `BNC help` line. Each command gets
//! the issuing socket, its account and the parsed parameters, and writes its
//! replies into a [`CommandOutput`] that is flushed back as bot notices.

mod admin;
mod session;
mod upstream;

use crate::account::Account;
use crate::bouncer::Bouncer;
use crate::error::{CommandError, CommandResult};
use crate::irc::{Line, irc_eq};
use crate::network::{DebugFlag, UserSocket};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

/// Raw line prefix that addresses the bouncer directly.
pub const RAW_PREFIX: &str = "BNC";

/// Everything a command may touch.
pub struct CommandContext<'a> {
    pub bouncer: &'a Arc<Bouncer>,
    pub socket: &'a Arc<UserSocket>,
    pub account: &'a Arc<Account>,
}

impl CommandContext<'_> {
    /// Persist the issuing account after a change.
    pub fn save(&self) -> CommandResult {
        self.bouncer.accounts().save_account(self.account)?;
        Ok(())
    }
}

/// Reply buffer, flushed to the issuing socket as bot messages.
#[derive(Debug, Default)]
pub struct CommandOutput {
    lines: Vec<String>,
}

impl CommandOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn flush(self, socket: &UserSocket) {
        for line in self.lines {
            socket.send_bot_message(line);
        }
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    /// Lower-case command keyword.
    fn name(&self) -> &'static str;

    /// Argument synopsis, e.g. `connect [index]`.
    fn usage(&self) -> &'static str;

    /// One-line description.
    fn help(&self) -> &'static str;

    fn admin_only(&self) -> bool {
        false
    }

    /// Whether this invocation changes account state. Read-only sockets may
    /// not run mutating commands.
    fn mutating(&self, _params: &[&str]) -> bool {
        false
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult;
}

/// Name-keyed command registry.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Box<dyn Command>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Create a registry with all built-in commands registered.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };

        registry.register(Box::new(session::HelpCommand));
        registry.register(Box::new(session::AuthListCommand));
        registry.register(Box::new(session::SubClientsCommand));
        registry.register(Box::new(session::SetCommand));
        registry.register(Box::new(session::ReadOnlyCommand));
        registry.register(Box::new(session::DebugCommand));

        registry.register(Box::new(upstream::ServerCommand));
        registry.register(Box::new(upstream::ConnectCommand));
        registry.register(Box::new(upstream::DisconnectCommand));

        registry.register(Box::new(admin::AddAccountCommand));
        registry.register(Box::new(admin::DeleteAccountCommand));
        registry.register(Box::new(admin::SuspendCommand));
        registry.register(Box::new(admin::UnsuspendCommand));
        registry.register(Box::new(admin::SetAdminCommand));
        registry.register(Box::new(admin::AccountsCommand));
        registry.register(Box::new(admin::ShutdownCommand));

        registry
    }

    /// Register a command, replacing any with the same name.
    pub fn register(&mut self, command: Box<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands
            .get(name.to_ascii_lowercase().as_str())
            .map(|c| c.as_ref())
    }

    /// Commands visible to a user, sorted by name.
    pub fn visible(&self, admin: bool) -> Vec<&dyn Command> {
        let mut list: Vec<&dyn Command> = self
            .commands
            .values()
            .map(|c| c.as_ref())
            .filter(|c| admin || !c.admin_only())
            .collect();
        list.sort_by_key(|c| c.name());
        list
    }

    /// If `raw` addresses the bouncer, return the command text.
    pub fn extract<'a>(raw: &'a str, bot_nick: &str) -> Option<&'a str> {
        let line = Line::parse(raw)?;
        if line.is("PRIVMSG") && line.param(0).is_some_and(|t| irc_eq(t, bot_nick)) {
            return line.param(1);
        }
        if line.is(RAW_PREFIX) {
            let trimmed = raw.trim_start();
            return Some(trimmed.get(RAW_PREFIX.len()..).unwrap_or_default().trim_start());
        }
        None
    }

    /// Run one command line and flush its replies to the socket.
    pub async fn dispatch(&self, ctx: &CommandContext<'_>, text: &str) {
        let mut words = text.split_whitespace();
        let Some(name) = words.next() else {
            return;
        };
        let params: Vec<&str> = words.collect();
        let name = name.to_ascii_lowercase();

        let span = info_span!(
            "command",
            command = %name,
            account = %ctx.account.name(),
            socket = ctx.socket.id()
        );

        let mut out = CommandOutput::new();
        let result = self
            .run(ctx, &name, &params, &mut out)
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                ctx.socket
                    .send_debug(DebugFlag::Commands, format!("{name}: ok"));
            }
            Err(e) => {
                debug!(command = %name, code = e.error_code(), error = %e, "Command failed");
                ctx.socket
                    .send_debug(DebugFlag::Commands, format!("{name}: {}", e.error_code()));
                out.push(format!("Error: {e}"));
            }
        }
        out.flush(ctx.socket);
    }

    async fn run(
        &self,
        ctx: &CommandContext<'_>,
        name: &str,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let command = self
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        if command.admin_only() && !ctx.account.is_admin() {
            return Err(CommandError::PermissionDenied);
        }
        if ctx.socket.is_read_only() && command.mutating(params) {
            return Err(CommandError::Invalid(
                "this connection is read-only".to_string(),
            ));
        }
        command.handle(ctx, params, out).await
    }
}

/// Parse `on`/`off` style toggles.
pub(crate) fn parse_toggle(value: &str) -> Result<bool, CommandError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Ok(true),
        "off" | "no" | "false" | "0" => Ok(false),
        _ => Err(CommandError::Invalid(format!(
            "expected on or off, got '{value}'"
        ))),
    }
}

pub(crate) fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
