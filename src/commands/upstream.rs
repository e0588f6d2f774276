//! Upstream commands: server pool management and manual connect/disconnect.

use super::{Command, CommandContext, CommandOutput};
use crate::account::ServerEntry;
use crate::error::{CommandError, CommandResult, UpstreamError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

// ============================================================================
// server
// ============================================================================

pub struct ServerCommand;

#[async_trait]
impl Command for ServerCommand {
    fn name(&self) -> &'static str {
        "server"
    }

    fn usage(&self) -> &'static str {
        "server [list | add <host> [+]<port> [password] | del <number>]"
    }

    fn help(&self) -> &'static str {
        "Manage the upstream server list (+port means TLS)"
    }

    fn mutating(&self, params: &[&str]) -> bool {
        params
            .first()
            .is_some_and(|p| matches!(p.to_ascii_uppercase().as_str(), "ADD" | "DEL"))
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let subcommand = params
            .first()
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_else(|| "LIST".to_string());

        match subcommand.as_str() {
            "LIST" => {
                let servers = ctx.account.upstream().servers;
                if servers.is_empty() {
                    out.push("No servers configured. Use: server add <host> [+]<port>");
                    return Ok(());
                }
                let current = ctx.account.connection().map(|c| c.server_label());
                out.push("Servers:");
                for (i, server) in servers.iter().enumerate() {
                    let label = server.label();
                    let marker = if current.as_deref() == Some(label.as_str()) {
                        " (current)"
                    } else {
                        ""
                    };
                    out.push(format!("  {}. {label}{marker}", i + 1));
                }
                Ok(())
            }
            "ADD" => {
                let (Some(host), Some(port)) = (params.get(1), params.get(2)) else {
                    return Err(CommandError::NeedMoreParams(
                        "server add <host> [+]<port> [password]",
                    ));
                };
                let server = parse_server(host, port, params.get(3).copied())?;
                let label = server.label();
                ctx.account.add_server(server);
                ctx.save()?;
                out.push(format!("Added server \x02{label}\x02"));
                Ok(())
            }
            "DEL" => {
                let number = params
                    .get(1)
                    .ok_or(CommandError::NeedMoreParams("server del <number>"))?;
                let index = parse_index(number)?;
                let removed = ctx
                    .account
                    .remove_server(index)
                    .ok_or_else(|| CommandError::Invalid(format!("no server #{number}")))?;
                ctx.save()?;
                out.push(format!("Removed server \x02{}\x02", removed.label()));
                Ok(())
            }
            _ => Err(CommandError::Invalid(format!(
                "unknown subcommand '{subcommand}'. Usage: {}",
                self.usage()
            ))),
        }
    }
}

fn parse_server(host: &str, port: &str, password: Option<&str>) -> Result<ServerEntry, CommandError> {
    if host.is_empty() || host.contains(['/', '@']) {
        return Err(CommandError::Invalid(format!("invalid host: {host}")));
    }
    let (tls, digits) = match port.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, port),
    };
    let port = digits
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| CommandError::Invalid(format!("invalid port: {port}")))?;
    Ok(ServerEntry {
        host: host.to_string(),
        port,
        tls,
        password: password.map(str::to_string),
    })
}

/// 1-based list number to 0-based index.
fn parse_index(number: &str) -> Result<usize, CommandError> {
    number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| CommandError::Invalid(format!("invalid number: {number}")))
}

// ============================================================================
// connect
// ============================================================================

pub struct ConnectCommand;

#[async_trait]
impl Command for ConnectCommand {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn usage(&self) -> &'static str {
        "connect [index]"
    }

    fn help(&self) -> &'static str {
        "Connect upstream, optionally to a specific server"
    }

    fn mutating(&self, _params: &[&str]) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        if let Some(current) = ctx.account.connection() {
            return Err(CommandError::Invalid(format!(
                "already connected to {}; use 'disconnect' first",
                current.server_label()
            )));
        }

        let servers = ctx.account.upstream().servers;
        if servers.is_empty() {
            return Err(UpstreamError::NoServers.into());
        }
        let server_index: isize = match params.first() {
            Some(number) => {
                let index = parse_index(number)?;
                if index >= servers.len() {
                    return Err(CommandError::Invalid(format!("no server #{number}")));
                }
                index as isize
            }
            None => -1,
        };

        let account = Arc::clone(ctx.account);
        let socket = Arc::clone(ctx.socket);
        ctx.bouncer.tasks().spawn(async move {
            if let Err(e) = account.ensure_connection(server_index).await {
                warn!(account = %account.name(), error = %e, "Manual connect failed");
                socket.send_bot_message(format!("Connection failed: {e}"));
            }
        });

        out.push("Connecting...");
        Ok(())
    }
}

// ============================================================================
// disconnect
// ============================================================================

pub struct DisconnectCommand;

#[async_trait]
impl Command for DisconnectCommand {
    fn name(&self) -> &'static str {
        "disconnect"
    }

    fn usage(&self) -> &'static str {
        "disconnect [reason]"
    }

    fn help(&self) -> &'static str {
        "Close the upstream connection"
    }

    fn mutating(&self, _params: &[&str]) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let Some(current) = ctx.account.connection() else {
            return Err(CommandError::Invalid("not connected".to_string()));
        };
        let label = current.server_label();
        drop(current);

        let reason = if params.is_empty() {
            "Disconnected by user".to_string()
        } else {
            params.join(" ")
        };
        ctx.account.server_type().close(ctx.account, &reason).await;
        out.push(format!("Disconnected from \x02{label}\x02"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use std::time::Duration;

    #[test]
    fn server_parsing() {
        let s = parse_server("irc.example.net", "+6697", Some("key")).unwrap();
        assert!(s.tls);
        assert_eq!(s.port, 6697);
        assert_eq!(s.password.as_deref(), Some("key"));
        assert!(parse_server("irc.example.net", "0", None).is_err());
        assert!(parse_server("irc.example.net", "+", None).is_err());
        assert!(parse_server("a/b", "6667", None).is_err());
    }

    #[tokio::test]
    async fn server_add_list_del() {
        let mut h = Harness::new();
        h.run("server add irc.example.net 6667").await;
        h.run("server add irc.example.org +6697").await;
        let lines = h.run("server").await;
        assert!(lines.iter().any(|l| l.contains("1. irc.example.net:6667")));
        assert!(lines.iter().any(|l| l.contains("2. irc.example.org:+6697")));

        h.run("server del 1").await;
        let servers = h.account.upstream().servers;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].host, "irc.example.org");

        let lines = h.run("server del 5").await;
        assert!(lines[0].contains("no server #5"));
    }

    #[tokio::test]
    async fn connect_without_servers_fails() {
        let mut h = Harness::new();
        let lines = h.run("connect").await;
        assert!(lines[0].contains("no servers configured"));
    }

    #[tokio::test]
    async fn connect_reports_failure_asynchronously() {
        let mut h = Harness::new();
        h.run("server add irc.example.net 6667").await;
        let lines = h.run("connect 1").await;
        assert!(lines[0].contains("Connecting"));

        let failure = tokio::time::timeout(Duration::from_secs(5), h.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(failure.contains("Connection failed"), "{failure}");

        let lines = h.run("connect 9").await;
        assert!(lines[0].contains("no server #9"));
    }

    #[tokio::test]
    async fn disconnect_requires_connection() {
        let mut h = Harness::new();
        let lines = h.run("disconnect").await;
        assert!(lines[0].contains("not connected"));
    }
}
