//! Per-account commands: help, auth list, sub-clients, settings and the
//! socket-local toggles.

use super::{Command, CommandContext, CommandOutput, on_off, parse_toggle};
use crate::auth::ident::{SEPARATOR, sanitize_sub_client};
use crate::error::{AccountError, CommandError, CommandResult};
use crate::network::DebugFlag;
use async_trait::async_trait;
use std::sync::Arc;

/// Label for a sub-client id in replies.
fn sub_label(sub_client: &str) -> &str {
    if sub_client.is_empty() {
        "(default)"
    } else {
        sub_client
    }
}

/// Split an optional leading `+subclient` selector off `params`.
///
/// A bare `+` selects the default slot. Without a selector the issuing
/// socket's own sub-client is used.
fn take_sub_client<'p>(ctx: &CommandContext<'_>, params: &'p [&'p str]) -> (String, &'p [&'p str]) {
    match params.split_first() {
        Some((first, rest)) if first.starts_with(SEPARATOR) => {
            (sanitize_sub_client(&first[SEPARATOR.len_utf8()..]), rest)
        }
        _ => (ctx.socket.sub_client(), params),
    }
}

// ============================================================================
// help
// ============================================================================

pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn usage(&self) -> &'static str {
        "help [command]"
    }

    fn help(&self) -> &'static str {
        "List commands, or show usage for one command"
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let registry = ctx.bouncer.commands();
        let admin = ctx.account.is_admin();

        if let Some(name) = params.first() {
            let command = registry
                .get(name)
                .filter(|c| admin || !c.admin_only())
                .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
            out.push(format!("\x02{}\x02 - {}", command.name(), command.help()));
            out.push(format!("Usage: {}", command.usage()));
            return Ok(());
        }

        out.push(format!("\x02{}\x02 commands:", ctx.bouncer.config().bouncer.name));
        for command in registry.visible(admin) {
            let marker = if command.admin_only() { " (admin)" } else { "" };
            out.push(format!("  \x02{:<14}\x02 {}{}", command.name(), command.help(), marker));
        }
        out.push("Type 'help <command>' for usage.");
        Ok(())
    }
}

// ============================================================================
// authlist
// ============================================================================

pub struct AuthListCommand;

#[async_trait]
impl Command for AuthListCommand {
    fn name(&self) -> &'static str {
        "authlist"
    }

    fn usage(&self) -> &'static str {
        "authlist [list [+sub] | providers | add [+sub] <provider> [value] | del [+sub] <number>]"
    }

    fn help(&self) -> &'static str {
        "Manage password-less logins for a sub-client"
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
        let rest = params.get(1..).unwrap_or_default();

        match subcommand.as_str() {
            "LIST" => {
                let filter = match rest.first() {
                    Some(first) if first.starts_with(SEPARATOR) => {
                        Some(sanitize_sub_client(&first[SEPARATOR.len_utf8()..]))
                    }
                    _ => None,
                };
                list_auth_entries(ctx, filter.as_deref(), out);
                Ok(())
            }
            "PROVIDERS" => {
                let providers = ctx.bouncer.providers();
                out.push("Available auth providers:");
                for name in providers.names() {
                    if let Some(provider) = providers.get(&name) {
                        out.push(format!(
                            "  \x02{}\x02 - {}",
                            provider.name(),
                            provider.expected_params_description()
                        ));
                    }
                }
                Ok(())
            }
            "ADD" => {
                let (sub_client, rest) = take_sub_client(ctx, rest);
                let Some((provider, value)) = rest.split_first() else {
                    return Err(CommandError::NeedMoreParams(
                        "authlist add [+sub] <provider> [value]",
                    ));
                };
                let entry = ctx.account.add_auth_entry(
                    ctx.bouncer.providers(),
                    ctx.socket,
                    &sub_client,
                    provider,
                    &value.join(" "),
                )?;
                ctx.save()?;
                out.push(format!(
                    "Added \x02{}\x02 {} for sub-client {}",
                    entry.provider,
                    entry.value,
                    sub_label(&entry.sub_client)
                ));
                Ok(())
            }
            "DEL" => {
                let (sub_client, rest) = take_sub_client(ctx, rest);
                let number = rest
                    .first()
                    .ok_or(CommandError::NeedMoreParams("authlist del [+sub] <number>"))?;
                let index = number
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .ok_or_else(|| CommandError::Invalid(format!("invalid entry number: {number}")))?;
                let removed = ctx.account.remove_auth_entry(&sub_client, index)?;
                ctx.save()?;
                out.push(format!(
                    "Removed \x02{}\x02 {} from sub-client {}",
                    removed.provider,
                    removed.value,
                    sub_label(&removed.sub_client)
                ));
                Ok(())
            }
            _ => Err(CommandError::Invalid(format!(
                "unknown subcommand '{subcommand}'. Usage: {}",
                self.usage()
            ))),
        }
    }
}

fn list_auth_entries(ctx: &CommandContext<'_>, filter: Option<&str>, out: &mut CommandOutput) {
    let entries = ctx.account.auth_entries(filter);
    if entries.is_empty() {
        out.push("No auth list entries.");
        return;
    }

    let mut current: Option<&str> = None;
    let mut number = 0;
    for entry in &entries {
        if current != Some(entry.sub_client.as_str()) {
            current = Some(entry.sub_client.as_str());
            number = 0;
            out.push(format!("Sub-client {}:", sub_label(&entry.sub_client)));
        }
        number += 1;
        out.push(format!("  {number}. \x02{}\x02 {}", entry.provider, entry.value));
    }
}

// ============================================================================
// subclients
// ============================================================================

pub struct SubClientsCommand;

#[async_trait]
impl Command for SubClientsCommand {
    fn name(&self) -> &'static str {
        "subclients"
    }

    fn usage(&self) -> &'static str {
        "subclients [list | add <name> | del <name> | readonly <name> <on|off>]"
    }

    fn help(&self) -> &'static str {
        "Manage named sub-clients (log in as account+name)"
    }

    fn mutating(&self, params: &[&str]) -> bool {
        params.first().is_some_and(|p| {
            matches!(
                p.to_ascii_uppercase().as_str(),
                "ADD" | "DEL" | "READONLY"
            )
        })
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
                let subs = ctx.account.sub_clients();
                if subs.is_empty() {
                    out.push("No sub-clients registered.");
                    return Ok(());
                }
                let attached: Vec<String> =
                    ctx.account.sockets().iter().map(|s| s.sub_client()).collect();
                out.push("Sub-clients:");
                for (name, read_only) in subs {
                    let mut flags = Vec::new();
                    if read_only {
                        flags.push("read-only");
                    }
                    if attached.contains(&name) {
                        flags.push("attached");
                    }
                    if flags.is_empty() {
                        out.push(format!("  \x02{name}\x02"));
                    } else {
                        out.push(format!("  \x02{name}\x02 ({})", flags.join(", ")));
                    }
                }
                Ok(())
            }
            "ADD" => {
                let raw = params
                    .get(1)
                    .ok_or(CommandError::NeedMoreParams("subclients add <name>"))?;
                let name = ctx.account.add_sub_client(raw)?;
                ctx.save()?;
                out.push(format!(
                    "Sub-client \x02{name}\x02 added. Log in as {}{SEPARATOR}{name}",
                    ctx.account.name()
                ));
                Ok(())
            }
            "DEL" => {
                let raw = params
                    .get(1)
                    .ok_or(CommandError::NeedMoreParams("subclients del <name>"))?;
                let name = sanitize_sub_client(raw);
                let own = ctx.socket.sub_client() == name;
                if own {
                    // Reply before the slot's socket (ours) is closed.
                    ctx.socket
                        .send_bot_message(format!("Sub-client \x02{name}\x02 removed."));
                }
                ctx.account.remove_sub_client(&name)?;
                ctx.save()?;
                if !own {
                    out.push(format!("Sub-client \x02{name}\x02 removed."));
                }
                Ok(())
            }
            "READONLY" => {
                let (Some(raw), Some(value)) = (params.get(1), params.get(2)) else {
                    return Err(CommandError::NeedMoreParams(
                        "subclients readonly <name> <on|off>",
                    ));
                };
                let name = sanitize_sub_client(raw);
                let read_only = parse_toggle(value)?;
                if !ctx.account.set_sub_client_read_only(&name, read_only) {
                    return Err(AccountError::AuthList(format!("no such sub-client: {name}")).into());
                }
                ctx.save()?;
                out.push(format!(
                    "Sub-client \x02{name}\x02 now starts read-only: {}",
                    on_off(read_only)
                ));
                Ok(())
            }
            _ => Err(CommandError::Invalid(format!(
                "unknown subcommand '{subcommand}'. Usage: {}",
                self.usage()
            ))),
        }
    }
}

// ============================================================================
// set
// ============================================================================

pub struct SetCommand;

const SET_USAGE: &str = "set [nickname|altnick|username|realname|password|servertype] <value>";

#[async_trait]
impl Command for SetCommand {
    fn name(&self) -> &'static str {
        "set"
    }

    fn usage(&self) -> &'static str {
        SET_USAGE
    }

    fn help(&self) -> &'static str {
        "Show or change account settings"
    }

    fn mutating(&self, params: &[&str]) -> bool {
        !params.is_empty()
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let Some((key, value)) = params.split_first() else {
            show_settings(ctx, out);
            return Ok(());
        };
        if value.is_empty() {
            return Err(CommandError::NeedMoreParams(SET_USAGE));
        }
        let key = key.to_ascii_lowercase();
        let single = || -> Result<String, CommandError> {
            match value {
                [one] => Ok(one.to_string()),
                _ => Err(CommandError::Invalid(format!("{key} must be a single word"))),
            }
        };

        match key.as_str() {
            "nickname" | "nick" => {
                let nick = single()?;
                ctx.account.update_upstream(|u| u.nickname = Some(nick.clone()));
                out.push(format!("Nickname set to \x02{nick}\x02"));
            }
            "altnick" => {
                let nick = single()?;
                ctx.account.update_upstream(|u| u.altnick = Some(nick.clone()));
                out.push(format!("Alternate nickname set to \x02{nick}\x02"));
            }
            "username" | "ident" => {
                let user = single()?;
                ctx.account.update_upstream(|u| u.username = Some(user.clone()));
                out.push(format!("Username set to \x02{user}\x02"));
            }
            "realname" => {
                let realname = value.join(" ");
                ctx.account.update_upstream(|u| u.realname = Some(realname.clone()));
                out.push(format!("Real name set to \x02{realname}\x02"));
            }
            "password" => {
                let password = single()?;
                ctx.account.set_password(&password)?;
                out.push("Password changed.");
            }
            "servertype" => {
                let name = single()?;
                let new_type = ctx
                    .bouncer
                    .server_types()
                    .get(&name)
                    .ok_or_else(|| AccountError::UnknownServerType(name.clone()))?;
                let old_type = ctx.account.server_type();
                if Arc::ptr_eq(&old_type, &new_type) {
                    out.push(format!("Server type is already \x02{}\x02", new_type.name()));
                    return Ok(());
                }
                old_type.close(ctx.account, "Server type changed").await;
                old_type.deactivate(ctx.account);
                ctx.account.set_server_type(Arc::clone(&new_type));
                new_type.activate(ctx.account);
                out.push(format!("Server type set to \x02{}\x02", new_type.name()));
            }
            _ => {
                return Err(CommandError::Invalid(format!(
                    "unknown setting '{key}'. Usage: {SET_USAGE}"
                )));
            }
        }

        ctx.save()
    }
}

fn show_settings(ctx: &CommandContext<'_>, out: &mut CommandOutput) {
    let upstream = ctx.account.upstream();
    let unset = || "(unset)".to_string();
    out.push(format!("Settings for \x02{}\x02:", ctx.account.name()));
    out.push(format!("  nickname:   {}", upstream.nickname.unwrap_or_else(unset)));
    out.push(format!("  altnick:    {}", upstream.altnick.unwrap_or_else(unset)));
    out.push(format!("  username:   {}", upstream.username.unwrap_or_else(unset)));
    out.push(format!("  realname:   {}", upstream.realname.unwrap_or_else(unset)));
    out.push(format!("  servertype: {}", ctx.account.server_type().name()));
    out.push(format!("  servers:    {}", upstream.servers.len()));
}

// ============================================================================
// readonly
// ============================================================================

pub struct ReadOnlyCommand;

#[async_trait]
impl Command for ReadOnlyCommand {
    fn name(&self) -> &'static str {
        "readonly"
    }

    fn usage(&self) -> &'static str {
        "readonly [on|off]"
    }

    fn help(&self) -> &'static str {
        "Stop (or resume) forwarding this connection's messages upstream"
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        if let Some(value) = params.first() {
            ctx.socket.set_read_only(parse_toggle(value)?);
        }
        out.push(format!(
            "Read-only mode is \x02{}\x02 for this connection",
            on_off(ctx.socket.is_read_only())
        ));
        Ok(())
    }
}

// ============================================================================
// debug
// ============================================================================

pub struct DebugCommand;

#[async_trait]
impl Command for DebugCommand {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn usage(&self) -> &'static str {
        "debug [upstream|commands] [on|off]"
    }

    fn help(&self) -> &'static str {
        "Toggle debug output for this connection"
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        if let Some(raw) = params.first() {
            let flag: DebugFlag = raw
                .parse()
                .map_err(|_| CommandError::Invalid(format!("unknown debug flag: {raw}")))?;
            let enabled = match params.get(1) {
                Some(value) => parse_toggle(value)?,
                None => !ctx.socket.debug_flag(flag),
            };
            ctx.socket.set_debug_flag(flag, enabled);
        }

        for flag in DebugFlag::ALL {
            out.push(format!(
                "  \x02{flag}\x02: {}",
                on_off(ctx.socket.debug_flag(flag))
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;

    #[tokio::test]
    async fn help_hides_admin_commands_from_users() {
        let h = Harness::new();
        let (bob, sock, mut rx) = h.user("bob");
        let lines =
            super::super::test_support::run_as(&h.bouncer, &bob, &sock, &mut rx, "help").await;
        assert!(lines.iter().any(|l| l.contains("authlist")));
        assert!(!lines.iter().any(|l| l.contains("suspend")));

        let lines =
            super::super::test_support::run_as(&h.bouncer, &bob, &sock, &mut rx, "help suspend")
                .await;
        assert!(lines[0].contains("unknown command"));
    }

    #[tokio::test]
    async fn help_for_one_command_shows_usage() {
        let mut h = Harness::new();
        let lines = h.run("help CONNECT").await;
        assert!(lines.iter().any(|l| l.contains("Usage: connect [index]")));
    }

    #[tokio::test]
    async fn authlist_add_list_del() {
        let mut h = Harness::new();
        let lines = h.run("authlist add ip 10.1.0.0/16").await;
        assert!(lines[0].contains("Added"), "{lines:?}");

        let lines = h.run("authlist").await;
        assert!(lines.iter().any(|l| l.contains("1. \x02ip\x02 10.1.0.0/16")));

        h.run("authlist del 1").await;
        assert!(h.account.auth_entries(None).is_empty());

        let lines = h.run("authlist del 1").await;
        assert!(lines[0].starts_with(":") && lines[0].contains("Error"));
    }

    #[tokio::test]
    async fn authlist_targets_named_sub_client() {
        let mut h = Harness::new();
        let lines = h.run("authlist add +phone ip").await;
        assert!(lines[0].contains("no such sub-client: phone"));

        h.run("subclients add phone").await;
        h.run("authlist add +phone ip").await;
        let entries = h.account.auth_entries(Some("phone"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "10.0.0.1/32");
    }

    #[tokio::test]
    async fn authlist_providers_lists_builtins() {
        let mut h = Harness::new();
        let lines = h.run("authlist providers").await;
        assert!(lines.iter().any(|l| l.contains("certfp")));
        assert!(lines.iter().any(|l| l.contains("ip")));
    }

    #[tokio::test]
    async fn subclients_lifecycle() {
        let mut h = Harness::new();
        let lines = h.run("subclients add Work").await;
        assert!(lines[0].contains("root+work"));
        assert!(h.account.has_sub_client("work"));

        h.run("subclients readonly work on").await;
        assert_eq!(h.account.sub_clients(), vec![("work".to_string(), true)]);

        let lines = h.run("subclients").await;
        assert!(lines.iter().any(|l| l.contains("read-only")));

        h.run("subclients del work").await;
        assert!(!h.account.has_sub_client("work"));
    }

    #[tokio::test]
    async fn set_updates_upstream_settings() {
        let mut h = Harness::new();
        h.run("set nickname rooty").await;
        h.run("set realname Root User").await;
        let upstream = h.account.upstream();
        assert_eq!(upstream.nickname.as_deref(), Some("rooty"));
        assert_eq!(upstream.realname.as_deref(), Some("Root User"));

        let lines = h.run("set nickname two words").await;
        assert!(lines[0].contains("single word"));

        let lines = h.run("set servertype nope").await;
        assert!(lines[0].contains("unknown server type"));

        h.run("set password hunter2").await;
        assert!(h.account.check_password("hunter2"));
    }

    #[tokio::test]
    async fn readonly_and_debug_are_socket_local() {
        let mut h = Harness::new();
        h.run("readonly on").await;
        assert!(h.socket.is_read_only());
        h.run("readonly off").await;
        assert!(!h.socket.is_read_only());

        let lines = h.run("debug upstream").await;
        assert!(lines.iter().any(|l| l.contains("upstream\x02: on")));
        let lines = h.run("debug bogus").await;
        assert!(lines[0].contains("unknown debug flag"));
    }
}
