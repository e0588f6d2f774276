//! Administrator commands.

use super::{Command, CommandContext, CommandOutput, on_off, parse_toggle};
use crate::account::AccountManager;
use crate::error::{AccountError, CommandError, CommandResult};
use async_trait::async_trait;

/// Length of generated passwords for `addaccount` without one.
const GENERATED_PASSWORD_LEN: usize = 12;

fn reject_self(ctx: &CommandContext<'_>, target: &str) -> CommandResult {
    if target.eq_ignore_ascii_case(ctx.account.name()) {
        return Err(AccountError::SelfTarget.into());
    }
    Ok(())
}

// ============================================================================
// addaccount
// ============================================================================

pub struct AddAccountCommand;

#[async_trait]
impl Command for AddAccountCommand {
    fn name(&self) -> &'static str {
        "addaccount"
    }

    fn usage(&self) -> &'static str {
        "addaccount <name> [password]"
    }

    fn help(&self) -> &'static str {
        "Create an account"
    }

    fn admin_only(&self) -> bool {
        true
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
        let name = params
            .first()
            .ok_or(CommandError::NeedMoreParams("addaccount <name> [password]"))?;
        let (password, generated) = match params.get(1) {
            Some(p) => (p.to_string(), false),
            None => (AccountManager::make_password(GENERATED_PASSWORD_LEN), true),
        };

        let account = ctx
            .bouncer
            .accounts()
            .create_account(name, Some(&password))?;
        out.push(format!("Account \x02{}\x02 created.", account.name()));
        if generated {
            out.push(format!("Password: \x02{password}\x02"));
        }
        Ok(())
    }
}

// ============================================================================
// deleteaccount
// ============================================================================

pub struct DeleteAccountCommand;

#[async_trait]
impl Command for DeleteAccountCommand {
    fn name(&self) -> &'static str {
        "deleteaccount"
    }

    fn usage(&self) -> &'static str {
        "deleteaccount <name> [code]"
    }

    fn help(&self) -> &'static str {
        "Delete an account (asks for a confirmation code first)"
    }

    fn admin_only(&self) -> bool {
        true
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
        let name = params
            .first()
            .ok_or(CommandError::NeedMoreParams("deleteaccount <name> [code]"))?;
        reject_self(ctx, name)?;
        let accounts = ctx.bouncer.accounts();

        match params.get(1) {
            None => {
                let code = accounts.request_deletion(name)?;
                out.push(format!(
                    "To confirm deletion of \x02{name}\x02, type: deleteaccount {name} {code}"
                ));
            }
            Some(code) => {
                accounts.confirm_deletion(name, code).await?;
                out.push(format!("Account \x02{name}\x02 deleted."));
            }
        }
        Ok(())
    }
}

// ============================================================================
// suspend / unsuspend
// ============================================================================

pub struct SuspendCommand;

#[async_trait]
impl Command for SuspendCommand {
    fn name(&self) -> &'static str {
        "suspend"
    }

    fn usage(&self) -> &'static str {
        "suspend <name> <reason>"
    }

    fn help(&self) -> &'static str {
        "Suspend an account and disconnect it"
    }

    fn admin_only(&self) -> bool {
        true
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
        let (Some(name), Some(_)) = (params.first(), params.get(1)) else {
            return Err(CommandError::NeedMoreParams("suspend <name> <reason>"));
        };
        reject_self(ctx, name)?;
        let reason = params[1..].join(" ");
        let account = ctx.bouncer.accounts().suspend(name, &reason).await?;
        out.push(format!("Account \x02{}\x02 suspended: {reason}", account.name()));
        Ok(())
    }
}

pub struct UnsuspendCommand;

#[async_trait]
impl Command for UnsuspendCommand {
    fn name(&self) -> &'static str {
        "unsuspend"
    }

    fn usage(&self) -> &'static str {
        "unsuspend <name>"
    }

    fn help(&self) -> &'static str {
        "Lift a suspension"
    }

    fn admin_only(&self) -> bool {
        true
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
        let name = params
            .first()
            .ok_or(CommandError::NeedMoreParams("unsuspend <name>"))?;
        let account = ctx.bouncer.accounts().unsuspend(name)?;
        out.push(format!("Account \x02{}\x02 unsuspended.", account.name()));
        Ok(())
    }
}

// ============================================================================
// setadmin
// ============================================================================

pub struct SetAdminCommand;

#[async_trait]
impl Command for SetAdminCommand {
    fn name(&self) -> &'static str {
        "setadmin"
    }

    fn usage(&self) -> &'static str {
        "setadmin <name> <on|off>"
    }

    fn help(&self) -> &'static str {
        "Grant or revoke administrator rights"
    }

    fn admin_only(&self) -> bool {
        true
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
        let (Some(name), Some(value)) = (params.first(), params.get(1)) else {
            return Err(CommandError::NeedMoreParams("setadmin <name> <on|off>"));
        };
        reject_self(ctx, name)?;
        let admin = parse_toggle(value)?;
        let account = ctx.bouncer.accounts().set_admin(name, admin)?;
        out.push(format!(
            "Admin for \x02{}\x02 is now {}",
            account.name(),
            on_off(admin)
        ));
        Ok(())
    }
}

// ============================================================================
// accounts
// ============================================================================

pub struct AccountsCommand;

#[async_trait]
impl Command for AccountsCommand {
    fn name(&self) -> &'static str {
        "accounts"
    }

    fn usage(&self) -> &'static str {
        "accounts"
    }

    fn help(&self) -> &'static str {
        "List all accounts"
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        _params: &[&str],
        out: &mut CommandOutput,
    ) -> CommandResult {
        let accounts = ctx.bouncer.accounts().list();
        out.push(format!("{} account(s):", accounts.len()));
        for account in accounts {
            let mut flags = Vec::new();
            if account.is_admin() {
                flags.push("admin".to_string());
            }
            if let Some(reason) = account.suspended_reason() {
                flags.push(format!("suspended: {reason}"));
            }
            let upstream = match account.connection() {
                Some(c) if c.is_connected() => format!("connected to {}", c.server_label()),
                Some(c) => format!("connecting to {}", c.server_label()),
                None => "offline".to_string(),
            };
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            out.push(format!(
                "  \x02{}\x02{flags} - {} client(s), {upstream}",
                account.name(),
                account.socket_count()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// shutdown
// ============================================================================

pub struct ShutdownCommand;

#[async_trait]
impl Command for ShutdownCommand {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    fn usage(&self) -> &'static str {
        "shutdown [reason]"
    }

    fn help(&self) -> &'static str {
        "Stop the bouncer"
    }

    fn admin_only(&self) -> bool {
        true
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
        let reason = if params.is_empty() {
            format!("Shutdown requested by {}", ctx.account.name())
        } else {
            params.join(" ")
        };
        out.push("Shutting down.");
        ctx.bouncer.request_shutdown(&reason);
        Ok(())
    }
}
