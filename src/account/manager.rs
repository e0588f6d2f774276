//! Process-wide account registry.
//!
//! The manager is the only writer of the persisted account list. Lookups go
//! through a `DashMap` keyed by the lower-cased name, so reads never wait on
//! unrelated accounts.

use super::account::Account;
use super::store::AccountStore;
use crate::auth::ident::is_valid_account_name;
use crate::auth::password;
use crate::error::AccountError;
use crate::upstream::ServerTypeManager;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Length of delete confirmation codes.
const DELETE_CODE_LEN: usize = 8;

pub struct AccountManager {
    accounts: DashMap<String, Arc<Account>>,
    store: Option<AccountStore>,
    server_types: Arc<ServerTypeManager>,
    default_server_type: String,
    /// Serializes creation so exactly one account can be the first.
    create_lock: Mutex<()>,
}

impl AccountManager {
    /// Create an empty manager. Without a store nothing is persisted.
    pub fn new(
        store: Option<AccountStore>,
        server_types: Arc<ServerTypeManager>,
        default_server_type: &str,
    ) -> Self {
        Self {
            accounts: DashMap::new(),
            store,
            server_types,
            default_server_type: default_server_type.to_string(),
            create_lock: Mutex::new(()),
        }
    }

    /// Load every stored account and activate its server type.
    ///
    /// Accounts whose server type is no longer registered fall back to the
    /// default type.
    pub fn load(&self) -> Result<usize, AccountError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = Vec::new();
        for stored in store.load_all()? {
            let server_type = match self.server_types.get(&stored.server_type) {
                Some(t) => t,
                None => {
                    warn!(
                        account = %stored.name,
                        server_type = %stored.server_type,
                        "Unknown server type, using default"
                    );
                    match self.server_types.get(&self.default_server_type) {
                        Some(t) => t,
                        None => {
                            error!(account = %stored.name, "No default server type registered, skipping account");
                            continue;
                        }
                    }
                }
            };
            let account = Account::from_stored(stored, server_type);
            self.accounts
                .insert(account.key().to_string(), Arc::clone(&account));
            loaded.push(account);
        }

        for account in &loaded {
            account.server_type().activate(account);
        }

        info!(count = loaded.len(), "Accounts loaded");
        Ok(loaded.len())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.accounts.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Account>> {
        self.accounts
            .get(&name.to_ascii_lowercase())
            .map(|a| Arc::clone(a.value()))
    }

    pub fn count(&self) -> usize {
        self.accounts.len()
    }

    /// All accounts, sorted by name.
    pub fn list(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<Arc<Account>> =
            self.accounts.iter().map(|e| Arc::clone(e.value())).collect();
        accounts.sort_by(|a, b| a.key().cmp(b.key()));
        accounts
    }

    /// Create an account. The first account ever created is an admin.
    pub fn create_account(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<Arc<Account>, AccountError> {
        if !is_valid_account_name(name) {
            return Err(AccountError::InvalidName(name.to_string()));
        }
        let server_type = self
            .server_types
            .get(&self.default_server_type)
            .ok_or_else(|| AccountError::UnknownServerType(self.default_server_type.clone()))?;

        let account = Account::new(name, server_type);
        if let Some(password) = password {
            account.set_password(password)?;
        }

        {
            let _guard = self.create_lock.lock();
            if self.exists(name) {
                return Err(AccountError::AccountExists(name.to_string()));
            }
            if self.accounts.is_empty() {
                account.set_admin(true);
            }
            self.accounts
                .insert(account.key().to_string(), Arc::clone(&account));

            if let Err(e) = self.save_account(&account) {
                self.accounts.remove(account.key());
                return Err(e);
            }
        }

        info!(account = %account.name(), admin = account.is_admin(), "Account created");
        account.server_type().activate(&account);
        Ok(account)
    }

    /// Persist one account.
    pub fn save_account(&self, account: &Account) -> Result<(), AccountError> {
        if let Some(store) = &self.store {
            store.save(&account.to_stored())?;
        }
        Ok(())
    }

    /// Persist every account.
    pub fn save_accounts(&self) -> Result<(), AccountError> {
        if let Some(store) = &self.store {
            let stored: Vec<_> = self.list().iter().map(|a| a.to_stored()).collect();
            store.save_all(&stored)?;
        }
        Ok(())
    }

    /// Random alphanumeric token.
    pub fn make_password(length: usize) -> String {
        password::make_password(length)
    }

    /// First half of a two-phase delete: issue a fresh confirmation code.
    pub fn request_deletion(&self, name: &str) -> Result<String, AccountError> {
        let account = self
            .get(name)
            .ok_or_else(|| AccountError::AccountNotFound(name.to_string()))?;
        let code = Self::make_password(DELETE_CODE_LEN);
        account.issue_delete_code(code.clone());
        info!(account = %account.name(), "Account deletion requested");
        Ok(code)
    }

    /// Second half of a two-phase delete. Only the exact pending code
    /// deletes; anything else leaves the account and its code untouched.
    ///
    /// The account is removed from storage first. If that fails nothing else
    /// has changed. Once it succeeds the upstream session is closed before
    /// this returns.
    pub async fn confirm_deletion(&self, name: &str, code: &str) -> Result<(), AccountError> {
        let account = self
            .get(name)
            .ok_or_else(|| AccountError::AccountNotFound(name.to_string()))?;
        if !account.has_pending_deletion() {
            return Err(AccountError::NoPendingDeletion(account.name().to_string()));
        }
        if !account.delete_code_matches(code) {
            return Err(AccountError::InvalidConfirmationCode);
        }

        if let Some(store) = &self.store {
            store.delete(account.key())?;
        }
        self.accounts.remove(account.key());
        account.clear_delete_code();
        account.retire();

        let server_type = account.server_type();
        server_type.close(&account, "Account deleted").await;
        server_type.deactivate(&account);
        account.send_bot_message_to_all("This account has been deleted.");
        account.close_all_sockets("Account deleted");

        info!(account = %account.name(), "Account deleted");
        Ok(())
    }

    /// Suspend an account: its sockets are told the reason and closed, and
    /// its upstream session is torn down.
    pub async fn suspend(&self, name: &str, reason: &str) -> Result<Arc<Account>, AccountError> {
        let account = self
            .get(name)
            .ok_or_else(|| AccountError::AccountNotFound(name.to_string()))?;

        let previous = account.suspended_reason();
        account.set_suspended(Some(reason.to_string()));
        if let Err(e) = self.save_account(&account) {
            account.set_suspended(previous);
            return Err(e);
        }

        account.server_type().close(&account, reason).await;
        account.send_bot_message_to_all(&format!("Your account has been suspended: {reason}"));
        account.close_all_sockets(&format!("Account suspended: {reason}"));

        info!(account = %account.name(), reason = %reason, "Account suspended");
        Ok(account)
    }

    pub fn unsuspend(&self, name: &str) -> Result<Arc<Account>, AccountError> {
        let account = self
            .get(name)
            .ok_or_else(|| AccountError::AccountNotFound(name.to_string()))?;

        let previous = account.suspended_reason();
        account.set_suspended(None);
        if let Err(e) = self.save_account(&account) {
            account.set_suspended(previous);
            return Err(e);
        }
        info!(account = %account.name(), "Account unsuspended");
        Ok(account)
    }

    pub fn set_admin(&self, name: &str, admin: bool) -> Result<Arc<Account>, AccountError> {
        let account = self
            .get(name)
            .ok_or_else(|| AccountError::AccountNotFound(name.to_string()))?;

        let previous = account.is_admin();
        account.set_admin(admin);
        if let Err(e) = self.save_account(&account) {
            account.set_admin(previous);
            return Err(e);
        }
        info!(account = %account.name(), admin, "Account admin flag changed");
        Ok(account)
    }

    /// Close every upstream session and socket. Used at process shutdown.
    pub async fn close_all(&self, reason: &str) {
        for account in self.list() {
            account.retire();
            account.send_bot_message_to_all(&format!("Bouncer shutting down: {reason}"));
            account.server_type().close(&account, reason).await;
            account.close_all_sockets(reason);
        }
    }
}
