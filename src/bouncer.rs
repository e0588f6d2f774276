//! The Bouncer - shared state for every connection and upstream session.
//!
//! One `Arc<Bouncer>` is handed to the gateway, each client connection and
//! every bot command. It owns the account registry, the server-type and
//! auth-provider registries, and the task tracker used for shutdown.

use crate::account::{AccountManager, AccountStore};
use crate::auth::AuthProviderManager;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::network::SocketId;
use crate::upstream::{ServerTypeManager, register_builtin_server_types};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// How long shutdown waits for connection and upstream tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Bouncer {
    config: Config,
    accounts: AccountManager,
    server_types: Arc<ServerTypeManager>,
    providers: AuthProviderManager,
    commands: CommandRegistry,
    tasks: TaskTracker,
    next_socket_id: AtomicU64,
    shutdown: CancellationToken,
    shutdown_reason: Mutex<Option<String>>,
    shut_down: AtomicBool,
}

/// Assembles a [`Bouncer`]. Anything not supplied gets the built-in set.
pub struct BouncerBuilder {
    config: Config,
    store: Option<AccountStore>,
    server_types: Option<Arc<ServerTypeManager>>,
    providers: Option<AuthProviderManager>,
    tasks: TaskTracker,
}

impl BouncerBuilder {
    /// Persist accounts to this store. Without one, accounts live in memory.
    pub fn store(mut self, store: AccountStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn server_types(mut self, server_types: Arc<ServerTypeManager>) -> Self {
        self.server_types = Some(server_types);
        self
    }

    pub fn providers(mut self, providers: AuthProviderManager) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn build(self) -> Arc<Bouncer> {
        let server_types = self.server_types.unwrap_or_else(|| {
            let manager = Arc::new(ServerTypeManager::new());
            register_builtin_server_types(
                &manager,
                self.config.upstream.clone(),
                self.tasks.clone(),
            );
            manager
        });
        let providers = self.providers.unwrap_or_else(AuthProviderManager::with_builtins);
        let accounts = AccountManager::new(
            self.store,
            Arc::clone(&server_types),
            &self.config.bouncer.default_server_type,
        );

        Arc::new(Bouncer {
            config: self.config,
            accounts,
            server_types,
            providers,
            commands: CommandRegistry::new(),
            tasks: self.tasks,
            next_socket_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            shutdown_reason: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Bouncer {
    pub fn builder(config: Config) -> BouncerBuilder {
        BouncerBuilder {
            config,
            store: None,
            server_types: None,
            providers: None,
            tasks: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    pub fn server_types(&self) -> &Arc<ServerTypeManager> {
        &self.server_types
    }

    pub fn providers(&self) -> &AuthProviderManager {
        &self.providers
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Tracker for every task that must finish before the process exits.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn next_socket_id(&self) -> SocketId {
        self.next_socket_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Ask the process to shut down. The first reason wins.
    pub fn request_shutdown(&self, reason: &str) {
        {
            let mut slot = self.shutdown_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
        info!(%reason, "Shutdown requested");
        self.shutdown.cancel();
    }

    /// Cancelled once shutdown has been requested.
    pub fn shutdown_requested(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.shutdown_reason.lock().clone()
    }

    /// Close every session, persist accounts and wait for tasks to drain.
    /// Only the first call does anything.
    pub async fn shutdown(&self, reason: &str) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.request_shutdown(reason);

        self.accounts.close_all(reason).await;
        if let Err(e) = self.accounts.save_accounts() {
            error!(error = %e, "Failed to save accounts during shutdown");
        }

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "Tasks still running after shutdown grace period"
            );
        }
        info!("Bouncer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::parse("[listen]\naddress = \"127.0.0.1:0\"\n").unwrap()
    }

    #[test]
    fn builtins_are_registered() {
        let bouncer = Bouncer::builder(config()).build();
        assert!(bouncer.server_types().get("irc").is_some());
        assert!(bouncer.providers().get("certfp").is_some());
        assert!(bouncer.providers().get("ip").is_some());
        assert!(bouncer.commands().get("help").is_some());
    }

    #[test]
    fn socket_ids_are_unique() {
        let bouncer = Bouncer::builder(config()).build();
        let a = bouncer.next_socket_id();
        let b = bouncer.next_socket_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let bouncer = Bouncer::builder(config()).build();
        bouncer.accounts().create_account("alice", Some("pw")).unwrap();
        bouncer.request_shutdown("first");
        bouncer.shutdown("second").await;
        bouncer.shutdown("third").await;

        assert!(bouncer.shutdown_requested().is_cancelled());
        assert_eq!(bouncer.shutdown_reason().as_deref(), Some("first"));
        assert!(bouncer.tasks().is_closed());
    }
}
