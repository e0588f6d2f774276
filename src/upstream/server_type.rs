//! Upstream protocol drivers.
//!
//! A [`ServerType`] is the per-protocol factory for [`ConnectionHandler`]s
//! and receives every per-account lifecycle event. Drivers are registered by
//! name in a [`ServerTypeManager`] at startup.

use super::handler::ConnectionHandler;
use crate::account::Account;
use crate::error::UpstreamError;
use crate::network::UserSocket;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait ServerType: Send + Sync {
    /// Registry key (case-insensitive).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The account was loaded or created with this server type.
    fn activate(&self, account: &Arc<Account>);

    /// The account is going away or switching server type.
    fn deactivate(&self, account: &Arc<Account>);

    /// A downstream socket attached.
    fn user_connected(&self, account: &Arc<Account>, socket: &Arc<UserSocket>);

    /// A downstream socket detached.
    fn user_disconnected(&self, account: &Arc<Account>, socket: &UserSocket);

    /// Connect upstream for `account`.
    ///
    /// `server_index` selects a server from the account's pool; a negative
    /// index picks one at random. Fails with
    /// [`UpstreamError::UnableToConnect`] when no server could be reached.
    async fn new_connection_handler(
        &self,
        account: &Arc<Account>,
        server_index: isize,
    ) -> Result<Arc<dyn ConnectionHandler>, UpstreamError>;

    /// Tear down the account's upstream session, if any. Idempotent.
    ///
    /// Waits for an in-flight connect so it cannot install a session after
    /// this returns.
    async fn close(&self, account: &Arc<Account>, reason: &str) {
        let _guard = account.connect_lock().lock().await;
        if let Some(handler) = account.take_connection() {
            debug!(account = %account.name(), server_type = %self.name(), "Closing upstream");
            handler.shutdown(reason).await;
        }
    }
}

/// Case-insensitive registry of server types.
#[derive(Default)]
pub struct ServerTypeManager {
    types: DashMap<String, Arc<dyn ServerType>>,
}

impl ServerTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server type. The previous entry with the same name, if
    /// any, is replaced and returned.
    pub fn register(&self, server_type: Arc<dyn ServerType>) -> Option<Arc<dyn ServerType>> {
        let key = server_type.name().to_ascii_lowercase();
        debug!(server_type = %key, "Registering server type");
        self.types.insert(key, server_type)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServerType>> {
        self.types
            .get(&name.to_ascii_lowercase())
            .map(|t| Arc::clone(t.value()))
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .types
            .iter()
            .map(|e| (e.key().clone(), e.value().description().to_string()))
            .collect();
        list.sort();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null(&'static str, &'static str);

    #[async_trait]
    impl ServerType for Null {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        fn activate(&self, _account: &Arc<Account>) {}
        fn deactivate(&self, _account: &Arc<Account>) {}
        fn user_connected(&self, _account: &Arc<Account>, _socket: &Arc<UserSocket>) {}
        fn user_disconnected(&self, _account: &Arc<Account>, _socket: &UserSocket) {}
        async fn new_connection_handler(
            &self,
            account: &Arc<Account>,
            _server_index: isize,
        ) -> Result<Arc<dyn ConnectionHandler>, UpstreamError> {
            Err(UpstreamError::UnableToConnect {
                account: account.name().to_string(),
                reason: "null driver".into(),
            })
        }
    }

    #[test]
    fn registry_is_case_insensitive_and_last_wins() {
        let manager = ServerTypeManager::new();
        assert!(manager.register(Arc::new(Null("Null", "first"))).is_none());
        assert!(manager.register(Arc::new(Null("NULL", "second"))).is_some());

        let found = manager.get("null").unwrap();
        assert_eq!(found.description(), "second");
        assert!(manager.get("irc").is_none());
        assert_eq!(manager.list(), vec![("null".to_string(), "second".to_string())]);
    }
}
