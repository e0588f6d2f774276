//! Pluggable credential checks.
//!
//! An [`AuthProvider`] lets a sub-client log in without a password, for
//! example by client certificate. Accounts store `(provider, value)` pairs in
//! their auth list; the provider decides whether a socket matches a stored
//! value.

use crate::network::UserSocket;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A password-less credential check.
///
/// Implementations must be pure: the authenticator probes them speculatively
/// while parsing `PASS`, so a check may run several times per login.
pub trait AuthProvider: Send + Sync {
    /// Single-token name, used as the `authlist add <provider>` keyword.
    fn name(&self) -> &str;

    /// Human-readable description of the value `authlist add` expects.
    fn expected_params_description(&self) -> &str;

    /// Whether `socket` satisfies the stored value.
    fn check_authentication(&self, socket: &UserSocket, stored_value: &str) -> bool;

    /// Validate admin input and turn it into the value to store.
    ///
    /// Returns an empty string when the input is invalid. Empty input may
    /// default to something derived from `socket`.
    fn validate_and_normalize(&self, socket: &UserSocket, sub_client: &str, raw_input: &str)
    -> String;
}

/// Case-insensitive registry of auth providers.
#[derive(Default)]
pub struct AuthProviderManager {
    providers: DashMap<String, Arc<dyn AuthProvider>>,
}

impl AuthProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager with the built-in `certfp` and `ip` providers registered.
    pub fn with_builtins() -> Self {
        let manager = Self::new();
        super::providers::register_builtin_providers(&manager);
        manager
    }

    /// Register a provider. A provider already registered under the same
    /// name is replaced and returned.
    pub fn register(&self, provider: Arc<dyn AuthProvider>) -> Option<Arc<dyn AuthProvider>> {
        let key = provider.name().to_ascii_lowercase();
        debug!(provider = %key, "Registering auth provider");
        self.providers.insert(key, provider)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthProvider>> {
        self.providers
            .get(&name.to_ascii_lowercase())
            .map(|p| Arc::clone(p.value()))
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
