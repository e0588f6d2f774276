//! A bouncer account and its attached sockets.
//!
//! Mutable state sits behind one `parking_lot::RwLock` per account, never held
//! across an await. The upstream session lives in its own slot; installing a
//! new session is serialized by an async connect lock so concurrent attaches
//! cannot create two.

use super::store::{AuthEntry, ServerEntry, StoredAccount, StoredSubClient, UpstreamSettings};
use crate::auth::AuthProviderManager;
use crate::auth::password::{hash_password, verify_password};
use crate::error::{AccountError, UpstreamError};
use crate::network::{SocketId, UserSocket};
use crate::upstream::{ConnectionHandler, ServerType};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

/// Settings of a named sub-client slot.
#[derive(Debug, Clone, Default)]
struct SubClient {
    read_only: bool,
}

struct AccountState {
    password_hash: Option<String>,
    admin: bool,
    suspended: Option<String>,
    sub_clients: BTreeMap<String, SubClient>,
    auth_list: Vec<AuthEntry>,
    delete_code: Option<String>,
    upstream: UpstreamSettings,
    server_type: Arc<dyn ServerType>,
    /// Attached sockets in attach order. Named sub-clients hold at most one.
    sockets: BTreeMap<SocketId, Arc<UserSocket>>,
}

impl AccountState {
    /// Any change to the account invalidates a pending delete confirmation.
    fn touch(&mut self) {
        self.delete_code = None;
    }
}

/// A registered bouncer identity.
pub struct Account {
    name: String,
    key: String,
    created_at: i64,
    state: RwLock<AccountState>,
    connection: Mutex<Option<Arc<dyn ConnectionHandler>>>,
    connect_lock: tokio::sync::Mutex<()>,
    retired: AtomicBool,
}

impl Account {
    pub fn new(name: &str, server_type: Arc<dyn ServerType>) -> Arc<Self> {
        Self::build(
            name,
            chrono::Utc::now().timestamp(),
            AccountState {
                password_hash: None,
                admin: false,
                suspended: None,
                sub_clients: BTreeMap::new(),
                auth_list: Vec::new(),
                delete_code: None,
                upstream: UpstreamSettings::default(),
                server_type,
                sockets: BTreeMap::new(),
            },
        )
    }

    /// Rebuild an account from storage.
    pub fn from_stored(stored: StoredAccount, server_type: Arc<dyn ServerType>) -> Arc<Self> {
        Self::build(
            &stored.name,
            stored.created_at,
            AccountState {
                password_hash: stored.password_hash,
                admin: stored.admin,
                suspended: stored.suspended,
                sub_clients: stored
                    .sub_clients
                    .into_iter()
                    .map(|s| (s.name, SubClient { read_only: s.read_only }))
                    .collect(),
                auth_list: stored.auth_list,
                delete_code: None,
                upstream: stored.upstream,
                server_type,
                sockets: BTreeMap::new(),
            },
        )
    }

    fn build(name: &str, created_at: i64, state: AccountState) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            key: name.to_ascii_lowercase(),
            created_at,
            state: RwLock::new(state),
            connection: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
        })
    }

    /// Snapshot for persistence.
    pub fn to_stored(&self) -> StoredAccount {
        let state = self.state.read();
        StoredAccount {
            name: self.name.clone(),
            password_hash: state.password_hash.clone(),
            admin: state.admin,
            suspended: state.suspended.clone(),
            sub_clients: state
                .sub_clients
                .iter()
                .map(|(name, s)| StoredSubClient {
                    name: name.clone(),
                    read_only: s.read_only,
                })
                .collect(),
            auth_list: state.auth_list.clone(),
            server_type: state.server_type.name().to_string(),
            upstream: state.upstream.clone(),
            created_at: self.created_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased name used as the registry and storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn is_admin(&self) -> bool {
        self.state.read().admin
    }

    pub fn set_admin(&self, admin: bool) {
        let mut state = self.state.write();
        state.admin = admin;
        state.touch();
    }

    pub fn suspended_reason(&self) -> Option<String> {
        self.state.read().suspended.clone()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.read().suspended.is_some()
    }

    pub fn set_suspended(&self, reason: Option<String>) {
        let mut state = self.state.write();
        state.suspended = reason;
        state.touch();
    }

    /// Mark the account as gone. A retired account never opens a new
    /// upstream session.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    pub fn has_password(&self) -> bool {
        self.state.read().password_hash.is_some()
    }

    pub fn set_password(&self, password: &str) -> Result<(), AccountError> {
        let hash =
            hash_password(password).map_err(|e| AccountError::Password(e.to_string()))?;
        let mut state = self.state.write();
        state.password_hash = Some(hash);
        state.touch();
        Ok(())
    }

    /// Whether `password` matches the account password. Fails when no
    /// password is set.
    pub fn check_password(&self, password: &str) -> bool {
        let hash = self.state.read().password_hash.clone();
        match hash {
            Some(hash) => verify_password(password, &hash),
            None => false,
        }
    }

    /// Full credential check: the account password first, then the auth
    /// list of `sub_client`. Fails closed.
    pub fn check_authentication(
        &self,
        providers: &AuthProviderManager,
        socket: &UserSocket,
        sub_client: &str,
        password: Option<&str>,
    ) -> bool {
        if let Some(password) = password
            && !password.is_empty()
            && self.check_password(password)
        {
            return true;
        }
        self.check_alternate_authentication(providers, socket, sub_client)
    }

    /// Password-less half of [`Self::check_authentication`].
    ///
    /// Entries naming an unregistered provider are skipped.
    pub fn check_alternate_authentication(
        &self,
        providers: &AuthProviderManager,
        socket: &UserSocket,
        sub_client: &str,
    ) -> bool {
        let entries: Vec<AuthEntry> = self
            .state
            .read()
            .auth_list
            .iter()
            .filter(|e| e.sub_client == sub_client)
            .cloned()
            .collect();

        entries.iter().any(|entry| {
            providers
                .get(&entry.provider)
                .is_some_and(|p| p.check_authentication(socket, &entry.value))
        })
    }

    /// Add an auth-list entry for `sub_client`, normalised by the provider.
    pub fn add_auth_entry(
        &self,
        providers: &AuthProviderManager,
        socket: &UserSocket,
        sub_client: &str,
        provider_name: &str,
        raw_input: &str,
    ) -> Result<AuthEntry, AccountError> {
        let provider = providers
            .get(provider_name)
            .ok_or_else(|| AccountError::AuthList(format!("no such provider: {provider_name}")))?;

        let value = provider.validate_and_normalize(socket, sub_client, raw_input);
        if value.is_empty() {
            return Err(AccountError::AuthList(format!(
                "invalid value for {}; expected {}",
                provider.name(),
                provider.expected_params_description()
            )));
        }

        let entry = AuthEntry {
            sub_client: sub_client.to_string(),
            provider: provider.name().to_ascii_lowercase(),
            value,
        };

        let mut state = self.state.write();
        if !sub_client.is_empty() && !state.sub_clients.contains_key(sub_client) {
            return Err(AccountError::AuthList(format!("no such sub-client: {sub_client}")));
        }
        if state.auth_list.contains(&entry) {
            return Err(AccountError::AuthList("entry already present".to_string()));
        }
        state.auth_list.push(entry.clone());
        state.touch();
        Ok(entry)
    }

    /// Remove the `index`-th entry (0-based) of `sub_client`'s auth list.
    pub fn remove_auth_entry(&self, sub_client: &str, index: usize) -> Result<AuthEntry, AccountError> {
        let mut state = self.state.write();
        let position = state
            .auth_list
            .iter()
            .enumerate()
            .filter(|(_, e)| e.sub_client == sub_client)
            .nth(index)
            .map(|(i, _)| i)
            .ok_or_else(|| AccountError::AuthList(format!("no entry #{}", index + 1)))?;
        let removed = state.auth_list.remove(position);
        state.touch();
        Ok(removed)
    }

    /// Auth-list entries, optionally restricted to one sub-client.
    pub fn auth_entries(&self, sub_client: Option<&str>) -> Vec<AuthEntry> {
        self.state
            .read()
            .auth_list
            .iter()
            .filter(|e| sub_client.is_none_or(|s| e.sub_client == s))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Sub-clients
    // ------------------------------------------------------------------

    /// Register a named sub-client. Returns the sanitised id.
    pub fn add_sub_client(&self, raw: &str) -> Result<String, AccountError> {
        let name = crate::auth::ident::sanitize_sub_client(raw);
        if name.is_empty() {
            return Err(AccountError::AuthList(format!("invalid sub-client name: {raw}")));
        }
        let mut state = self.state.write();
        if state.sub_clients.contains_key(&name) {
            return Err(AccountError::AuthList(format!("sub-client {name} already exists")));
        }
        state.sub_clients.insert(name.clone(), SubClient::default());
        state.touch();
        Ok(name)
    }

    /// Remove a sub-client and its auth-list entries. An attached socket in
    /// that slot is disconnected.
    pub fn remove_sub_client(self: &Arc<Self>, name: &str) -> Result<(), AccountError> {
        let attached = {
            let mut state = self.state.write();
            if state.sub_clients.remove(name).is_none() {
                return Err(AccountError::AuthList(format!("no such sub-client: {name}")));
            }
            state.auth_list.retain(|e| e.sub_client != name);
            state.touch();
            state
                .sockets
                .values()
                .filter(|s| s.sub_client() == name)
                .cloned()
                .collect::<Vec<_>>()
        };
        for socket in attached {
            socket.close("Sub-client removed");
        }
        Ok(())
    }

    /// Registered sub-clients with their read-only default.
    pub fn sub_clients(&self) -> Vec<(String, bool)> {
        self.state
            .read()
            .sub_clients
            .iter()
            .map(|(name, s)| (name.clone(), s.read_only))
            .collect()
    }

    pub fn has_sub_client(&self, name: &str) -> bool {
        self.state.read().sub_clients.contains_key(name)
    }

    /// Make a registered sub-client start read-only (or not) on attach.
    /// Returns false when the sub-client is not registered.
    pub fn set_sub_client_read_only(&self, name: &str, read_only: bool) -> bool {
        let mut state = self.state.write();
        match state.sub_clients.get_mut(name) {
            Some(sub) => {
                sub.read_only = read_only;
                state.touch();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Upstream settings
    // ------------------------------------------------------------------

    pub fn upstream(&self) -> UpstreamSettings {
        self.state.read().upstream.clone()
    }

    /// Mutate the upstream settings in place.
    pub fn update_upstream<R>(&self, f: impl FnOnce(&mut UpstreamSettings) -> R) -> R {
        let mut state = self.state.write();
        state.touch();
        f(&mut state.upstream)
    }

    pub fn add_server(&self, server: ServerEntry) {
        self.update_upstream(|u| u.servers.push(server));
    }

    pub fn remove_server(&self, index: usize) -> Option<ServerEntry> {
        self.update_upstream(|u| (index < u.servers.len()).then(|| u.servers.remove(index)))
    }

    pub fn server_type(&self) -> Arc<dyn ServerType> {
        Arc::clone(&self.state.read().server_type)
    }

    /// Swap the server type. The caller deactivates the old one first.
    pub fn set_server_type(&self, server_type: Arc<dyn ServerType>) {
        let mut state = self.state.write();
        state.server_type = server_type;
        state.touch();
    }

    // ------------------------------------------------------------------
    // Delete confirmation
    // ------------------------------------------------------------------

    /// Store a fresh delete confirmation code, replacing any previous one.
    pub fn issue_delete_code(&self, code: String) {
        self.state.write().delete_code = Some(code);
    }

    pub fn has_pending_deletion(&self) -> bool {
        self.state.read().delete_code.is_some()
    }

    /// Constant-time comparison against the pending code. Never consumes it.
    pub fn delete_code_matches(&self, code: &str) -> bool {
        match self.state.read().delete_code.as_deref() {
            Some(expected) => bool::from(expected.as_bytes().ct_eq(code.as_bytes())),
            None => false,
        }
    }

    pub fn clear_delete_code(&self) {
        self.state.write().delete_code = None;
    }

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    /// Bind `socket` into the `sub_client` slot and notify the server type.
    /// Returns false when the socket closed before it could be attached.
    ///
    /// Any number of sockets share the default (empty) sub-client. A named
    /// sub-client holds one socket: the previous holder is told and
    /// disconnected.
    pub fn attach_socket(
        self: &Arc<Self>,
        socket: &Arc<UserSocket>,
        sub_client: &str,
        client_type: &str,
    ) -> bool {
        if socket.is_closed() {
            return false;
        }
        socket.bind(self, sub_client, client_type);

        let (displaced, server_type) = {
            let mut state = self.state.write();
            let read_only = state
                .sub_clients
                .get(sub_client)
                .is_some_and(|s| s.read_only);
            socket.set_read_only(read_only);
            let displaced: Vec<Arc<UserSocket>> = if sub_client.is_empty() {
                Vec::new()
            } else {
                let ids: Vec<SocketId> = state
                    .sockets
                    .values()
                    .filter(|s| s.id() != socket.id() && s.sub_client() == sub_client)
                    .map(|s| s.id())
                    .collect();
                ids.iter()
                    .filter_map(|id| state.sockets.remove(id))
                    .collect()
            };
            state.sockets.insert(socket.id(), Arc::clone(socket));
            (displaced, Arc::clone(&state.server_type))
        };

        for old in displaced {
            old.send_bot_message("Another client logged in to this sub-client.");
            old.close("Session replaced");
            server_type.user_disconnected(self, &old);
        }

        info!(
            account = %self.name,
            socket = socket.id(),
            sub_client = %sub_client,
            "Client attached"
        );
        server_type.user_connected(self, socket);

        // A close that raced the insert found nothing to detach.
        if socket.is_closed() {
            self.detach_socket(socket);
            return false;
        }
        true
    }

    /// Remove `socket` from the account. Returns whether it was attached.
    pub fn detach_socket(self: &Arc<Self>, socket: &UserSocket) -> bool {
        let (removed, server_type) = {
            let mut state = self.state.write();
            let removed = state.sockets.remove(&socket.id()).is_some();
            (removed, Arc::clone(&state.server_type))
        };

        if removed {
            debug!(account = %self.name, socket = socket.id(), "Client detached");
            server_type.user_disconnected(self, socket);
        }
        removed
    }

    /// Snapshot of the attached sockets.
    pub fn sockets(&self) -> Vec<Arc<UserSocket>> {
        self.state.read().sockets.values().cloned().collect()
    }

    pub fn socket_count(&self) -> usize {
        self.state.read().sockets.len()
    }

    /// Fan a line out to every attached socket. Suspended accounts get nothing.
    pub fn send_line_to_all(&self, line: &str) {
        if self.is_suspended() {
            return;
        }
        for socket in self.sockets() {
            socket.send_line(line);
        }
    }

    /// Fan a line out to every attached socket except `except`.
    pub fn send_line_to_others(&self, except: SocketId, line: &str) {
        if self.is_suspended() {
            return;
        }
        for socket in self.sockets() {
            if socket.id() != except {
                socket.send_line(line);
            }
        }
    }

    pub fn send_bot_message_to_all(&self, text: &str) {
        for socket in self.sockets() {
            socket.send_bot_message(text);
        }
    }

    pub fn close_all_sockets(&self, reason: &str) {
        for socket in self.sockets() {
            socket.close(reason);
        }
    }

    // ------------------------------------------------------------------
    // Upstream session
    // ------------------------------------------------------------------

    pub fn connection(&self) -> Option<Arc<dyn ConnectionHandler>> {
        self.connection.lock().clone()
    }

    pub fn take_connection(&self) -> Option<Arc<dyn ConnectionHandler>> {
        self.connection.lock().take()
    }

    /// Remove `handler` if it is still the installed session.
    pub fn clear_connection_if(&self, handler: &dyn ConnectionHandler) -> bool {
        let mut slot = self.connection.lock();
        let is_current = slot
            .as_ref()
            .is_some_and(|h| std::ptr::addr_eq(Arc::as_ptr(h), handler as *const dyn ConnectionHandler));
        if is_current {
            *slot = None;
        }
        is_current
    }

    /// Lock serializing session creation and teardown.
    pub fn connect_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.connect_lock
    }

    /// Return the current session, creating one through the server type when
    /// there is none.
    pub async fn ensure_connection(
        self: &Arc<Self>,
        server_index: isize,
    ) -> Result<Arc<dyn ConnectionHandler>, UpstreamError> {
        let _guard = self.connect_lock.lock().await;
        if let Some(handler) = self.connection() {
            return Ok(handler);
        }
        if self.is_retired() || self.is_suspended() {
            return Err(UpstreamError::UnableToConnect {
                account: self.name.clone(),
                reason: "account is not active".to_string(),
            });
        }

        let handler = self
            .server_type()
            .new_connection_handler(self, server_index)
            .await?;
        *self.connection.lock() = Some(Arc::clone(&handler));
        Ok(handler)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("name", &self.name).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::network::UserSocket;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Server type that records lifecycle calls. It connects only when a
    /// stub session has been handed to it.
    #[derive(Default)]
    pub struct RecordingServerType {
        pub connected: AtomicUsize,
        pub disconnected: AtomicUsize,
        pub activated: AtomicUsize,
        pub deactivated: AtomicUsize,
        pub session: Mutex<Option<Arc<StubSession>>>,
    }

    /// Upstream session that only remembers whether it was shut down.
    #[derive(Default)]
    pub struct StubSession {
        pub shut_down: AtomicBool,
    }

    #[async_trait]
    impl ConnectionHandler for StubSession {
        fn server_label(&self) -> String {
            "stub:6667".to_string()
        }
        fn is_connected(&self) -> bool {
            !self.shut_down.load(Ordering::SeqCst)
        }
        fn send_line(&self, _line: &str) -> Result<(), UpstreamError> {
            Ok(())
        }
        fn data_received(&self, _socket: &Arc<UserSocket>, _line: &str) {}
        fn user_connected(&self, _socket: &Arc<UserSocket>) {}
        async fn shutdown(&self, _reason: &str) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ServerType for RecordingServerType {
        fn name(&self) -> &str {
            "recording"
        }
        fn description(&self) -> &str {
            "records lifecycle calls"
        }
        fn activate(&self, _account: &Arc<Account>) {
            self.activated.fetch_add(1, Ordering::SeqCst);
        }
        fn deactivate(&self, _account: &Arc<Account>) {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
        }
        fn user_connected(&self, _account: &Arc<Account>, _socket: &Arc<UserSocket>) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn user_disconnected(&self, _account: &Arc<Account>, _socket: &UserSocket) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
        async fn new_connection_handler(
            &self,
            account: &Arc<Account>,
            _server_index: isize,
        ) -> Result<Arc<dyn ConnectionHandler>, UpstreamError> {
            if let Some(session) = self.session.lock().clone() {
                return Ok(session);
            }
            Err(UpstreamError::UnableToConnect {
                account: account.name().to_string(),
                reason: "test driver".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingServerType;
    use super::*;
    use crate::network::socket::test_support::{drain, socket};

    fn account(name: &str) -> (Arc<Account>, Arc<RecordingServerType>) {
        let st = Arc::new(RecordingServerType::default());
        (Account::new(name, st.clone()), st)
    }

    #[test]
    fn password_check_fails_closed() {
        let (acct, _) = account("alice");
        let providers = AuthProviderManager::with_builtins();
        let (sock, _rx) = socket(1, "127.0.0.1:1", None);

        assert!(!acct.check_authentication(&providers, &sock, "", Some("anything")));
        acct.set_password("secret").unwrap();
        assert!(acct.check_authentication(&providers, &sock, "", Some("secret")));
        assert!(!acct.check_authentication(&providers, &sock, "", Some("wrong")));
        assert!(!acct.check_authentication(&providers, &sock, "", None));
    }

    #[test]
    fn auth_list_is_per_sub_client() {
        let (acct, _) = account("alice");
        let providers = AuthProviderManager::with_builtins();
        let (sock, _rx) = socket(1, "10.0.0.5:1", None);

        acct.add_sub_client("Phone").unwrap();
        acct.add_auth_entry(&providers, &sock, "phone", "IP", "10.0.0.0/24").unwrap();

        assert!(acct.check_alternate_authentication(&providers, &sock, "phone"));
        assert!(!acct.check_alternate_authentication(&providers, &sock, ""));
        assert!(acct.check_authentication(&providers, &sock, "phone", None));
    }

    #[test]
    fn auth_entry_validation() {
        let (acct, _) = account("alice");
        let providers = AuthProviderManager::with_builtins();
        let (sock, _rx) = socket(1, "10.0.0.5:1", None);

        assert!(matches!(
            acct.add_auth_entry(&providers, &sock, "", "nope", "x"),
            Err(AccountError::AuthList(_))
        ));
        assert!(matches!(
            acct.add_auth_entry(&providers, &sock, "", "certfp", ""),
            Err(AccountError::AuthList(_))
        ));
        assert!(matches!(
            acct.add_auth_entry(&providers, &sock, "ghost", "ip", ""),
            Err(AccountError::AuthList(_))
        ));
        acct.add_auth_entry(&providers, &sock, "", "ip", "").unwrap();
        assert!(matches!(
            acct.add_auth_entry(&providers, &sock, "", "ip", "10.0.0.5"),
            Err(AccountError::AuthList(_))
        ));

        let removed = acct.remove_auth_entry("", 0).unwrap();
        assert_eq!(removed.value, "10.0.0.5/32");
        assert!(acct.auth_entries(None).is_empty());
        assert!(acct.remove_auth_entry("", 0).is_err());
    }

    #[test]
    fn unregistered_provider_entries_are_skipped() {
        let (acct, _) = account("alice");
        let full = AuthProviderManager::with_builtins();
        let empty = AuthProviderManager::new();
        let (sock, _rx) = socket(1, "10.0.0.5:1", None);

        acct.add_auth_entry(&full, &sock, "", "ip", "").unwrap();
        assert!(!acct.check_alternate_authentication(&empty, &sock, ""));
    }

    #[test]
    fn mutation_clears_delete_code() {
        let (acct, _) = account("alice");
        acct.issue_delete_code("ABC".into());
        assert!(acct.delete_code_matches("ABC"));
        assert!(!acct.delete_code_matches("abc"));
        assert!(acct.has_pending_deletion());

        acct.set_admin(true);
        assert!(!acct.has_pending_deletion());
        assert!(!acct.delete_code_matches("ABC"));
    }

    #[test]
    fn attach_and_detach_notify_server_type() {
        let (acct, st) = account("alice");
        let (a, _rxa) = socket(1, "127.0.0.1:1", None);
        let (b, _rxb) = socket(2, "127.0.0.1:2", None);

        acct.attach_socket(&a, "", "");
        acct.attach_socket(&b, "work", "ios");
        assert_eq!(acct.socket_count(), 2);
        assert_eq!(st.connected.load(Ordering::SeqCst), 2);
        assert_eq!(b.client_type(), "ios");
        assert_eq!(b.account().unwrap().name(), "alice");

        a.close("bye");
        assert_eq!(acct.socket_count(), 1);
        assert_eq!(st.disconnected.load(Ordering::SeqCst), 1);
        assert!(!acct.detach_socket(&a));
    }

    #[test]
    fn same_sub_client_replaces_previous_socket() {
        let (acct, st) = account("alice");
        let (a, mut rxa) = socket(1, "127.0.0.1:1", None);
        let (b, _rxb) = socket(2, "127.0.0.1:2", None);

        acct.attach_socket(&a, "work", "");
        acct.attach_socket(&b, "work", "");

        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert_eq!(acct.socket_count(), 1);
        assert_eq!(st.disconnected.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rxa).iter().any(|l| l.starts_with("ERROR")));
    }

    #[test]
    fn default_sub_client_is_shared() {
        let (acct, st) = account("alice");
        let (a, mut rxa) = socket(1, "127.0.0.1:1", None);
        let (b, mut rxb) = socket(2, "127.0.0.1:2", None);

        assert!(acct.attach_socket(&a, "", ""));
        assert!(acct.attach_socket(&b, "", ""));
        assert!(!a.is_closed());
        assert_eq!(acct.socket_count(), 2);

        acct.send_line_to_all(":x PRIVMSG #c :hi");
        assert_eq!(drain(&mut rxa), vec![":x PRIVMSG #c :hi"]);
        assert_eq!(drain(&mut rxb), vec![":x PRIVMSG #c :hi"]);

        b.close("bye");
        assert_eq!(acct.socket_count(), 1);
        assert!(!a.is_closed());
        assert_eq!(st.disconnected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_socket_is_never_attached() {
        let (acct, st) = account("alice");
        let (sock, _rx) = socket(1, "127.0.0.1:1", None);
        sock.close("gone");

        assert!(!acct.attach_socket(&sock, "", ""));
        assert_eq!(acct.socket_count(), 0);
        assert_eq!(st.connected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_only_default_applies_on_attach() {
        let (acct, _) = account("alice");
        acct.add_sub_client("viewer").unwrap();
        assert!(acct.set_sub_client_read_only("viewer", true));
        let (sock, _rx) = socket(1, "127.0.0.1:1", None);
        acct.attach_socket(&sock, "viewer", "");
        assert!(sock.is_read_only());
    }

    #[test]
    fn fan_out_skips_suspended_and_excluded() {
        let (acct, _) = account("alice");
        let (a, mut rxa) = socket(1, "127.0.0.1:1", None);
        let (b, mut rxb) = socket(2, "127.0.0.1:2", None);
        acct.attach_socket(&a, "a", "");
        acct.attach_socket(&b, "b", "");

        acct.send_line_to_others(a.id(), ":x PRIVMSG #c :hi");
        assert!(drain(&mut rxa).is_empty());
        assert_eq!(drain(&mut rxb), vec![":x PRIVMSG #c :hi"]);

        acct.set_suspended(Some("abuse".into()));
        acct.send_line_to_all(":x PRIVMSG #c :again");
        assert!(drain(&mut rxa).is_empty());
        assert!(drain(&mut rxb).is_empty());
    }

    #[test]
    fn stored_round_trip_keeps_settings() {
        let (acct, st) = account("Alice");
        acct.set_admin(true);
        acct.add_sub_client("phone").unwrap();
        acct.add_server(ServerEntry {
            host: "irc.example.net".into(),
            port: 6667,
            tls: false,
            password: None,
        });

        let stored = acct.to_stored();
        assert_eq!(stored.server_type, "recording");
        let back = Account::from_stored(stored, st);
        assert_eq!(back.key(), "alice");
        assert!(back.is_admin());
        assert!(back.has_sub_client("phone"));
        assert_eq!(back.upstream().servers.len(), 1);
        assert_eq!(back.created_at(), acct.created_at());
    }

    #[tokio::test]
    async fn ensure_connection_surfaces_unable_to_connect() {
        let (acct, _) = account("alice");
        let err = acct.ensure_connection(-1).await.err().unwrap();
        assert_eq!(err.error_code(), "unable_to_connect");
        assert!(acct.connection().is_none());
    }
}
