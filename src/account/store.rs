//! Redb-backed account persistence.
//!
//! # Schema
//!
//! ```text
//! ACCOUNTS: name_lower -> StoredAccount (serde_json)
//! ```
//!
//! Every call runs in its own write transaction and returns after commit, so
//! a successful save survives a crash immediately afterwards.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Redb table for accounts.
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Errors from account persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One auth-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    /// Sub-client the entry applies to (empty = default slot).
    pub sub_client: String,
    /// Provider name, lower case.
    pub provider: String,
    /// Normalised value as returned by the provider.
    pub value: String,
}

/// One upstream server in an account's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerEntry {
    /// `host:port`, with a `+` before the port for TLS.
    pub fn label(&self) -> String {
        if self.tls {
            format!("{}:+{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Per-account upstream identity and server pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub altnick: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
}

/// A named sub-client slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSubClient {
    pub name: String,
    /// Sockets attaching to this slot start read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Serialized account for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    /// Account name (case preserved; the key is the lower-cased form).
    pub name: String,

    /// Argon2 PHC string.
    pub password_hash: Option<String>,

    pub admin: bool,

    /// Suspension reason, if suspended.
    pub suspended: Option<String>,

    #[serde(default)]
    pub sub_clients: Vec<StoredSubClient>,

    #[serde(default)]
    pub auth_list: Vec<AuthEntry>,

    /// Name of the account's server type.
    pub server_type: String,

    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// When this account was created (Unix epoch).
    pub created_at: i64,
}

/// Redb-backed account persistence.
#[derive(Clone)]
pub struct AccountStore {
    db: Arc<Database>,
}

impl AccountStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;
        Self::new(Arc::new(db))
    }

    /// Wrap an existing database, creating the table if needed.
    pub fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
        }
        write_txn.commit()?;

        info!("Account store initialized");
        Ok(Self { db })
    }

    /// Insert or replace an account.
    pub fn save(&self, account: &StoredAccount) -> Result<(), StoreError> {
        let key = account.name.to_ascii_lowercase();
        let value =
            serde_json::to_vec(account).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;

        debug!(account = %account.name, "Saved account");
        Ok(())
    }

    /// Save several accounts in one transaction.
    pub fn save_all(&self, accounts: &[StoredAccount]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            for account in accounts {
                let key = account.name.to_ascii_lowercase();
                let value = serde_json::to_vec(account)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                table.insert(key.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;

        debug!(count = accounts.len(), "Saved accounts");
        Ok(())
    }

    /// Load every account. Records that fail to decode are skipped.
    pub fn load_all(&self) -> Result<Vec<StoredAccount>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;

        let mut accounts = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            match serde_json::from_slice::<StoredAccount>(value.value()) {
                Ok(stored) => accounts.push(stored),
                Err(e) => {
                    warn!(key = %key.value(), error = %e, "Failed to deserialize stored account, skipping");
                }
            }
        }

        info!(count = accounts.len(), "Loaded accounts from storage");
        Ok(accounts)
    }

    /// Delete an account. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let key = name.to_ascii_lowercase();
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            table.remove(key.as_str())?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            debug!(account = %name, "Deleted account from storage");
        }
        Ok(deleted)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (AccountStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = AccountStore::open(dir.path().join("test.redb")).unwrap();
        (store, dir)
    }

    fn stored(name: &str) -> StoredAccount {
        StoredAccount {
            name: name.to_string(),
            password_hash: Some("$argon2id$dummy".to_string()),
            admin: false,
            suspended: None,
            sub_clients: vec![StoredSubClient {
                name: "phone".into(),
                read_only: true,
            }],
            auth_list: vec![AuthEntry {
                sub_client: "phone".into(),
                provider: "ip".into(),
                value: "10.0.0.0/8".into(),
            }],
            server_type: "irc".to_string(),
            upstream: UpstreamSettings {
                servers: vec![ServerEntry {
                    host: "irc.example.net".into(),
                    port: 6697,
                    tls: true,
                    password: None,
                }],
                nickname: Some("alice".into()),
                ..Default::default()
            },
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_save_and_load_account() {
        let (store, _dir) = create_test_store();
        store.save(&stored("Alice")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let alice = &loaded[0];
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.auth_list.len(), 1);
        assert_eq!(alice.upstream.servers[0].label(), "irc.example.net:+6697");
        assert!(alice.sub_clients[0].read_only);
    }

    #[test]
    fn test_save_replaces_case_insensitively() {
        let (store, _dir) = create_test_store();
        store.save(&stored("alice")).unwrap();
        let mut again = stored("ALICE");
        again.admin = true;
        store.save(&again).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].admin);
    }

    #[test]
    fn test_delete_account() {
        let (store, _dir) = create_test_store();
        store.save_all(&[stored("alice"), stored("bob")]).unwrap();

        assert!(store.delete("Alice").unwrap());
        assert!(!store.delete("alice").unwrap());
        let names: Vec<_> = store.load_all().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["bob".to_string()]);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let store = AccountStore::open(&path).unwrap();
            store.save(&stored("carol")).unwrap();
        }
        let store = AccountStore::open(&path).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
