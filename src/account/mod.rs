//! Accounts: identities, their attached sockets, and persistence.

#[allow(clippy::module_inception)]
mod account;
mod manager;
mod store;

pub use account::Account;
pub use manager::AccountManager;
pub use store::{
    AccountStore, AuthEntry, ServerEntry, StoreError, StoredAccount, StoredSubClient,
    UpstreamSettings,
};

#[cfg(test)]
pub(crate) use account::test_support;
