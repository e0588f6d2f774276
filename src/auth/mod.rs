//! Client authentication.
//!
//! - [`authenticator`]: per-connection handshake state machine
//! - [`ident`]: `account[+sub-client[+client-type]]` identity parsing
//! - [`password`]: Argon2 hashing
//! - [`providers`]: alternate authentication (certificate fingerprint, IP)

pub mod authenticator;
pub mod ident;
pub mod password;
mod provider;
pub mod providers;

pub use authenticator::{AuthStatus, Authenticator, HandshakeOutcome};
pub use provider::{AuthProvider, AuthProviderManager};
