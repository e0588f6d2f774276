//! Built-in auth providers.

use super::provider::{AuthProvider, AuthProviderManager};
use crate::network::UserSocket;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Register every built-in provider.
pub fn register_builtin_providers(manager: &AuthProviderManager) {
    manager.register(Arc::new(CertFpProvider));
    manager.register(Arc::new(IpProvider));
}

/// TLS client certificate fingerprint (SHA-256, uppercase hex).
pub struct CertFpProvider;

impl CertFpProvider {
    /// Strip separators and uppercase. Anything but 64 hex digits is rejected.
    pub fn normalize(raw: &str) -> Option<String> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !matches!(c, ':' | ' ' | '-'))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        (cleaned.len() == 64 && cleaned.chars().all(|c| c.is_ascii_hexdigit())).then_some(cleaned)
    }
}

impl AuthProvider for CertFpProvider {
    fn name(&self) -> &str {
        "certfp"
    }

    fn expected_params_description(&self) -> &str {
        "[sha256 fingerprint] (defaults to the certificate of this connection)"
    }

    fn check_authentication(&self, socket: &UserSocket, stored_value: &str) -> bool {
        match socket.cert_fingerprint() {
            Some(fp) => bool::from(fp.as_bytes().ct_eq(stored_value.as_bytes())),
            None => false,
        }
    }

    fn validate_and_normalize(&self, socket: &UserSocket, _sub_client: &str, raw_input: &str) -> String {
        let raw = raw_input.trim();
        let input = if raw.is_empty() {
            socket.cert_fingerprint().unwrap_or_default()
        } else {
            raw
        };
        Self::normalize(input).unwrap_or_default()
    }
}

/// Source address inside a CIDR network.
pub struct IpProvider;

impl AuthProvider for IpProvider {
    fn name(&self) -> &str {
        "ip"
    }

    fn expected_params_description(&self) -> &str {
        "[address or CIDR network] (defaults to the address of this connection)"
    }

    fn check_authentication(&self, socket: &UserSocket, stored_value: &str) -> bool {
        match stored_value.parse::<IpNet>() {
            Ok(net) => net.contains(&socket.peer_addr().ip().to_canonical()),
            Err(_) => false,
        }
    }

    fn validate_and_normalize(&self, socket: &UserSocket, _sub_client: &str, raw_input: &str) -> String {
        let raw = raw_input.trim();
        if raw.is_empty() {
            return IpNet::from(socket.peer_addr().ip().to_canonical()).to_string();
        }
        if let Ok(net) = raw.parse::<IpNet>() {
            return net.trunc().to_string();
        }
        match raw.parse::<IpAddr>() {
            Ok(addr) => IpNet::from(addr).to_string(),
            Err(_) => String::new(),
        }
    }
}
