//! Login identity splitting.
//!
//! Clients log in as `account[+subclient[+clienttype]]`, either in the USER
//! username or in the username half of `PASS user:password`.

/// Separator between the identity segments.
pub const SEPARATOR: char = '+';

/// A parsed login identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Account name as supplied (lookups fold case).
    pub account: String,
    /// Sub-client id, sanitised to `[a-z0-9_-]`. Empty selects the default slot.
    pub sub_client: String,
    /// Client-type hint, passed through unmodified.
    pub client_type: String,
}

impl Identity {
    /// Split `raw` on `+` into (account, sub-client, client-type).
    ///
    /// Segments beyond the third are ignored.
    pub fn split(raw: &str) -> Self {
        let mut parts = raw.splitn(3, SEPARATOR);
        let account = parts.next().unwrap_or_default().trim().to_string();
        let sub_client = sanitize_sub_client(parts.next().unwrap_or_default());
        let client_type = parts
            .next()
            .map(|t| t.split(SEPARATOR).next().unwrap_or_default().to_string())
            .unwrap_or_default();
        Self {
            account,
            sub_client,
            client_type,
        }
    }
}

/// Lower-case `raw` and strip everything outside `[a-z0-9_-]`.
pub fn sanitize_sub_client(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// Whether `name` is acceptable as an account name.
pub fn is_valid_account_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
