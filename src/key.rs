//! Store key construction for counters and leases.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::error::LimiterError;

/// Prefix of every counter key.
pub const KEY_NAMESPACE: &str = "gorl";

/// Prefix of every lease key. Distinct from [`KEY_NAMESPACE`] so a lease can
/// never collide with a counter, whatever the scope is called.
pub const LEASE_NAMESPACE: &str = "gorl-lease";

const MAX_IDENTITY_LEN: usize = 256;

static SCOPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").expect("scope pattern is valid"));

/// Identifies one counter: the protected action and the caller attempting it.
///
/// Scopes are restricted to `[A-Za-z0-9_.-]`, so the first `:` after the
/// namespace always ends the scope and identities (IPv6 addresses included)
/// may contain colons without making keys ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    scope: String,
    identity: String,
}

impl RateLimitKey {
    pub fn new(
        scope: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<Self, LimiterError> {
        let scope = scope.into();
        let identity = identity.into();

        if !SCOPE_PATTERN.is_match(&scope) {
            return Err(LimiterError::Validation(format!(
                "scope '{}' must be 1-64 characters of letters, digits, '.', '-' or '_'",
                scope
            )));
        }

        if identity.is_empty() {
            return Err(LimiterError::Validation("identity cannot be empty".to_string()));
        }

        if identity.len() > MAX_IDENTITY_LEN {
            return Err(LimiterError::Validation(format!(
                "identity exceeds {} bytes",
                MAX_IDENTITY_LEN
            )));
        }

        if identity.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(LimiterError::Validation(
                "identity cannot contain whitespace or control characters".to_string(),
            ));
        }

        Ok(Self { scope, identity })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// `gorl:<scope>:<identity>`
    pub fn counter_key(&self) -> String {
        format!("{}:{}:{}", KEY_NAMESPACE, self.scope, self.identity)
    }

    /// Leases are held per scope and identity, so unrelated callers of the
    /// same scope never wait on each other.
    pub fn lease_key(&self) -> String {
        format!("{}:{}:{}", LEASE_NAMESPACE, self.scope, self.identity)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.identity)
    }
}
