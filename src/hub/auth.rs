//! Token validation collaborator
//!
//! Authentication is an external capability: the hub hands a token to a
//! [`TokenValidator`] and gets back a user identity or nothing. The daemon
//! injects a [`StaticTokenValidator`] built from `--token` flags; deployments
//! with a real identity provider implement the trait over their own store.

use std::collections::HashMap;

use crate::hub::registry::UserId;

/// Resolves an opaque token to a user identity.
pub trait TokenValidator: Send + Sync {
    /// Returns the user the token belongs to, or `None` for an invalid token.
    fn validate(&self, token: &str) -> Option<UserId>;
}

/// In-memory token table.
pub struct StaticTokenValidator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenValidator {
    /// Create an empty table (every token is invalid).
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    /// Build from `token=user` pairs, e.g. from repeated CLI flags.
    /// Malformed entries (no `=`) are skipped with a warning.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens = HashMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((token, user)) if !token.is_empty() && !user.is_empty() => {
                    tokens.insert(token.to_string(), user.to_string());
                }
                _ => tracing::warn!("Ignoring malformed token entry '{}'", pair),
            }
        }
        Self { tokens }
    }

    /// Register a single token.
    pub fn insert(&mut self, token: &str, user: &str) {
        self.tokens.insert(token.to_string(), user.to_string());
    }
}

impl Default for StaticTokenValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs() {
        let validator = StaticTokenValidator::from_pairs(["secret=alice", "other=bob"]);
        assert_eq!(validator.validate("secret").as_deref(), Some("alice"));
        assert_eq!(validator.validate("other").as_deref(), Some("bob"));
        assert_eq!(validator.validate("wrong"), None);
    }

    #[test]
    fn test_malformed_pairs_skipped() {
        let validator = StaticTokenValidator::from_pairs(["no-equals", "=user", "token="]);
        assert_eq!(validator.validate("no-equals"), None);
        assert_eq!(validator.validate(""), None);
    }
}
