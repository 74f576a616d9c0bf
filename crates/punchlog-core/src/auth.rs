//! Shared-secret check for terminals.
//!
//! Terminals present a static API key. Both sides are reduced to SHA-256
//! digests and compared in constant time, so neither the content nor the
//! length of the configured key leaks through timing.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Decides whether a caller may append.
pub struct ApiKeyAuthorizer {
    key: Option<SecretString>,
}

impl std::fmt::Debug for ApiKeyAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuthorizer")
            .field("configured", &self.key.is_some())
            .finish()
    }
}

impl ApiKeyAuthorizer {
    /// Creates an authorizer. With no key configured every caller is
    /// rejected.
    #[must_use]
    pub fn new(key: Option<SecretString>) -> Self {
        let key = key.filter(|k| !k.expose_secret().is_empty());
        if key.is_none() {
            warn!("no ingest API key configured; all append requests will be rejected");
        }
        Self { key }
    }

    /// Reads the key from the named environment variable.
    #[must_use]
    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok().map(SecretString::from))
    }

    /// Returns `true` if a key is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Checks a presented credential.
    #[must_use]
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        let (Some(expected), Some(presented)) = (self.key.as_ref(), presented) else {
            return false;
        };
        let expected = Sha256::digest(expected.expose_secret().as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        bool::from(expected.as_slice().ct_eq(presented.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer(key: &str) -> ApiKeyAuthorizer {
        ApiKeyAuthorizer::new(Some(SecretString::from(key.to_string())))
    }

    #[test]
    fn accepts_matching_key() {
        assert!(authorizer("s3cret").authorize(Some("s3cret")));
    }

    #[test]
    fn rejects_wrong_or_missing_key() {
        let auth = authorizer("s3cret");
        assert!(!auth.authorize(Some("s3cre")));
        assert!(!auth.authorize(Some("s3cret ")));
        assert!(!auth.authorize(Some("")));
        assert!(!auth.authorize(None));
    }

    #[test]
    fn unconfigured_key_fails_closed() {
        let auth = ApiKeyAuthorizer::new(None);
        assert!(!auth.is_configured());
        assert!(!auth.authorize(Some("anything")));
        assert!(!auth.authorize(Some("")));

        let empty = authorizer("");
        assert!(!empty.is_configured());
        assert!(!empty.authorize(Some("")));
    }

    #[test]
    fn debug_does_not_print_the_key() {
        let rendered = format!("{:?}", authorizer("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
