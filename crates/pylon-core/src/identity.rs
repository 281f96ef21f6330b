//! Authenticated request identity.

use serde::Serialize;

/// Identity attached to a request once a bearer token has been validated.
///
/// The raw token is never stored; only its SHA-256 digest (lowercase hex)
/// is kept. With static tokens the subject is the digest as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AuthInfo {
    hashed_token: String,
    subject: String,
}

impl AuthInfo {
    /// Creates a new identity.
    pub fn new(hashed_token: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            hashed_token: hashed_token.into(),
            subject: subject.into(),
        }
    }

    /// Hex-encoded SHA-256 digest of the presented token.
    pub fn hashed_token(&self) -> &str {
        &self.hashed_token
    }

    /// Subject the token belongs to.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
