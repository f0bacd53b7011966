//! Streaming Credentials
//!
//! Two credentials drive the streams:
//!
//! - **Session token**: sent as `auth-token` on every account streamer action
//! - **Streaming token**: sent to dxFeed as an `Authorization: Bearer` header
//!   and again in the handshake `ext`
//!
//! Both are opaque strings obtained elsewhere. The `Debug` implementation
//! redacts the value for safe logging.

use thiserror::Error;

/// Credential validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Token is empty or whitespace.
    #[error("token cannot be empty")]
    Empty,

    /// Token contains characters that cannot appear in an HTTP header.
    #[error("token contains control characters")]
    InvalidCharacters,
}

/// An opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Create a credential.
    ///
    /// Leading and trailing whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty or contains control characters.
    pub fn new(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into();
        let token = token.trim();

        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        if token.chars().any(char::is_control) {
            return Err(CredentialError::InvalidCharacters);
        }

        Ok(Self {
            token: token.to_string(),
        })
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.token
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn credential_trims_token() {
        let credential = Credential::new("  abc123 \n").unwrap();
        assert_eq!(credential.expose(), "abc123");
        assert_eq!(credential.bearer(), "Bearer abc123");
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    fn credential_rejects_empty(token: &str) {
        assert_eq!(Credential::new(token).unwrap_err(), CredentialError::Empty);
    }

    #[test]
    fn credential_rejects_control_chars() {
        assert_eq!(
            Credential::new("abc\r\ndef").unwrap_err(),
            CredentialError::InvalidCharacters
        );
    }

    #[test]
    fn debug_redacts_token() {
        let credential = Credential::new("super-secret").unwrap();
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
