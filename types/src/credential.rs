//! Upstream login credentials.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// One set of upstream login secrets plus its current session token.
///
/// A credential is identified by its email, falling back to its mobile
/// number. Credentials without either are unusable and are skipped by the
/// account pool. The token and its issuance time are refreshed in place by
/// the pool's `ensure_token` while the credential is held by a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// When the current token was obtained by this process. Not persisted;
    /// freshness decisions use the token's own expiry claim.
    #[serde(skip)]
    pub token_obtained_at: Option<SystemTime>,
}

impl Credential {
    /// The pool identifier: trimmed email, else trimmed mobile.
    ///
    /// Returns `None` when both are missing or blank.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        for field in [&self.email, &self.mobile] {
            if let Some(value) = field {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
        None
    }

    /// Current token, treating blank strings as absent.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::Credential;

    #[test]
    fn identifier_prefers_email() {
        let cred = Credential {
            email: Some("a@example.com".to_string()),
            mobile: Some("12345".to_string()),
            ..Credential::default()
        };
        assert_eq!(cred.identifier(), Some("a@example.com"));
    }

    #[test]
    fn identifier_falls_back_to_mobile() {
        let cred = Credential {
            email: Some("   ".to_string()),
            mobile: Some(" 12345 ".to_string()),
            ..Credential::default()
        };
        assert_eq!(cred.identifier(), Some("12345"));
    }

    #[test]
    fn identifier_none_when_blank() {
        assert_eq!(Credential::default().identifier(), None);
    }

    #[test]
    fn blank_token_is_absent() {
        let cred = Credential {
            token: Some("  ".to_string()),
            ..Credential::default()
        };
        assert_eq!(cred.token(), None);
    }
}
