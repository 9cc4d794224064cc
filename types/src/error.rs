//! Gateway error taxonomy.
//!
//! Every failure a request pipeline can surface to the embedding HTTP layer
//! is one of these variants; `status()` gives the HTTP status class the
//! layer should answer with. Upstream detail (login failures in particular)
//! is logged at the failure site and never carried in the caller-visible
//! message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or unusable bearer value on the inbound request.
    #[error("Unauthorized: missing Bearer token.")]
    Auth,

    /// Pool mode requested but no credential is free.
    #[error("No accounts configured or all accounts are busy.")]
    Capacity,

    /// Upstream login failed for the held credential. Detail withheld.
    #[error("Account login failed.")]
    AccountLogin,

    /// Session creation exhausted its retries and rotations.
    #[error("invalid token.")]
    Session,

    /// PoW acquisition or solving exhausted its retries and rotations.
    #[error("Failed to get PoW (invalid token or unknown error).")]
    Pow,

    /// The upstream issued a challenge for an algorithm this build cannot
    /// solve. Fatal for the request, never retried.
    #[error("unsupported PoW algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Completion submission exhausted its retries.
    #[error("Failed to get completion.")]
    Completion,

    /// The caller named a model this gateway does not expose.
    #[error("Model '{0}' is not available.")]
    ModelUnavailable(String),

    /// Malformed inbound request body.
    #[error("{0}")]
    InvalidRequest(String),

    /// Anything else; the message is opaque by policy.
    #[error("Internal Server Error")]
    Internal,
}

impl GatewayError {
    /// HTTP status the embedding layer should map this error to.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Auth | Self::Session | Self::Pow => 401,
            Self::Capacity => 429,
            Self::InvalidRequest(_) => 400,
            Self::ModelUnavailable(_) => 503,
            Self::AccountLogin
            | Self::Completion
            | Self::UnsupportedAlgorithm(_)
            | Self::Internal => 500,
        }
    }
}
