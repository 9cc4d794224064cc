//! Thin client for the upstream consumer chat backend.
//!
//! Four operations: login, create-session, fetch-PoW-challenge, and
//! completion submission. The client is deliberately narrow: session and
//! challenge fetches soft-fail to `None` because the request pipeline owns
//! the retry-and-rotate policy for those stages, while completion
//! submission carries its own bounded retry with a fixed pause and no
//! rotation.
//!
//! All calls ride one shared `reqwest` client configured like the official
//! mobile app: same user-agent and client identification headers, TLS only,
//! no redirects.

mod client;

pub use client::{CompletionPayload, UpstreamClient};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The credential is missing an email/mobile or a password.
    #[error("account is missing login secrets")]
    MissingCredentials,

    /// Login answered but the token was absent or the shape was wrong.
    #[error("login response was malformed")]
    MalformedLogin,

    /// Login was rejected outright (bad password, banned account, ...).
    #[error("login rejected with status {status}")]
    LoginRejected { status: u16 },

    /// Completion submission failed on every attempt.
    #[error("completion request failed after {attempts} attempts")]
    CompletionExhausted { attempts: u32 },
}
