//! Upstream credential pool.
//!
//! Tracks which credentials are free and which are held by an in-flight
//! request, and keeps each held credential's bearer token fresh. The pool
//! never blocks waiting for a credential: a full scan that finds nothing
//! eligible is a capacity condition the caller surfaces immediately.

mod pool;
mod token;

pub use pool::AccountPool;
pub use token::{decode_expiry, needs_refresh};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    /// Upstream login failed for this credential. Fatal for the credential
    /// within the current request; the pipeline decides whether to rotate.
    #[error("account login failed")]
    Login(#[source] dragoman_upstream::UpstreamError),
}
