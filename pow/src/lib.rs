//! Proof-of-work service.
//!
//! The upstream gates completion submission behind a puzzle: a challenge
//! string, salt, difficulty and expiry, to be answered with a nonce found
//! by an opaque WASM program the upstream itself ships. This crate executes
//! that program behind a narrow [`Solver`] seam, caches solved nonces for
//! the short window in which the upstream reissues identical challenges,
//! and encodes accepted answers into the header value the completion
//! endpoint expects.
//!
//! The puzzle algorithm is deliberately treated as a black box: the solver
//! runs the upstream-issued artifact unmodified and never reimplements its
//! internals.

mod cache;
mod service;
mod solver;

pub use cache::NonceCache;
pub use service::PowService;
pub use solver::{SolveError, Solver, WasmSolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PowError {
    /// The challenge names an algorithm this build cannot solve. Fatal for
    /// the request; retrying with another credential cannot change it.
    #[error("unsupported PoW algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
