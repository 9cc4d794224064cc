//! Request pipeline and stream translation.
//!
//! # Architecture
//!
//! The crate is organized around one request pipeline with a shared
//! translation core:
//!
//! - [`Gateway`] - Composition root: resolves the caller's auth mode,
//!   drives session creation, PoW and completion submission with bounded
//!   retries and credential rotation, and hands the upstream event stream
//!   to an encoder.
//! - [`auth`] - Per-request [`AuthContext`]: pool vs pass-through mode,
//!   rotation bookkeeping, release-exactly-once semantics.
//! - [`classify`] - The single classifier turning upstream delta events
//!   into `{Skip, Finish, FragmentTypeChange, Content}`. Every encoder
//!   consumes this one implementation; nothing else inspects event paths.
//! - [`bridge`] - Producer task reading the upstream byte stream into a
//!   bounded channel of parsed events, and the heartbeat-aware drain the
//!   streaming encoders sit on.
//! - [`openai`] / [`claude`] - The two protocol surfaces, each with a
//!   streaming and a buffered encoder.
//! - [`prompt`] / [`tools`] / [`tokens`] - Message preparation for the
//!   upstream template, tool-call detection over assembled output, and
//!   the chars/4 token estimates both surfaces report.
//!
//! Streaming responses are delivered as a `tokio::sync::mpsc` receiver of
//! ready-to-write SSE frames; the embedding HTTP layer writes them verbatim
//! under `text/event-stream`. Buffered responses are single JSON bodies.
//!
//! # Error handling
//!
//! Pipeline-stage failures surface as [`GatewayError`] with an HTTP status
//! mapping. Failures after streaming has begun degrade in-band instead: the
//! affected fragment is replaced with a placeholder and the stream is
//! terminated early, which keeps clients from hanging on a broken
//! connection.

pub mod auth;
pub mod bridge;
pub mod classify;
pub mod claude;
pub mod openai;
pub mod prompt;
pub mod tokens;
pub mod tools;

mod pipeline;

pub use auth::AuthContext;
pub use pipeline::{ChatOutcome, Gateway};

pub use dragoman_types::GatewayError;

/// Placeholder emitted in place of a fragment that could not be decoded
/// mid-stream. The stream ends right after it.
pub(crate) const DECODE_PLACEHOLDER: &str = "Stream decoding failed, please try again later.";
