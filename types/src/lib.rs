//! Core domain types for Dragoman.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the request shapes of the two public wire protocols, the
//! upstream stream grammar, credentials, and the gateway error taxonomy.
//! Everything here can be used from any layer of the workspace.

mod credential;
mod error;
mod model;
mod request;
mod upstream;

pub use credential::Credential;
pub use error::GatewayError;
pub use model::{ModelModes, resolve_model};
pub use request::{
    ChatMessage, ClaudeRequest, ContentPart, MessageContent, OpenAiRequest, ToolDefinition,
};
pub use upstream::{Challenge, DeltaEvent};
