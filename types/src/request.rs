//! Inbound request shapes for the two public wire protocols.
//!
//! The embedding HTTP layer deserializes request bodies into these types
//! and hands them to the gateway. Fields this gateway does not forward
//! (sampling knobs the upstream has no lever for) are accepted and carried
//! so the Claude-to-upstream conversion can pass them through where the
//! upstream payload has a slot.

use serde::Deserialize;
use serde_json::Value;

/// One chat message in either protocol's request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content: a bare string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A content part. Covers the OpenAI-style `{"type": "text", "text": ...}`
/// part and the Claude-style `text` / `tool_result` blocks; unknown part
/// kinds keep their raw fields and are ignored by the flatteners.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    /// `tool_result` payload; a string or nested blocks.
    #[serde(default)]
    pub content: Option<Value>,
}

/// A tool the caller declares on the Claude-style surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// OpenAI-style chat-completion request body.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// Anthropic-style messages request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// System prompt: a bare string or content blocks.
    #[serde(default)]
    pub system: Option<Value>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
}
