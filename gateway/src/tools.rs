//! Tool-call detection over assembled output.
//!
//! The upstream has no native tool calling; the Claude surface teaches the
//! model to answer with a `{"tool_calls": [...]}` object and this module
//! recovers those calls from the final text. A call is accepted only when
//! it names a tool the caller declared; unparsable or unknown candidates
//! are dropped silently, never reported as errors.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use dragoman_types::ToolDefinition;

/// `{"tool_calls": [...]}`-shaped substrings, single- or double-quoted key.
static TOOL_CALL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\s*["']tool_calls["']\s*:\s*\[(.*?)\]\s*\}"#).expect("valid pattern")
});

/// A tool call recovered from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedToolCall {
    pub name: String,
    pub input: Value,
}

/// Detect tool calls in the trimmed response text.
#[must_use]
pub fn detect_tool_calls(text: &str, requested: &[ToolDefinition]) -> Vec<DetectedToolCall> {
    let mut detected = Vec::new();

    // The whole answer as a single tool_calls object.
    if text.starts_with(r#"{"tool_calls":"#) && text.ends_with("]}") {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            collect_matching(&value, requested, &mut detected);
        }
    }

    if detected.is_empty() {
        // Tool_calls objects embedded in surrounding prose.
        for capture in TOOL_CALL_SHAPE.captures_iter(text) {
            let candidate = format!(r#"{{"tool_calls": [{}]}}"#, &capture[1]);
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                collect_matching(&value, requested, &mut detected);
            }
        }
    }

    detected
}

fn collect_matching(
    value: &Value,
    requested: &[ToolDefinition],
    detected: &mut Vec<DetectedToolCall>,
) {
    let Some(calls) = value.get("tool_calls").and_then(Value::as_array) else {
        return;
    };

    for call in calls {
        let Some(name) = call.get("name").and_then(Value::as_str) else {
            continue;
        };
        if !requested.iter().any(|tool| tool.name == name) {
            continue;
        }
        detected.push(DetectedToolCall {
            name: name.to_string(),
            input: call.get("input").cloned().unwrap_or_else(|| json!({})),
        });
    }
}
