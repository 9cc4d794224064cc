//! Token estimation.
//!
//! The upstream exposes no tokenizer, so both surfaces report the estimate
//! its own clients use: character count divided by four, with a structural
//! walk for block-shaped content.

use serde_json::Value;

use dragoman_types::{ChatMessage, ClaudeRequest, MessageContent};

/// Estimate tokens in a plain string.
#[must_use]
pub fn estimate_str(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Estimate tokens in an arbitrary JSON value.
///
/// Strings count directly; lists sum their items; `text` and `tool_result`
/// blocks count their payload; any other object counts its compact JSON
/// rendering.
#[must_use]
pub fn estimate_value(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::String(s) => estimate_str(s),
        Value::Array(items) => items.iter().map(estimate_value).sum(),
        Value::Object(fields) => match fields.get("type").and_then(Value::as_str) {
            Some("text") => fields.get("text").map_or(0, estimate_value),
            Some("tool_result") => fields.get("content").map_or(0, estimate_value),
            _ => serde_json::to_string(value).map_or(0, |s| estimate_str(&s)),
        },
        other => estimate_str(&other.to_string()),
    }
}

/// Estimate the input side of a message list: flattened content only.
#[must_use]
pub fn estimate_messages(messages: &[ChatMessage]) -> u64 {
    let total: u64 = messages
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text(text) => estimate_str(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| {
                    part.text.as_deref().map_or(0, estimate_str)
                        + part.content.as_ref().map_or(0, estimate_value)
                })
                .sum(),
        })
        .sum();
    total.max(1)
}

/// Input-token count for the Anthropic-style count-tokens operation:
/// system prompt, per-message overhead plus role and content, and declared
/// tool schemas. Never less than one.
#[must_use]
pub fn count_claude_tokens(request: &ClaudeRequest) -> u64 {
    let mut total = 0u64;

    if let Some(system) = &request.system {
        total += estimate_value(system);
    }

    for message in &request.messages {
        total += 2;
        total += estimate_str(&message.role);
        total += match &message.content {
            MessageContent::Text(text) => estimate_str(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| {
                    part.text.as_deref().map_or(0, estimate_str)
                        + part.content.as_ref().map_or(0, estimate_value)
                })
                .sum(),
        };
    }

    for tool in &request.tools {
        total += estimate_str(&tool.name);
        total += tool.description.as_deref().map_or(0, estimate_str);
        if let Some(schema) = &tool.input_schema {
            total += serde_json::to_string(schema).map_or(0, |s| estimate_str(&s));
        }
    }

    total.max(1)
}

#[cfg(test)]
mod tests {
    use super::{count_claude_tokens, estimate_str, estimate_value};
    use serde_json::json;

    #[test]
    fn four_chars_per_token() {
        assert_eq!(estimate_str(""), 0);
        assert_eq!(estimate_str("abcd"), 1);
        assert_eq!(estimate_str("abcdefg"), 1);
        assert_eq!(estimate_str("abcdefgh"), 2);
    }

    #[test]
    fn blocks_count_their_payload() {
        assert_eq!(estimate_value(&json!({"type": "text", "text": "abcdefgh"})), 2);
        assert_eq!(
            estimate_value(&json!({"type": "tool_result", "content": "abcd"})),
            1
        );
    }

    #[test]
    fn lists_sum() {
        let value = json!(["abcd", "efgh"]);
        assert_eq!(estimate_value(&value), 2);
    }

    #[test]
    fn count_is_at_least_one() {
        let request = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "messages": []
        }))
        .unwrap();
        assert_eq!(count_claude_tokens(&request), 1);
    }

    #[test]
    fn count_includes_system_messages_and_tools() {
        let request = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "system": "abcdefgh",
            "messages": [{"role": "user", "content": "abcdefgh"}],
            "tools": [{"name": "abcd", "description": "efgh"}]
        }))
        .unwrap();
        // system 2 + (overhead 2 + role 1 + content 2) + tool name 1 + desc 1
        assert_eq!(count_claude_tokens(&request), 9);
    }
}
