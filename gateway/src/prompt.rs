//! Message preparation for the upstream prompt template.
//!
//! The upstream takes one flat prompt string, not a message list. Messages
//! are flattened to text, adjacent same-role turns merged, and the result
//! rendered with the upstream's own turn markers. Markdown images are
//! downgraded to plain links because the upstream rejects image syntax it
//! did not produce.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use dragoman_config::ModelMapping;
use dragoman_types::{ChatMessage, ClaudeRequest, MessageContent, ToolDefinition};

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[(.*?)\]\((.*?)\)").expect("valid pattern"));

/// Render a message list into the upstream's single-prompt form.
#[must_use]
pub fn prepare_prompt(messages: &[ChatMessage]) -> String {
    let mut flattened: Vec<(String, String)> = Vec::new();
    for message in messages {
        flattened.push((message.role.clone(), flatten_content(&message.content)));
    }

    if flattened.is_empty() {
        return String::new();
    }

    // Merge adjacent same-role turns.
    let mut merged: Vec<(String, String)> = Vec::new();
    for (role, text) in flattened {
        match merged.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(&text);
            }
            _ => merged.push((role, text)),
        }
    }

    let mut prompt = String::new();
    for (index, (role, text)) in merged.iter().enumerate() {
        match role.as_str() {
            "assistant" => {
                prompt.push_str("<｜Assistant｜>");
                prompt.push_str(text);
                prompt.push_str("<｜end▁of▁sentence｜>");
            }
            "user" | "system" => {
                if index > 0 {
                    prompt.push_str("<｜User｜>");
                }
                prompt.push_str(text);
            }
            _ => prompt.push_str(text),
        }
    }

    MARKDOWN_IMAGE.replace_all(&prompt, "[$1]($2)").into_owned()
}

/// Flatten message content to text: string content verbatim, part lists
/// joined over their text parts.
fn flatten_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Flatten Claude-style block content (`text` and `tool_result` blocks)
/// into plain-text messages. Messages whose blocks produce nothing keep
/// their original content.
#[must_use]
pub fn normalize_claude_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| {
            let MessageContent::Parts(parts) = &message.content else {
                return message.clone();
            };

            let mut collected: Vec<String> = Vec::new();
            for part in parts {
                match part.kind.as_str() {
                    "text" => {
                        if let Some(text) = &part.text {
                            collected.push(text.clone());
                        }
                    }
                    "tool_result" => {
                        if let Some(content) = &part.content {
                            collected.push(stringify_block_content(content));
                        }
                    }
                    _ => {}
                }
            }

            if collected.is_empty() {
                message.clone()
            } else {
                ChatMessage {
                    role: message.role.clone(),
                    content: MessageContent::Text(collected.join("\n")),
                }
            }
        })
        .collect()
}

fn stringify_block_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Map a Claude-surface request onto the gateway model and message list
/// the upstream pipeline runs with.
///
/// The caller's model id picks the slow tier when it names an opus, a
/// reasoner, or the tier itself; everything else is the fast tier. The
/// `system` prompt becomes a leading system message.
#[must_use]
pub fn claude_to_upstream(
    request: &ClaudeRequest,
    mapping: &ModelMapping,
) -> (String, Vec<ChatMessage>) {
    let model_lower = request.model.to_lowercase();
    let model = if model_lower.contains("opus")
        || model_lower.contains("reasoner")
        || model_lower.contains("slow")
    {
        mapping.slow.clone()
    } else {
        mapping.fast.clone()
    };

    let mut messages = normalize_claude_messages(&request.messages);
    if let Some(system) = &request.system {
        messages.insert(
            0,
            ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(flatten_system(system)),
            },
        );
    }

    (model, messages)
}

fn flatten_system(system: &Value) -> String {
    match system {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Build the synthesized system message describing the declared tools,
/// used when the caller declared tools but supplied no system message of
/// their own.
#[must_use]
pub fn tool_system_message(tools: &[ToolDefinition]) -> ChatMessage {
    let mut catalog: Vec<String> = Vec::new();
    for tool in tools {
        let mut info = format!(
            "Tool: {}\nDescription: {}",
            tool.name,
            tool.description.as_deref().unwrap_or("No description available")
        );

        if let Some(schema) = &tool.input_schema
            && let Some(properties) = schema.get("properties").and_then(Value::as_object)
        {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            let mut lines: Vec<String> = Vec::new();
            for (name, details) in properties {
                let kind = details
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string");
                let marker = if required.contains(&name.as_str()) {
                    " (required)"
                } else {
                    ""
                };
                lines.push(format!("  - {name}: {kind}{marker}"));
            }
            if !lines.is_empty() {
                info.push_str("\nParameters:\n");
                info.push_str(&lines.join("\n"));
            }
        }

        catalog.push(info);
    }

    let text = format!(
        "You are Claude, a helpful AI assistant. You have access to these tools:\n\n{}\n\n\
         When you need to use tools, respond ONLY a JSON object with a tool_calls array.",
        catalog.join("\n")
    );

    ChatMessage {
        role: "system".to_string(),
        content: MessageContent::Text(text),
    }
}

/// True when any message in the list carries the system role.
#[must_use]
pub fn has_system_message(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.role == "system")
}

#[cfg(test)]
mod tests {
    use super::{
        claude_to_upstream, has_system_message, normalize_claude_messages, prepare_prompt,
        tool_system_message,
    };
    use dragoman_config::ModelMapping;
    use dragoman_types::{ChatMessage, MessageContent};
    use serde_json::json;

    fn message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn leading_user_turn_has_no_marker() {
        let prompt = prepare_prompt(&[message("user", "hello")]);
        assert_eq!(prompt, "hello");
    }

    #[test]
    fn assistant_turns_are_wrapped() {
        let prompt = prepare_prompt(&[
            message("user", "hi"),
            message("assistant", "hello"),
            message("user", "again"),
        ]);
        assert_eq!(
            prompt,
            "hi<｜Assistant｜>hello<｜end▁of▁sentence｜><｜User｜>again"
        );
    }

    #[test]
    fn adjacent_same_role_turns_merge() {
        let prompt = prepare_prompt(&[message("user", "one"), message("user", "two")]);
        assert_eq!(prompt, "one\n\ntwo");
    }

    #[test]
    fn markdown_images_become_links() {
        let prompt = prepare_prompt(&[message("user", "see ![alt](http://x/y.png)")]);
        assert_eq!(prompt, "see [alt](http://x/y.png)");
    }

    #[test]
    fn normalize_flattens_text_and_tool_result_blocks() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "user", "content": [
                {"type": "text", "text": "question"},
                {"type": "tool_result", "content": "result"}
            ]}
        ]))
        .unwrap();

        let normalized = normalize_claude_messages(&messages);
        assert!(matches!(
            &normalized[0].content,
            MessageContent::Text(t) if t == "question\nresult"
        ));
    }

    #[test]
    fn claude_model_mapping_buckets_by_tier() {
        let mapping = ModelMapping {
            fast: "deepseek-chat".to_string(),
            slow: "deepseek-reasoner".to_string(),
        };

        let opus: dragoman_types::ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-opus-4-20250514", "messages": []
        }))
        .unwrap();
        assert_eq!(claude_to_upstream(&opus, &mapping).0, "deepseek-reasoner");

        let sonnet: dragoman_types::ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514", "messages": []
        }))
        .unwrap();
        assert_eq!(claude_to_upstream(&sonnet, &mapping).0, "deepseek-chat");
    }

    #[test]
    fn system_prompt_becomes_leading_message() {
        let request: dragoman_types::ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let (_, messages) = claude_to_upstream(&request, &ModelMapping::default());
        assert_eq!(messages[0].role, "system");
        assert!(has_system_message(&messages));
    }

    #[test]
    fn tool_catalog_lists_parameters() {
        let tools: Vec<dragoman_types::ToolDefinition> = serde_json::from_value(json!([
            {"name": "get_weather", "description": "Look up weather",
             "input_schema": {"type": "object",
                              "properties": {"city": {"type": "string"}},
                              "required": ["city"]}}
        ]))
        .unwrap();

        let message = tool_system_message(&tools);
        let MessageContent::Text(text) = &message.content else {
            panic!("expected text");
        };
        assert!(text.contains("Tool: get_weather"));
        assert!(text.contains("  - city: string (required)"));
        assert!(text.contains("tool_calls array"));
    }
}
