//! Anthropic-style protocol surface: streaming and buffered encoders.
//!
//! This surface is not token-incremental relative to the upstream: both
//! encoders assemble the full response first (through the shared
//! classifier), run tool-call detection over it, and then emit either the
//! Anthropic streaming event sequence or one message object. The streaming
//! sequence is message_start, one content block (text, or one tool_use
//! block per detected call), message_delta with the stop reason, and
//! message_stop - no terminal `[DONE]` marker in this protocol.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use dragoman_types::ToolDefinition;

use crate::DECODE_PLACEHOLDER;
use crate::bridge::StreamItem;
use crate::classify::{Classified, FragmentKind, StreamTranslator};
use crate::tokens::estimate_str;
use crate::tools::{DetectedToolCall, detect_tool_calls};

/// Fallback body for responses that assembled to nothing.
const EMPTY_RESPONSE_TEXT: &str = "No valid response content was generated.";

#[derive(Debug, Clone)]
pub struct ClaudeEncodeParams {
    /// The caller's model id, echoed back verbatim.
    pub model: String,
    pub input_tokens: u64,
    pub reasoning_requested: bool,
}

/// Assembled response: final text and reasoning, in upstream order.
#[derive(Debug, Default)]
struct Assembled {
    content: String,
    reasoning: String,
}

/// Drain the event stream through the shared classifier.
async fn assemble(events: &mut mpsc::Receiver<StreamItem>, reasoning_requested: bool) -> Assembled {
    let mut translator = StreamTranslator::new(reasoning_requested);
    let mut assembled = Assembled::default();

    while let Some(item) = events.recv().await {
        match item {
            StreamItem::Event(event) => match translator.next(&event) {
                Classified::Skip | Classified::FragmentTypeChange(_) => {}
                Classified::Finish => break,
                Classified::Content(units) => {
                    for unit in units {
                        match unit.kind {
                            FragmentKind::Thinking => {
                                if reasoning_requested {
                                    assembled.reasoning.push_str(&unit.text);
                                }
                            }
                            FragmentKind::Text => assembled.content.push_str(&unit.text),
                        }
                    }
                }
            },
            StreamItem::DecodeError => {
                if translator.kind() == FragmentKind::Thinking && reasoning_requested {
                    assembled.reasoning.push_str(DECODE_PLACEHOLDER);
                } else {
                    assembled.content.push_str(DECODE_PLACEHOLDER);
                }
                break;
            }
            StreamItem::Done => break,
        }
    }

    assembled
}

fn frame(value: &Value) -> String {
    format!("data: {value}\n\n")
}

fn message_id() -> String {
    format!("msg_{}_{}", unix_now(), rand::random_range(1000..10000))
}

fn tool_use_id(index: usize) -> String {
    format!("toolu_{}_{}_{index}", unix_now(), rand::random_range(1000..10000))
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn tool_use_block(call: &DetectedToolCall, index: usize) -> Value {
    json!({
        "type": "tool_use",
        "id": tool_use_id(index),
        "name": call.name.as_str(),
        "input": call.input.clone(),
    })
}

/// Emit the Anthropic streaming event sequence for one completed response.
pub async fn stream_sse(
    mut events: mpsc::Receiver<StreamItem>,
    params: ClaudeEncodeParams,
    tools: Vec<ToolDefinition>,
    frames: mpsc::Sender<String>,
) {
    let assembled = assemble(&mut events, params.reasoning_requested).await;
    let cleaned = assembled.content.trim().to_string();
    let detected = detect_tool_calls(&cleaned, &tools);

    let message_start = json!({
        "type": "message_start",
        "message": {
            "id": message_id(),
            "type": "message",
            "role": "assistant",
            "model": params.model.as_str(),
            "content": [],
            "stop_reason": null,
            "stop_sequence": null,
            "usage": {"input_tokens": params.input_tokens, "output_tokens": 0},
        },
    });
    if frames.send(frame(&message_start)).await.is_err() {
        return;
    }

    let stop_reason = if detected.is_empty() {
        "end_turn"
    } else {
        "tool_use"
    };

    if detected.is_empty() {
        let start = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""},
        });
        if frames.send(frame(&start)).await.is_err() {
            return;
        }
        if !cleaned.is_empty() {
            let delta = json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": cleaned.as_str()},
            });
            if frames.send(frame(&delta)).await.is_err() {
                return;
            }
        }
        let stop = json!({"type": "content_block_stop", "index": 0});
        if frames.send(frame(&stop)).await.is_err() {
            return;
        }
    } else {
        for (index, call) in detected.iter().enumerate() {
            let start = json!({
                "type": "content_block_start",
                "index": index,
                "content_block": tool_use_block(call, index),
            });
            if frames.send(frame(&start)).await.is_err() {
                return;
            }
            let stop = json!({"type": "content_block_stop", "index": index});
            if frames.send(frame(&stop)).await.is_err() {
                return;
            }
        }
    }

    let output_tokens = estimate_str(cleaned.as_str()).max(1);
    let message_delta = json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason, "stop_sequence": null},
        "usage": {"output_tokens": output_tokens},
    });
    if frames.send(frame(&message_delta)).await.is_err() {
        return;
    }
    let _ = frames.send(frame(&json!({"type": "message_stop"}))).await;
}

/// Drain the full event stream into one Anthropic message object.
pub async fn buffered_response(
    mut events: mpsc::Receiver<StreamItem>,
    params: &ClaudeEncodeParams,
    tools: &[ToolDefinition],
) -> Value {
    let assembled = assemble(&mut events, params.reasoning_requested).await;
    let cleaned = assembled.content.trim().to_string();
    let detected = detect_tool_calls(&cleaned, tools);

    let mut content: Vec<Value> = Vec::new();
    if !assembled.reasoning.is_empty() {
        content.push(json!({"type": "thinking", "thinking": assembled.reasoning}));
    }

    if detected.is_empty() {
        let text = if assembled.content.is_empty() {
            EMPTY_RESPONSE_TEXT.to_string()
        } else {
            assembled.content.clone()
        };
        content.push(json!({"type": "text", "text": text}));
    } else {
        for (index, call) in detected.iter().enumerate() {
            content.push(tool_use_block(call, index));
        }
    }

    let output_tokens =
        estimate_str(&assembled.content) + estimate_str(&assembled.reasoning);

    json!({
        "id": message_id(),
        "type": "message",
        "role": "assistant",
        "model": params.model.as_str(),
        "content": content,
        "stop_reason": if detected.is_empty() { "end_turn" } else { "tool_use" },
        "stop_sequence": null,
        "usage": {
            "input_tokens": params.input_tokens,
            "output_tokens": output_tokens,
        },
    })
}
