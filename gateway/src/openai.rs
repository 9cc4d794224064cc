//! OpenAI-style protocol surface: streaming and buffered encoders.
//!
//! The streaming encoder is token-incremental: every content unit from the
//! classifier becomes one `chat.completion.chunk` frame, with keep-alive
//! comments interleaved during upstream gaps. The buffered encoder drains
//! the same event stream into one `chat.completion` object. Both report
//! the chars/4 usage estimate, with reasoning counted separately.

use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::DECODE_PLACEHOLDER;
use crate::bridge::{self, Drained, StreamItem};
use crate::classify::{Classified, ContentUnit, FragmentKind, StreamTranslator};
use crate::tokens::estimate_str;

/// Streams that produce nothing but heartbeats for this long are
/// considered stalled and terminated defensively.
const MAX_CONSECUTIVE_HEARTBEATS: u32 = 60;

/// Terminal marker frame of the OpenAI-style stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Keep-alive comment frame, emitted when the upstream goes quiet.
pub const KEEP_ALIVE_FRAME: &str = ": keep-alive\n\n";

/// Everything the encoders need besides the event stream itself.
#[derive(Debug, Clone)]
pub struct OpenAiEncodeParams {
    pub model: String,
    pub completion_id: String,
    pub created: u64,
    /// The rendered upstream prompt; only its length matters here.
    pub prompt: String,
    pub reasoning_requested: bool,
    pub search_enabled: bool,
    pub keep_alive: Duration,
}

fn frame(value: &Value) -> String {
    format!("data: {value}\n\n")
}

/// Running totals shared by both encoders.
#[derive(Debug, Default)]
struct Accumulated {
    reasoning: String,
    content: String,
}

impl Accumulated {
    fn usage(&self, prompt: &str) -> Value {
        let prompt_tokens = estimate_str(prompt);
        let reasoning_tokens = estimate_str(&self.reasoning);
        let completion_tokens = estimate_str(&self.content);
        json!({
            "prompt_tokens": prompt_tokens,
            "completion_tokens": reasoning_tokens + completion_tokens,
            "total_tokens": prompt_tokens + reasoning_tokens + completion_tokens,
            "completion_tokens_details": {"reasoning_tokens": reasoning_tokens},
        })
    }
}

/// Drive the streaming encoder until the upstream finishes or the caller
/// goes away. Emits ready-to-write SSE frames into `frames`.
pub async fn stream_sse(
    mut events: mpsc::Receiver<StreamItem>,
    params: OpenAiEncodeParams,
    frames: mpsc::Sender<String>,
) {
    let mut translator = StreamTranslator::new(params.reasoning_requested);
    let mut totals = Accumulated::default();
    let mut first_chunk_sent = false;
    let mut consecutive_heartbeats = 0u32;

    loop {
        match bridge::next_or_heartbeat(&mut events, params.keep_alive).await {
            Drained::Heartbeat => {
                consecutive_heartbeats += 1;
                if frames.send(KEEP_ALIVE_FRAME.to_string()).await.is_err() {
                    return;
                }
                if consecutive_heartbeats >= MAX_CONSECUTIVE_HEARTBEATS {
                    tracing::warn!(
                        completion_id = %params.completion_id,
                        "terminating stalled stream"
                    );
                    break;
                }
            }
            Drained::Item(StreamItem::Event(event)) => {
                consecutive_heartbeats = 0;
                match translator.next(&event) {
                    Classified::Skip | Classified::FragmentTypeChange(_) => {}
                    Classified::Finish => break,
                    Classified::Content(units) => {
                        for unit in units {
                            if !emit_unit(&unit, &params, &mut totals, &mut first_chunk_sent, &frames)
                                .await
                            {
                                return;
                            }
                        }
                    }
                }
            }
            Drained::Item(StreamItem::DecodeError) => {
                let placeholder = ContentUnit {
                    text: DECODE_PLACEHOLDER.to_string(),
                    kind: translator.kind(),
                };
                let _ =
                    emit_unit(&placeholder, &params, &mut totals, &mut first_chunk_sent, &frames)
                        .await;
                break;
            }
            Drained::Item(StreamItem::Done) => break,
        }
    }

    let finish = json!({
        "id": params.completion_id.as_str(),
        "object": "chat.completion.chunk",
        "created": params.created,
        "model": params.model.as_str(),
        "choices": [{"delta": {}, "index": 0, "finish_reason": "stop"}],
        "usage": totals.usage(&params.prompt),
    });
    if frames.send(frame(&finish)).await.is_ok() {
        let _ = frames.send(DONE_FRAME.to_string()).await;
    }
}

/// Emit one content unit as a delta chunk. Returns false when the caller
/// has disconnected.
async fn emit_unit(
    unit: &ContentUnit,
    params: &OpenAiEncodeParams,
    totals: &mut Accumulated,
    first_chunk_sent: &mut bool,
    frames: &mpsc::Sender<String>,
) -> bool {
    let text = suppressed_citation(&unit.text, params.search_enabled);

    let mut delta = Map::new();
    if !*first_chunk_sent {
        delta.insert("role".to_string(), json!("assistant"));
        *first_chunk_sent = true;
    }

    match unit.kind {
        FragmentKind::Thinking => {
            if params.reasoning_requested {
                totals.reasoning.push_str(text);
                delta.insert("reasoning_content".to_string(), json!(text));
            }
        }
        FragmentKind::Text => {
            totals.content.push_str(text);
            delta.insert("content".to_string(), json!(text));
        }
    }

    if delta.is_empty() {
        return true;
    }

    let chunk = json!({
        "id": params.completion_id.as_str(),
        "object": "chat.completion.chunk",
        "created": params.created,
        "model": params.model.as_str(),
        "choices": [{"delta": delta, "index": 0}],
    });
    frames.send(frame(&chunk)).await.is_ok()
}

/// Citation placeholders leak the upstream's search plumbing; in search
/// mode they are suppressed to empty rather than surfaced.
fn suppressed_citation(text: &str, search_enabled: bool) -> &str {
    if search_enabled && text.starts_with("[citation:") {
        ""
    } else {
        text
    }
}

/// Drain the full event stream into one `chat.completion` body.
pub async fn collect_buffered(
    mut events: mpsc::Receiver<StreamItem>,
    params: &OpenAiEncodeParams,
) -> Value {
    let mut translator = StreamTranslator::new(params.reasoning_requested);
    let mut totals = Accumulated::default();

    while let Some(item) = events.recv().await {
        match item {
            StreamItem::Event(event) => match translator.next(&event) {
                Classified::Skip | Classified::FragmentTypeChange(_) => {}
                Classified::Finish => break,
                Classified::Content(units) => {
                    for unit in units {
                        let text = suppressed_citation(&unit.text, params.search_enabled);
                        match unit.kind {
                            FragmentKind::Thinking => {
                                if params.reasoning_requested {
                                    totals.reasoning.push_str(text);
                                }
                            }
                            FragmentKind::Text => totals.content.push_str(text),
                        }
                    }
                }
            },
            StreamItem::DecodeError => {
                if translator.kind() == FragmentKind::Thinking && params.reasoning_requested {
                    totals.reasoning.push_str(DECODE_PLACEHOLDER);
                } else {
                    totals.content.push_str(DECODE_PLACEHOLDER);
                }
                break;
            }
            StreamItem::Done => break,
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert("content".to_string(), json!(totals.content));
    if params.reasoning_requested && !totals.reasoning.is_empty() {
        message.insert("reasoning_content".to_string(), json!(totals.reasoning));
    }

    json!({
        "id": params.completion_id.as_str(),
        "object": "chat.completion",
        "created": params.created,
        "model": params.model.as_str(),
        "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
        "usage": totals.usage(&params.prompt),
    })
}

#[cfg(test)]
mod tests {
    use super::{DONE_FRAME, KEEP_ALIVE_FRAME, OpenAiEncodeParams, collect_buffered, stream_sse};
    use crate::bridge::StreamItem;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn params(reasoning: bool, search: bool) -> OpenAiEncodeParams {
        OpenAiEncodeParams {
            model: "deepseek-chat".to_string(),
            completion_id: "sess-1".to_string(),
            created: 1_700_000_000,
            prompt: "prompt text".to_string(),
            reasoning_requested: reasoning,
            search_enabled: search,
            keep_alive: Duration::from_secs(5),
        }
    }

    fn event(raw: Value) -> StreamItem {
        StreamItem::Event(serde_json::from_value(raw).expect("valid event"))
    }

    fn feed(items: Vec<StreamItem>) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).expect("capacity");
        }
        rx
    }

    async fn run_stream(
        items: Vec<StreamItem>,
        params: OpenAiEncodeParams,
    ) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(64);
        stream_sse(feed(items), params, tx).await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn parse_frame(frame: &str) -> Value {
        let data = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .expect("data frame");
        serde_json::from_str(data).expect("frame is JSON")
    }

    #[tokio::test]
    async fn first_delta_carries_role_marker() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/content", "v": "Hello"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ],
            params(false, false),
        )
        .await;

        let first = parse_frame(&frames[0]);
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hello");

        let second = parse_frame(&frames[1]);
        assert_eq!(second["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames.last().unwrap(), DONE_FRAME);
    }

    #[tokio::test]
    async fn reasoning_and_content_never_share_a_delta() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/thinking_content", "v": "let me think"})),
                event(json!({"p": "response/content", "v": "answer"})),
                StreamItem::Done,
            ],
            params(true, false),
        )
        .await;

        for frame in &frames[..frames.len() - 2] {
            let delta = &parse_frame(frame)["choices"][0]["delta"];
            let has_reasoning = delta.get("reasoning_content").is_some();
            let has_content = delta.get("content").is_some();
            assert!(!(has_reasoning && has_content), "delta mixed fields: {delta}");
        }
    }

    #[tokio::test]
    async fn thinking_is_dropped_when_reasoning_not_requested() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/thinking_content", "v": "hidden"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ],
            params(false, false),
        )
        .await;

        // The role marker still goes out, but no reasoning text follows.
        let first = parse_frame(&frames[0]);
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert!(first["choices"][0]["delta"].get("reasoning_content").is_none());

        let finish = parse_frame(&frames[1]);
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(finish["usage"]["completion_tokens"], 0);
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn citations_are_blanked_in_search_mode() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/content", "v": "[citation:3]"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ],
            params(false, true),
        )
        .await;

        let first = parse_frame(&frames[0]);
        assert_eq!(first["choices"][0]["delta"]["content"], "");
    }

    #[tokio::test]
    async fn usage_counts_reasoning_separately() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/thinking_content", "v": "abcdefgh"})),
                event(json!({"p": "response/content", "v": "abcd"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ],
            params(true, false),
        )
        .await;

        let finish = parse_frame(&frames[frames.len() - 2]);
        let usage = &finish["usage"];
        assert_eq!(usage["completion_tokens"], 3);
        assert_eq!(usage["completion_tokens_details"]["reasoning_tokens"], 2);
    }

    #[tokio::test]
    async fn decode_error_emits_placeholder_then_terminates() {
        let frames = run_stream(
            vec![
                event(json!({"p": "response/content", "v": "partial"})),
                StreamItem::DecodeError,
            ],
            params(false, false),
        )
        .await;

        let placeholder = parse_frame(&frames[1]);
        assert_eq!(
            placeholder["choices"][0]["delta"]["content"],
            crate::DECODE_PLACEHOLDER
        );
        assert_eq!(frames.last().unwrap(), DONE_FRAME);
    }

    #[tokio::test]
    async fn quiet_stream_emits_heartbeats() {
        let (tx, rx) = mpsc::channel(4);
        let (frames_tx, mut frames_rx) = mpsc::channel(16);

        let mut quick = params(false, false);
        quick.keep_alive = Duration::from_millis(10);
        let encoder = tokio::spawn(stream_sse(rx, quick, frames_tx));

        let first = frames_rx.recv().await.expect("a frame");
        assert_eq!(first, KEEP_ALIVE_FRAME);

        tx.send(StreamItem::Done).await.unwrap();
        encoder.await.unwrap();
    }

    #[tokio::test]
    async fn buffered_assembles_content_and_reasoning() {
        let body = collect_buffered(
            feed(vec![
                event(json!({"p": "response/thinking_content", "v": "think"})),
                event(json!({"p": "response/content", "v": "Hello"})),
                event(json!({"p": "response/content", "v": " world"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ]),
            &params(true, false),
        )
        .await;

        let message = &body["choices"][0]["message"];
        assert_eq!(message["content"], "Hello world");
        assert_eq!(message["reasoning_content"], "think");
        assert_eq!(body["object"], "chat.completion");
    }

    #[tokio::test]
    async fn buffered_finalizes_without_explicit_finish() {
        let body = collect_buffered(
            feed(vec![event(json!({"p": "response/content", "v": "partial"}))]),
            &params(false, false),
        )
        .await;
        assert_eq!(body["choices"][0]["message"]["content"], "partial");
    }

    #[tokio::test]
    async fn streaming_and_buffered_agree_on_assembled_output() {
        let sequence = || {
            vec![
                event(json!({"p": "response", "o": "BATCH", "v": [
                    {"p": "fragments", "o": "APPEND", "v": [{"type": "THINK"}]}
                ]})),
                event(json!({"v": "reasoning "})),
                event(json!({"v": "steps"})),
                event(json!({"p": "response", "o": "BATCH", "v": [
                    {"p": "fragments", "o": "APPEND", "v": [{"type": "RESPONSE"}]}
                ]})),
                event(json!({"p": "response/fragments/-1/content", "v": "final "})),
                event(json!({"p": "response/fragments/-1/content", "v": "answer"})),
                event(json!({"p": "response/status", "v": "FINISHED"})),
            ]
        };
        let p = params(true, false);

        let frames = run_stream(sequence(), p.clone()).await;
        let mut streamed_reasoning = String::new();
        let mut streamed_content = String::new();
        for frame in &frames {
            if frame == DONE_FRAME {
                continue;
            }
            let delta = &parse_frame(frame)["choices"][0]["delta"];
            if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
                streamed_reasoning.push_str(text);
            }
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                streamed_content.push_str(text);
            }
        }

        let body = collect_buffered(feed(sequence()), &p).await;
        let message = &body["choices"][0]["message"];
        assert_eq!(message["content"], streamed_content.as_str());
        assert_eq!(message["reasoning_content"], streamed_reasoning.as_str());
        assert_eq!(streamed_content, "final answer");
        assert_eq!(streamed_reasoning, "reasoning steps");
    }
}
