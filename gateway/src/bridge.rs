//! Producer/consumer bridge over the upstream byte stream.
//!
//! The upstream body must be read by continuous iteration while the
//! caller-facing side stays responsive enough to emit keep-alive frames
//! during gaps. The bridge is therefore explicit: one spawned producer task
//! owns the HTTP response and feeds parsed events into a bounded channel;
//! the encoder drains the channel with a timeout. Either side dropping its
//! channel end shuts the other down cleanly - a disconnected caller stops
//! the producer at its next send, which drops the upstream connection.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use dragoman_types::DeltaEvent;

/// Bound of the event hand-off channel.
const CHANNEL_CAPACITY: usize = 64;

/// Upper bound on buffered bytes awaiting a newline; a stream that exceeds
/// it is treated as undecodable.
const MAX_LINE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// One hand-off from the producer to an encoder.
#[derive(Debug)]
pub enum StreamItem {
    /// A parsed delta event carrying a value.
    Event(DeltaEvent),
    /// The stream broke mid-flight: invalid UTF-8, malformed JSON, a
    /// transport error, or a runaway line. The encoder substitutes a
    /// placeholder and terminates early.
    DecodeError,
    /// Terminal marker or natural end of stream.
    Done,
}

/// What a heartbeat-aware drain produced.
#[derive(Debug)]
pub enum Drained {
    Item(StreamItem),
    /// No event arrived within the keep-alive window.
    Heartbeat,
}

/// Spawn the producer task for an upstream response and return the
/// consuming end of the bridge.
pub fn spawn_producer(response: reqwest::Response) -> mpsc::Receiver<StreamItem> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        produce(response, tx).await;
    });
    rx
}

async fn produce(response: reqwest::Response, tx: mpsc::Sender<StreamItem>) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(next) = stream.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(%e, "upstream stream read failed");
                let _ = tx.send(StreamItem::DecodeError).await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        if buffer.len() > MAX_LINE_BUFFER_BYTES {
            tracing::warn!("upstream line exceeded buffer limit");
            let _ = tx.send(StreamItem::DecodeError).await;
            return;
        }

        while let Some(line) = drain_line(&mut buffer) {
            match parse_line(&line) {
                ParsedLine::Ignored => {}
                ParsedLine::Event(event) => {
                    if tx.send(StreamItem::Event(event)).await.is_err() {
                        // Consumer is gone; dropping the response closes
                        // the upstream connection.
                        return;
                    }
                }
                ParsedLine::Done => {
                    let _ = tx.send(StreamItem::Done).await;
                    return;
                }
                ParsedLine::Malformed => {
                    let _ = tx.send(StreamItem::DecodeError).await;
                    return;
                }
            }
        }
    }

    // Connection closed without a terminal marker; encoders finalize from
    // whatever arrived.
    let _ = tx.send(StreamItem::Done).await;
}

/// Receive the next item, yielding a heartbeat marker when the keep-alive
/// window elapses first. A closed channel reads as `Done`.
pub async fn next_or_heartbeat(
    rx: &mut mpsc::Receiver<StreamItem>,
    keep_alive: Duration,
) -> Drained {
    match tokio::time::timeout(keep_alive, rx.recv()).await {
        Ok(Some(item)) => Drained::Item(item),
        Ok(None) => Drained::Item(StreamItem::Done),
        Err(_) => Drained::Heartbeat,
    }
}

/// Split one newline-terminated line off the buffer.
fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
    line.pop(); // the newline itself
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

#[derive(Debug)]
enum ParsedLine {
    /// Blank line, comment, or a payload with nothing to translate.
    Ignored,
    Event(DeltaEvent),
    Done,
    Malformed,
}

fn parse_line(line: &[u8]) -> ParsedLine {
    if line.is_empty() {
        return ParsedLine::Ignored;
    }

    let Ok(text) = std::str::from_utf8(line) else {
        tracing::warn!("upstream sent invalid UTF-8");
        return ParsedLine::Malformed;
    };

    let Some(data) = text.strip_prefix("data:") else {
        return ParsedLine::Ignored;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return ParsedLine::Done;
    }

    match serde_json::from_str::<DeltaEvent>(data) {
        // Events without a value carry nothing for translation.
        Ok(event) if event.v.is_some() => ParsedLine::Event(event),
        Ok(_) => ParsedLine::Ignored,
        Err(e) => {
            tracing::warn!(%e, payload_bytes = data.len(), "malformed upstream payload");
            ParsedLine::Malformed
        }
    }
}
