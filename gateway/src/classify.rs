//! Classification of upstream delta events.
//!
//! The upstream describes its response incrementally through path-addressed
//! events; the paths mix real content with bookkeeping (token counters,
//! elapsed-time ticks, per-fragment status flips). This module is the only
//! place those paths are interpreted. [`classify`] is a pure function from
//! one event (plus the carried fragment-kind state) to a tagged outcome;
//! [`StreamTranslator`] wraps it with the state carrying.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use dragoman_types::DeltaEvent;

/// Terminal sentinel the upstream uses for the completed response.
pub const FINISHED_SENTINEL: &str = "FINISHED";

/// The two kinds of output fragment the upstream produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Thinking,
    Text,
}

impl FragmentKind {
    /// Initial carried state for a response stream.
    #[must_use]
    pub const fn initial(reasoning_requested: bool) -> Self {
        if reasoning_requested {
            Self::Thinking
        } else {
            Self::Text
        }
    }

    /// Map a fragment's declared kind tag. The upstream writes `THINK`
    /// (occasionally `THINKING`) and `RESPONSE`.
    fn from_declared(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "THINK" | "THINKING" => Some(Self::Thinking),
            "RESPONSE" => Some(Self::Text),
            _ => None,
        }
    }
}

/// One unit of caller-visible content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUnit {
    pub text: String,
    pub kind: FragmentKind,
}

/// Outcome of classifying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Bookkeeping; no output, no state change.
    Skip,
    /// The response is complete.
    Finish,
    /// The active fragment kind changed; no output.
    FragmentTypeChange(FragmentKind),
    /// Content units, in upstream order.
    Content(Vec<ContentUnit>),
}

/// Path substrings that mark status/bookkeeping events.
const SKIP_MARKERS: &[&str] = &[
    "quasi_status",
    "elapsed_secs",
    "token_usage",
    "pending_fragment",
    "conversation_mode",
];

/// Per-fragment status markers address fragments from the tail:
/// `response/fragments/-1/status` and so on.
static FRAGMENT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fragments/-\d+/status").expect("valid pattern"));

fn is_skippable_path(path: &str) -> bool {
    path == "response/search_status"
        || SKIP_MARKERS.iter().any(|marker| path.contains(marker))
        || FRAGMENT_STATUS.is_match(path)
}

/// Classify one event against the carried fragment kind.
///
/// Pure: the new fragment kind is communicated through the
/// [`Classified::FragmentTypeChange`] variant, never by mutation.
#[must_use]
pub fn classify(event: &DeltaEvent, current: FragmentKind, reasoning_requested: bool) -> Classified {
    let Some(value) = event.v.as_ref() else {
        return Classified::Skip;
    };
    let path = event.path();

    if is_skippable_path(path) {
        return Classified::Skip;
    }

    if path == "response/status" && value.as_str() == Some(FINISHED_SENTINEL) {
        return Classified::Finish;
    }

    let base_kind = kind_for_path(path, current, reasoning_requested);

    match value {
        Value::String(text) => {
            if text == FINISHED_SENTINEL && (path.is_empty() || path == "status") {
                return Classified::Finish;
            }
            if text.is_empty() {
                return Classified::Skip;
            }
            Classified::Content(vec![ContentUnit {
                text: text.clone(),
                kind: base_kind,
            }])
        }
        Value::Array(items) => {
            // A terminal status item anywhere at this level overrides
            // everything else the event carries.
            if items.iter().any(|item| is_finish_item(item)) {
                return Classified::Finish;
            }
            if let Some(kind) = declared_fragment_kind(path, items) {
                return Classified::FragmentTypeChange(kind);
            }
            match extract_units(items, base_kind) {
                None => Classified::Finish,
                Some(units) if units.is_empty() => Classified::Skip,
                Some(units) => Classified::Content(units),
            }
        }
        _ => Classified::Skip,
    }
}

/// Content kind selected by the event path alone.
fn kind_for_path(path: &str, current: FragmentKind, reasoning_requested: bool) -> FragmentKind {
    if path == "response/thinking_content" {
        FragmentKind::Thinking
    } else if path == "response/content" {
        FragmentKind::Text
    } else if path.contains("response/fragments") && path.contains("/content") {
        current
    } else if path.is_empty() {
        if reasoning_requested {
            current
        } else {
            FragmentKind::Text
        }
    } else {
        FragmentKind::Text
    }
}

fn is_finish_item(item: &Value) -> bool {
    item.get("p").and_then(Value::as_str) == Some("status")
        && item.get("v").and_then(Value::as_str) == Some(FINISHED_SENTINEL)
}

/// Fragment kind declared by a batch/append event, if any.
///
/// Two shapes occur: a `response` batch wrapping a `fragments` append, and
/// a direct `response/fragments` append. The last declared kind wins.
fn declared_fragment_kind(path: &str, items: &[Value]) -> Option<FragmentKind> {
    let mut declared = None;

    if path == "response" {
        for item in items {
            if item.get("p").and_then(Value::as_str) == Some("fragments")
                && item.get("o").and_then(Value::as_str) == Some("APPEND")
                && let Some(fragments) = item.get("v").and_then(Value::as_array)
            {
                for fragment in fragments {
                    if let Some(kind) = fragment
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(FragmentKind::from_declared)
                    {
                        declared = Some(kind);
                    }
                }
            }
        }
    } else if path.contains("response/fragments") {
        for fragment in items {
            if let Some(kind) = fragment
                .get("type")
                .and_then(Value::as_str)
                .and_then(FragmentKind::from_declared)
            {
                declared = Some(kind);
            }
        }
    }

    declared
}

/// Recursive content extraction from a nested event list.
///
/// `None` signals that a terminal status item was encountered: the whole
/// event finishes the stream, overriding anything gathered before it.
fn extract_units(items: &[Value], default_kind: FragmentKind) -> Option<Vec<ContentUnit>> {
    let mut units = Vec::new();

    for item in items {
        let Value::Object(fields) = item else {
            continue;
        };

        // Search results ride the stream as url/title/snippet objects.
        if fields.contains_key("url") && fields.contains_key("title") {
            continue;
        }

        let item_path = fields.get("p").and_then(Value::as_str).unwrap_or("");
        if is_finish_item(item) {
            return None;
        }
        if is_skippable_path(item_path) {
            continue;
        }

        // An explicit content + kind pair stands on its own.
        if let Some(unit) = explicit_content_unit(fields, default_kind) {
            units.push(unit);
            continue;
        }

        let item_kind = if item_path.contains("thinking") {
            FragmentKind::Thinking
        } else if item_path.contains("content") || item_path == "response" || item_path == "fragments"
        {
            FragmentKind::Text
        } else {
            default_kind
        };

        match fields.get("v") {
            Some(Value::String(text)) => {
                if !text.is_empty() && text != FINISHED_SENTINEL {
                    units.push(ContentUnit {
                        text: text.clone(),
                        kind: item_kind,
                    });
                }
            }
            // Inner lists are unwrapped one level with the same kind rules.
            Some(Value::Array(inner)) => {
                for inner_item in inner {
                    match inner_item {
                        Value::Object(inner_fields) => {
                            let kind = inner_fields
                                .get("type")
                                .and_then(Value::as_str)
                                .and_then(FragmentKind::from_declared)
                                .unwrap_or(item_kind);
                            if let Some(text) =
                                inner_fields.get("content").and_then(Value::as_str)
                                && !text.is_empty()
                            {
                                units.push(ContentUnit {
                                    text: text.to_string(),
                                    kind,
                                });
                            }
                        }
                        Value::String(text) if !text.is_empty() => {
                            units.push(ContentUnit {
                                text: text.clone(),
                                kind: item_kind,
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Some(units)
}

fn explicit_content_unit(
    fields: &Map<String, Value>,
    default_kind: FragmentKind,
) -> Option<ContentUnit> {
    let content = fields.get("content")?.as_str()?;
    let tag = fields.get("type")?.as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(ContentUnit {
        text: content.to_string(),
        kind: FragmentKind::from_declared(tag).unwrap_or(default_kind),
    })
}

/// Carries the fragment-kind state across one response stream.
#[derive(Debug)]
pub struct StreamTranslator {
    kind: FragmentKind,
    reasoning_requested: bool,
}

impl StreamTranslator {
    #[must_use]
    pub const fn new(reasoning_requested: bool) -> Self {
        Self {
            kind: FragmentKind::initial(reasoning_requested),
            reasoning_requested,
        }
    }

    /// Classify the next event, applying any fragment-kind change.
    pub fn next(&mut self, event: &DeltaEvent) -> Classified {
        let classified = classify(event, self.kind, self.reasoning_requested);
        if let Classified::FragmentTypeChange(kind) = classified {
            self.kind = kind;
        }
        classified
    }

    /// The currently active fragment kind.
    #[must_use]
    pub const fn kind(&self) -> FragmentKind {
        self.kind
    }
}
