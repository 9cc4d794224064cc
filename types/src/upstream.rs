//! Upstream stream grammar and PoW challenge shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One incremental delta event from the upstream completion stream.
///
/// `p` is a path addressing a node of the response under construction
/// (`response/content`, `response/fragments/-1/content`, ...), `o` an
/// operation tag (`APPEND`, `BATCH`, `SET`), and `v` the payload: a scalar
/// or a nested list of sub-events / fragment objects. Events without a `v`
/// carry no information for translation and are dropped at parse level.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaEvent {
    #[serde(default)]
    pub p: Option<String>,
    #[serde(default)]
    pub o: Option<String>,
    #[serde(default)]
    pub v: Option<Value>,
}

impl DeltaEvent {
    /// Path, with absence normalized to the empty string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.p.as_deref().unwrap_or("")
    }
}

/// A proof-of-work challenge issued by the upstream.
///
/// Consumed exactly once by the solver; the answer is sent back alongside
/// the untouched challenge fields, so unknown-to-us fields like `signature`
/// are carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,
    #[serde(default)]
    pub expire_at: i64,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub target_path: String,
}

const fn default_difficulty() -> u64 {
    144_000
}

#[cfg(test)]
mod tests {
    use super::{Challenge, DeltaEvent};

    #[test]
    fn delta_event_tolerates_missing_fields() {
        let event: DeltaEvent = serde_json::from_str(r#"{"v": "hello"}"#).unwrap();
        assert_eq!(event.path(), "");
        assert_eq!(event.v.as_ref().unwrap(), "hello");
    }

    #[test]
    fn challenge_defaults_difficulty() {
        let challenge: Challenge = serde_json::from_str(
            r#"{"algorithm": "DeepSeekHashV1", "challenge": "c", "salt": "s",
                "expire_at": 1700000000, "signature": "sig",
                "target_path": "/api/v0/chat/completion"}"#,
        )
        .unwrap();
        assert_eq!(challenge.difficulty, 144_000);
    }
}
