//! Unsigned token expiry inspection.
//!
//! Tokens issued by the upstream look like JWTs. We never verify them --
//! they come from the same backend that will reject them if invalid -- we
//! only peek at the `exp` claim to schedule refreshes ahead of expiry.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde_json::Value;

/// Refresh when less than this many seconds of validity remain.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Decode the `exp` claim of a JWT-shaped token without verifying it.
///
/// Returns `None` for tokens that are not three-part, whose payload does
/// not decode, or that carry no integer `exp`.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    parts.next()?;

    let bytes = decode_segment(payload)?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    match claims.get("exp")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(segment) {
        return Some(bytes);
    }
    // Some issuers pad; the standard alphabet with restored padding is the
    // other shape seen in the wild.
    let padding = "=".repeat((4 - segment.len() % 4) % 4);
    STANDARD.decode(format!("{segment}{padding}")).ok()
}

/// Whether a token must be refreshed before use, judged at `now` (unix
/// seconds).
///
/// A missing token always needs a refresh. A token with a decodable expiry
/// is stale inside the refresh margin. A token with no decodable expiry is
/// treated as fresh and never auto-refreshed: the upstream itself rejects
/// dead tokens, and rotation covers that path.
#[must_use]
pub fn needs_refresh(token: Option<&str>, now: i64) -> bool {
    let Some(token) = token else {
        return true;
    };

    match decode_expiry(token) {
        Some(expiry) => expiry - now < REFRESH_MARGIN_SECS,
        None => false,
    }
}
