//! TTL cache for solved nonces.
//!
//! The upstream reissues identical low-difficulty challenges within short
//! windows; caching the nonce skips re-running the puzzle. One mutex,
//! lazy expiry on read.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default entry lifetime; individual entries may be capped shorter by the
/// challenge's own expiry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct NonceCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl NonceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a nonce, dropping the entry if it has expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: u64, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every expired entry. The request path relies on lazy expiry;
    /// this is for embedders that want a periodic sweep.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.retain(|_, entry| entry.expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
