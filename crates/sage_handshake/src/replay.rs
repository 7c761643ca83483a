//! Replay protection for handshake nonces.
//!
//! A `(context_id, nonce)` pair is accepted at most once within the TTL.
//! The TTL must be at least twice the clock-skew window, otherwise an
//! attacker could replay a message that is still inside the skew window
//! after its entry expired.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct CacheInner {
    entries: HashMap<String, Instant>,
    next_sweep: Instant,
}

/// TTL-bounded set of accepted `(context_id, nonce)` pairs. Safe to share
/// across concurrent responder tasks; check-and-mark is atomic under the
/// lock.
pub struct NonceCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
        }
    }

    /// Returns `true` iff the pair was not seen before, marking it with
    /// expiry `now + ttl`. Expired entries count as unseen.
    pub fn check_and_mark(&self, ctx_id: &str, nonce: &str) -> bool {
        let key = format!("{ctx_id}|{nonce}");
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if now >= inner.next_sweep {
            inner.entries.retain(|_, expiry| *expiry > now);
            inner.next_sweep = now + self.ttl / 2;
        }

        match inner.entries.get(&key) {
            Some(expiry) if *expiry > now => false,
            _ => {
                inner.entries.insert(key, now + self.ttl);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
