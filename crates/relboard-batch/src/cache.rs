//! Response cache shared by every strategy
//!
//! Keyed by the exact multi-search lines of a request (stored as their
//! blake3 digest). Entries expire after a fixed TTL and the least recently
//! used ones are evicted past capacity.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedSlot {
    slot: Value,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct CountCache {
    entries: Mutex<LruCache<blake3::Hash, CachedSlot>>,
    ttl: Duration,
}

impl CountCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn key(query_text: &str) -> blake3::Hash {
        blake3::hash(query_text.as_bytes())
    }

    /// Cached response slot for `query_text`, if still fresh.
    pub fn get(&self, query_text: &str) -> Option<Value> {
        let key = Self::key(query_text);
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(&key)
            .map(|cached| (cached.expires_at > Instant::now(), cached.slot.clone()));
        match fresh {
            Some((true, slot)) => Some(slot),
            Some((false, _)) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query_text: &str, slot: Value) {
        if self.ttl.is_zero() {
            return;
        }
        let cached = CachedSlot {
            slot,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().put(Self::key(query_text), cached);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
