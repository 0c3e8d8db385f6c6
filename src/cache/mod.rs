//! TTL + LRU cache substrate (component F): two global caches sit in front
//! of the hot recall and rule-check paths, trading a few seconds of
//! staleness for avoiding a full TF-IDF/vector rescan on repeated queries
//! within a session.

use once_cell::sync::Lazy;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL_SECONDS: u64 = 5;
/// Default maximum number of entries before eviction kicks in.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Current number of live (possibly expired but not yet swept) entries.
    pub size: usize,
    /// Configured maximum size.
    pub maxsize: usize,
    /// Configured TTL in seconds.
    pub ttl_seconds: u64,
    /// Cumulative cache hits.
    pub hits: u64,
    /// Cumulative cache misses.
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, `0.0` if there have been none.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    inserted_at: Instant,
    value: Json,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    insertion_order: Vec<String>,
    hits: u64,
    misses: u64,
}

/// A thread-safe, TTL-expiring, size-bounded cache keyed by an opaque
/// string built with [`make_cache_key`].
///
/// Entries older than `ttl` are treated as absent by `get` but are only
/// swept from the backing map when `set` needs the space; insertion order
/// (not last-access order) drives eviction once a set is forced to reclaim
/// space beyond expiry, matching the straightforward insertion-order
/// oldest-first policy used by the engine this was adapted from. All state
/// lives behind one lock, so `set`/`get`/`stats` never observe the entry
/// map and the insertion-order list out of sync with each other.
pub struct TtlCache {
    ttl: Duration,
    maxsize: usize,
    inner: Mutex<Inner>,
}

impl TtlCache {
    /// Builds a cache with the given TTL (seconds) and max entry count.
    #[must_use]
    pub fn new(ttl_seconds: u64, maxsize: usize) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            maxsize: maxsize.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Looks up `key`. Returns `None` on a miss or an expired entry
    /// (expired entries are lazily removed here).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Json> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.insertion_order.retain(|k| k != key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces `key`. Expired entries are swept first; if the
    /// cache is still at capacity the oldest surviving entry is evicted.
    pub fn set(&self, key: String, value: Json) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.entries.len() >= self.maxsize {
            self.evict_expired(&mut inner);
        }
        if inner.entries.len() >= self.maxsize {
            self.evict_oldest(&mut inner);
        }
        if !inner.entries.contains_key(&key) {
            inner.insertion_order.push(key.clone());
        }
        inner.entries.insert(key, Entry { inserted_at: Instant::now(), value });
    }

    /// Removes `key` if present. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.insertion_order.retain(|k| k != key);
        }
        removed
    }

    /// Drops every entry, returning the number cleared.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = inner.entries.len();
        inner.entries.clear();
        inner.insertion_order.clear();
        count
    }

    /// Current size and hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        CacheStats {
            size: inner.entries.len(),
            maxsize: self.maxsize,
            ttl_seconds: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    fn evict_expired(&self, inner: &mut Inner) {
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.entries.remove(&key);
            inner.insertion_order.retain(|k| k != &key);
        }
    }

    fn evict_oldest(&self, inner: &mut Inner) {
        if let Some(oldest) = (!inner.insertion_order.is_empty()).then(|| inner.insertion_order.remove(0)) {
            inner.entries.remove(&oldest);
        }
    }
}

/// Builds a stable, hashable cache key from named arguments by
/// JSON-serializing a `(name, value)` list sorted by name.
#[must_use]
pub fn make_cache_key(parts: &[(&str, Json)]) -> String {
    let mut sorted: Vec<&(&str, Json)> = parts.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);
    let map: serde_json::Map<String, Json> =
        sorted.into_iter().map(|(name, value)| ((*name).to_string(), value.clone())).collect();
    Json::Object(map).to_string()
}

/// The global recall-result cache.
pub static RECALL_CACHE: Lazy<TtlCache> = Lazy::new(|| TtlCache::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_SIZE));
/// The global rule-check-result cache.
pub static RULES_CACHE: Lazy<TtlCache> = Lazy::new(|| TtlCache::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_SIZE));

/// Clears both global caches, returning how many entries each held.
#[must_use]
pub fn clear_all_caches() -> (usize, usize) {
    (RECALL_CACHE.clear(), RULES_CACHE.clear())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let cache = TtlCache::new(60, 10);
        cache.set("k".to_string(), json!({"a": 1}));
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn expired_entries_are_treated_as_absent() {
        let cache = TtlCache::new(0, 10);
        cache.set("k".to_string(), json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn eviction_drops_oldest_when_over_capacity() {
        let cache = TtlCache::new(60, 2);
        cache.set("a".to_string(), json!(1));
        cache.set("b".to_string(), json!(2));
        cache.set("c".to_string(), json!(3));
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some() || cache.get("c").is_some());
    }

    #[test]
    fn make_cache_key_is_order_independent() {
        let k1 = make_cache_key(&[("topic", json!("auth")), ("limit", json!(5))]);
        let k2 = make_cache_key(&[("limit", json!(5)), ("topic", json!("auth"))]);
        assert_eq!(k1, k2);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = TtlCache::new(60, 10);
        cache.set("k".to_string(), json!(1));
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        cache.set("k2".to_string(), json!(2));
        assert_eq!(cache.clear(), 1);
    }
}
