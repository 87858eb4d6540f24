//! # Response Cache
//!
//! Short-TTL memoization of read results, explicitly invalidated by writes.
//! The delivery loop invalidates a write's declared keys after the backend
//! accepts it; a background sweep task owned by
//! [`GridsinkCore`](crate::core::GridsinkCore) deletes expired entries on a
//! fixed period regardless of access patterns.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
}

/// Concurrent TTL cache keyed by logical resource name.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
        }
    }

    /// Return the cached value if present and unexpired. Expired entries are
    /// removed on access.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(entry.data.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Like [`get`](Self::get), but `force_refresh` bypasses and deletes the
    /// entry so the caller re-reads from the backend.
    pub fn get_or_refresh(&self, key: &str, force_refresh: bool) -> Option<Value> {
        if force_refresh {
            self.entries.remove(key);
            return None;
        }
        self.get(key)
    }

    /// Store a value with the current timestamp, replacing any prior entry.
    pub fn set(&self, key: impl Into<String>, data: Value) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    /// Remove the named keys, returning how many were present. An empty key
    /// list clears the entire cache.
    pub fn invalidate(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            let removed = self.entries.len();
            self.entries.clear();
            debug!(removed, "cache cleared");
            return removed;
        }
        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        debug!(removed, requested = keys.len(), "cache keys invalidated");
        removed
    }

    /// Delete expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "cache sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with_ttl(ttl_ms: u64) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            ttl_ms,
            sweep_interval_ms: 60_000,
        })
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let cache = cache_with_ttl(60_000);
        cache.set("sheet:rows:1", json!({"name": "ada"}));
        assert_eq!(cache.get("sheet:rows:1"), Some(json!({"name": "ada"})));
    }

    #[test]
    fn test_missing_key_returns_none() {
        let cache = cache_with_ttl(60_000);
        assert_eq!(cache.get("absent"), None);
    }

    #[tokio::test]
    async fn test_expired_entry_returns_none_and_is_removed() {
        let cache = cache_with_ttl(20);
        cache.set("short_lived", json!(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("short_lived"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_force_refresh_bypasses_and_deletes() {
        let cache = cache_with_ttl(60_000);
        cache.set("rows", json!([1, 2, 3]));
        assert_eq!(cache.get_or_refresh("rows", true), None);
        assert_eq!(cache.get("rows"), None);
    }

    #[test]
    fn test_invalidate_specific_keys() {
        let cache = cache_with_ttl(60_000);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("c", json!(3));
        let removed = cache.invalidate(&["a".to_string(), "c".to_string(), "nope".to_string()]);
        assert_eq!(removed, 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_invalidate_with_no_keys_clears_everything() {
        let cache = cache_with_ttl(60_000);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        assert_eq!(cache.invalidate(&[]), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_entries() {
        let cache = cache_with_ttl(50);
        cache.set("old", json!(1));
        tokio::time::sleep(Duration::from_millis(70)).await;
        cache.set("fresh", json!(2));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }
}
