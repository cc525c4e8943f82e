//! Generic cache collaborator contract: `get`, `set` with a TTL,
//! `clear_prefix`. Backs the recall cache and the association cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Collaborator contract for a cache.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;
    async fn set(&self, key: &str, value: serde_json::Value, ttl_seconds: u64);
    /// Invalidate every key starting with `prefix`. Best-effort.
    async fn clear_prefix(&self, prefix: &str);
}

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// An in-process cache good enough for single-node deployments and tests.
/// Not bounded in size; callers that need eviction should wrap a `lru`
/// cache instead. Recall/association caches in this engine are keyed by
/// workspace-scoped fingerprints and invalidated on write, so unbounded
/// growth is bounded in practice by workspace churn.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        InMemoryCache::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl_seconds: u64) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds.max(1)),
            },
        );
    }

    async fn clear_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let c = InMemoryCache::new();
        c.set("ws:1:recall:abc", serde_json::json!({"hit": true}), 60).await;
        assert_eq!(c.get("ws:1:recall:abc").await, Some(serde_json::json!({"hit": true})));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let c = InMemoryCache::new();
        assert_eq!(c.get("nope").await, None);
    }

    #[tokio::test]
    async fn clear_prefix_invalidates_only_matching_keys() {
        let c = InMemoryCache::new();
        c.set("ws:1:recall:a", serde_json::json!(1), 60).await;
        c.set("ws:1:assoc:b", serde_json::json!(2), 60).await;
        c.set("ws:2:recall:c", serde_json::json!(3), 60).await;
        c.clear_prefix("ws:1:").await;
        assert_eq!(c.get("ws:1:recall:a").await, None);
        assert_eq!(c.get("ws:1:assoc:b").await, None);
        assert_eq!(c.get("ws:2:recall:c").await, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let c = InMemoryCache::new();
        c.entries.lock().insert(
            "k".to_string(),
            Entry {
                value: serde_json::json!(1),
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
        assert_eq!(c.get("k").await, None);
    }
}
