//! Bounded response cache with a fixed TTL
//!
//! Lookups take the read lock; inserts and evictions take the write lock.
//! When full, the oldest insertion is evicted first.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::AiResponse;

/// `hex(sha256(tenant ":" query ":" context))`
pub fn cache_key(tenant_id: &str, query: &str, context: &Value) -> String {
    let context = serde_json::to_string(context).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(query.as_bytes());
    hasher.update(b":");
    hasher.update(context.as_bytes());
    hex::encode(hasher.finalize())
}

struct CacheEntry {
    response: AiResponse,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

pub struct ResponseCache {
    capacity: usize,
    ttl: Duration,
    inner: RwLock<CacheInner>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Fresh entry for `key`; expired entries read as misses.
    pub async fn get(&self, key: &str) -> Option<AiResponse> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(key)?;
        (entry.inserted_at.elapsed() < self.ttl).then(|| entry.response.clone())
    }

    pub async fn insert(&self, key: String, response: AiResponse) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.response = response;
            entry.inserted_at = now;
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: now,
            },
        );
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_deterministic_and_scoped() {
        let a = cache_key("t1", "q", &json!({"b": 1, "a": 2}));
        let b = cache_key("t1", "q", &json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key("t2", "q", &json!({"b": 1, "a": 2})));
        assert_ne!(a, cache_key("t1", "q2", &json!({"b": 1, "a": 2})));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), AiResponse::new("p", 1, 0.0)).await;
        cache.insert("b".into(), AiResponse::new("p", 2, 0.0)).await;
        cache.insert("c".into(), AiResponse::new("p", 3, 0.0)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.get("c").await.unwrap().tokens_used, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(10, Duration::from_secs(3600));
        cache.insert("k".into(), AiResponse::new("p", 1, 0.0)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert!(cache.get("k").await.is_none());
    }
}
