//! `Cache` trait, reused near-verbatim from `loom::cache::Cache<K, V>`,
//! plus a `dashmap`-backed in-memory implementation with lazy TTL eviction.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StreamError;

#[async_trait]
pub trait Cache<K, V>: Send + Sync
where
    K: std::hash::Hash + Eq + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Option<V>;
    async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), StreamError>;
    async fn delete(&self, key: &K) -> Result<(), StreamError>;
    async fn clear(&self) -> Result<(), StreamError>;
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// Process-wide, single-node cache. A Redis-backed `Cache` impl is the
/// cross-process substitute an operator wires in for real deployment.
pub struct InMemoryCache<K, V> {
    entries: DashMap<K, Entry<V>>,
}

impl<K, V> InMemoryCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> Default for InMemoryCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for InMemoryCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if let Some(expires_at) = entry.expires_at {
            if Instant::now() >= expires_at {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), StreamError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key, Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), StreamError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StreamError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache: InMemoryCache<String, String> = InMemoryCache::new();
        cache.set("k".into(), "v".into(), None).await.unwrap();
        assert_eq!(cache.get(&"k".to_string()).await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_get() {
        let cache: InMemoryCache<String, String> = InMemoryCache::new();
        cache
            .set("k".into(), "v".into(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }

    #[tokio::test]
    async fn delete_and_clear_remove_entries() {
        let cache: InMemoryCache<String, String> = InMemoryCache::new();
        cache.set("a".into(), "1".into(), None).await.unwrap();
        cache.set("b".into(), "2".into(), None).await.unwrap();
        cache.delete(&"a".to_string()).await.unwrap();
        assert_eq!(cache.get(&"a".to_string()).await, None);
        cache.clear().await.unwrap();
        assert_eq!(cache.get(&"b".to_string()).await, None);
    }
}
