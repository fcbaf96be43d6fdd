//! Thin wrapper over an async LRU+TTL cache, shared by collaborators that
//! want a process-wide cache (the template engine uses one for sources).

use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;

#[derive(Clone)]
pub struct CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
}

impl<K, V> CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    pub async fn set(&self, key: K, value: V) {
        self.cache.insert(key, value).await;
    }

    pub async fn remove(&self, key: &K) {
        self.cache.remove(key).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
    }
}

/// Cache keyed by name holding JSON values, handy for plugin state.
pub type JsonCache<K> = CacheManager<K, serde_json::Value>;

pub fn default_cache<K, V>(max_capacity: u64) -> CacheManager<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    CacheManager::new(max_capacity, Duration::from_secs(300))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_round_trip_until_removed() {
        let cache: CacheManager<String, String> = default_cache(16);
        cache.set("k".to_string(), "v".to_string()).await;
        assert_eq!(cache.get(&"k".to_string()).await.unwrap(), "v");
        cache.remove(&"k".to_string()).await;
        assert!(cache.get(&"k".to_string()).await.is_none());
    }
}
