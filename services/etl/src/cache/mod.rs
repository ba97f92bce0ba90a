//! Cache layer: one bounded LRU per entity kind, shared across a run.

pub mod entities;
pub mod lru;

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::Mutex;

pub use entities::{EntityCaches, NamedStats};
pub use lru::{CacheStats, LruCache};

/// An [`LruCache`] behind an async mutex.
///
/// Every operation takes the lock once, so batch lookups see a consistent
/// snapshot of the cache.
pub struct SharedCache<K, V> {
    name: &'static str,
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SharedCache<K, V> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().await.get(key)
    }

    /// Split `keys` into hits and misses under a single lock.
    pub async fn get_many<'a, I>(&self, keys: I) -> (HashMap<K, V>, Vec<K>)
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut cache = self.inner.lock().await;
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for key in keys {
            match cache.get(key) {
                Some(value) => {
                    hits.insert(key.clone(), value);
                }
                None => misses.push(key.clone()),
            }
        }
        (hits, misses)
    }

    pub async fn set(&self, key: K, value: V) {
        self.inner.lock().await.set(key, value);
    }

    pub async fn set_many(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let mut cache = self.inner.lock().await;
        for (key, value) in entries {
            cache.set(key, value);
        }
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    /// Snapshot of all entries, least recently used first.
    pub async fn entries(&self) -> Vec<(K, V)> {
        self.inner.lock().await.entries()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_many_splits_hits_and_misses() {
        let cache = SharedCache::new("countries", 10);
        cache.set("Chile".to_string(), 1).await;
        cache.set("Peru".to_string(), 2).await;

        let keys = vec!["Chile".to_string(), "Korea".to_string()];
        let (hits, misses) = cache.get_many(&keys).await;
        assert_eq!(hits.get("Chile"), Some(&1));
        assert_eq!(misses, vec!["Korea".to_string()]);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_capacity() {
        let cache = Arc::new(SharedCache::new("series", 8));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..16 {
                    cache.set(worker * 100 + i, i).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 8);
        assert_eq!(cache.stats().await.evictions, 56);
    }

    #[tokio::test]
    async fn test_clear_empties_and_resets() {
        let cache = SharedCache::new("periods", 2);
        cache.set_many(vec![(1, 10), (2, 20)]).await;
        cache.get(&1).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await.hits, 0);
        assert_eq!(cache.name(), "periods");
    }
}
