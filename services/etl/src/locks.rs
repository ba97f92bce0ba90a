//! Striped per-key locks for get-or-create sections.
//!
//! A key maps to one of a fixed number of stripes by hash, so memory stays
//! bounded however many distinct keys a run creates. Two keys sharing a stripe
//! serialize against each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

pub const DEFAULT_STRIPES: usize = 64;

pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

/// Guards held for a set of keys; released on drop.
pub struct KeyGuards<'a> {
    guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyGuards<'_> {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock every stripe covering `keys`.
    ///
    /// Stripes are taken in ascending index order, each at most once, so two
    /// callers with overlapping key sets cannot deadlock.
    pub async fn lock_many<'k, K, I>(&self, keys: I) -> KeyGuards<'_>
    where
        K: Hash + ?Sized + 'k,
        I: IntoIterator<Item = &'k K>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(|k| self.stripe_of(k)).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push(self.stripes[index].lock().await);
        }
        KeyGuards { guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_many_takes_each_stripe_once() {
        let locks = KeyLocks::new(1);
        let keys = ["a", "b", "c"];
        let guards = locks.lock_many(keys.iter()).await;
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock_many(["Sex"].iter()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_sets_do_not_deadlock() {
        let locks = Arc::new(KeyLocks::new(16));
        let forward: Vec<String> = (0..32).map(|i| format!("k{}", i)).collect();
        let backward: Vec<String> = forward.iter().rev().cloned().collect();

        let a = {
            let locks = locks.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let _g = locks.lock_many(forward.iter()).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let b = {
            let locks = locks.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let _g = locks.lock_many(backward.iter()).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .unwrap();
    }
}
