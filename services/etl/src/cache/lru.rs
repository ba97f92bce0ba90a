use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Counters and occupancy of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hits over lookups, in percent.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / lookups as f64
        }
    }

    /// Size over capacity, in percent.
    pub fn fullness(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f64 * 100.0 / self.capacity as f64
        }
    }
}

struct Slot<V> {
    value: V,
    tick: u64,
}

/// Bounded map evicting the least recently used entry.
///
/// Recency is a monotonically increasing tick; `order` maps ticks back to keys
/// so the oldest entry is always the first one in the tree.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up and promote to most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(slot) => {
                if let Some(k) = self.order.remove(&slot.tick) {
                    self.order.insert(tick, k);
                }
                slot.tick = tick;
                self.hits += 1;
                Some(slot.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up without touching recency or counters.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub fn set(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let tick = self.next_tick();
        if let Some(old) = self.entries.insert(key.clone(), Slot { value, tick }) {
            self.order.remove(&old.tick);
        }
        self.order.insert(tick, key);

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, least recently used first.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.order
            .values()
            .filter_map(|k| self.entries.get(k).map(|slot| (k.clone(), slot.value.clone())))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.entries.len(),
            capacity: self.capacity,
        }
    }
}
