//! Bounded least-recently-used caches for reference-entity resolution.
//!
//! Eviction only ever costs an extra store round-trip on the next
//! resolution of the evicted key; it can never produce a duplicate
//! record, so capacity is purely a memory/speed trade-off.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Snapshot of a cache's counters, printed with each progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through to the store.
    pub misses: u64,
    /// Current occupancy.
    pub len: usize,
    /// Maximum occupancy.
    pub capacity: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} len={}/{}",
            self.hits, self.misses, self.len, self.capacity
        )
    }
}

struct Slot<V> {
    value: V,
    stamp: u64,
}

/// A bounded map with least-recently-used eviction and hit/miss counters.
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    // Recency index: stamp -> key, oldest stamp first. Stamps are unique
    // because the clock only moves forward.
    recency: BTreeMap<u64, K>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.clock += 1;
        let clock = self.clock;
        if let Some(slot) = self.entries.get_mut(key) {
            self.hits += 1;
            self.recency.remove(&slot.stamp);
            self.recency.insert(clock, key.clone());
            slot.stamp = clock;
            Some(slot.value.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    /// Insert or refresh a key, evicting the least recently used entry
    /// when at capacity.
    pub fn insert(&mut self, key: K, value: V) {
        self.clock += 1;
        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.stamp);
            self.recency.insert(self.clock, key);
            slot.stamp = self.clock;
            slot.value = value;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some((_, evicted)) = self.recency.pop_first() {
                self.entries.remove(&evicted);
            }
        }
        self.recency.insert(self.clock, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                stamp: self.clock,
            },
        );
    }

    /// Current occupancy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
