//! Reference-entity deduplication.
//!
//! Reference entities (countries, states, counties, localities, observers,
//! locations) recur across millions of dump rows. Each is resolved through
//! a bounded cache first, then the store, and only inserted when neither
//! knows it. An insert that loses a natural-key race is recovered by
//! re-querying, so resolution is idempotent from the caller's view.

use std::hash::Hash;

use thiserror::Error;

use perch_core::{
    Country, County, EntityStore, Locality, NewLocation, Observer, StateProvince, StoreError,
};

use crate::cache::{BoundedCache, CacheStats};

/// Cache capacity for entities with a small key space (countries, states,
/// counties).
pub const LOW_CARDINALITY_CAPACITY: usize = 65_536;

/// Cache capacity for entities with a large key space (localities,
/// observers, locations).
pub const HIGH_CARDINALITY_CAPACITY: usize = 262_144;

/// Errors raised while resolving a reference entity.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An insert reported a natural-key conflict, but the conflicting
    /// record was gone on re-query. Only a concurrent deleter can cause
    /// this.
    #[error("conflicting {entity} record vanished between insert and re-query")]
    ConflictVanished {
        /// Entity type being resolved.
        entity: &'static str,
    },
}

/// How a natural key was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Answered from the cache or by a store lookup.
    Found,
    /// Inserted by this call.
    Created,
    /// The insert collided with a concurrent writer and the existing
    /// record was re-queried.
    ConflictRetried,
}

/// Cache-first resolution for every reference entity type.
#[derive(Debug)]
pub struct Deduplicator {
    countries: BoundedCache<String, ()>,
    states: BoundedCache<String, ()>,
    counties: BoundedCache<String, ()>,
    localities: BoundedCache<i64, ()>,
    observers: BoundedCache<i64, ()>,
    locations: BoundedCache<(u64, u64), i64>,
}

/// Per-cache counter snapshot for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    /// Country cache counters.
    pub countries: CacheStats,
    /// State/province cache counters.
    pub states: CacheStats,
    /// County cache counters.
    pub counties: CacheStats,
    /// Locality cache counters.
    pub localities: CacheStats,
    /// Observer cache counters.
    pub observers: CacheStats,
    /// Location cache counters.
    pub locations: CacheStats,
}

impl std::fmt::Display for DedupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "country[{}] state[{}] county[{}] locality[{}] observer[{}] location[{}]",
            self.countries,
            self.states,
            self.counties,
            self.localities,
            self.observers,
            self.locations
        )
    }
}

/// Resolve one key: cache, then store lookup, then insert, re-querying on
/// a natural-key conflict. `find` must report whether the key now exists
/// in the store.
fn ensure_present<S, K>(
    cache: &mut BoundedCache<K, ()>,
    store: &mut S,
    key: K,
    entity: &'static str,
    find: impl Fn(&mut S) -> Result<bool, StoreError>,
    insert: impl FnOnce(&mut S) -> Result<(), StoreError>,
) -> Result<Resolution, DedupError>
where
    K: Eq + Hash + Clone,
{
    if cache.get(&key).is_some() {
        return Ok(Resolution::Found);
    }
    if find(store)? {
        cache.insert(key, ());
        return Ok(Resolution::Found);
    }
    let resolution = match insert(store) {
        Ok(()) => Resolution::Created,
        Err(StoreError::UniqueViolation) => {
            if !find(store)? {
                return Err(DedupError::ConflictVanished { entity });
            }
            Resolution::ConflictRetried
        }
        Err(other) => return Err(other.into()),
    };
    cache.insert(key, ());
    Ok(resolution)
}

impl Deduplicator {
    /// Create a deduplicator with the standard cache capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacities(LOW_CARDINALITY_CAPACITY, HIGH_CARDINALITY_CAPACITY)
    }

    /// Create a deduplicator with explicit capacities for the
    /// low-cardinality and high-cardinality caches.
    #[must_use]
    pub fn with_capacities(low: usize, high: usize) -> Self {
        Self {
            countries: BoundedCache::new(low),
            states: BoundedCache::new(low),
            counties: BoundedCache::new(low),
            localities: BoundedCache::new(high),
            observers: BoundedCache::new(high),
            locations: BoundedCache::new(high),
        }
    }

    /// Ensure the country is stored.
    pub fn ensure_country<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &Country,
    ) -> Result<Resolution, DedupError> {
        ensure_present(
            &mut self.countries,
            store,
            record.code.clone(),
            "country",
            |s| Ok(s.find_country(&record.code)?.is_some()),
            |s| s.insert_country(record),
        )
    }

    /// Ensure the state or province is stored.
    pub fn ensure_state_province<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &StateProvince,
    ) -> Result<Resolution, DedupError> {
        ensure_present(
            &mut self.states,
            store,
            record.code.clone(),
            "state/province",
            |s| Ok(s.find_state_province(&record.code)?.is_some()),
            |s| s.insert_state_province(record),
        )
    }

    /// Ensure the county is stored.
    pub fn ensure_county<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &County,
    ) -> Result<Resolution, DedupError> {
        ensure_present(
            &mut self.counties,
            store,
            record.code.clone(),
            "county",
            |s| Ok(s.find_county(&record.code)?.is_some()),
            |s| s.insert_county(record),
        )
    }

    /// Ensure the locality is stored.
    pub fn ensure_locality<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &Locality,
    ) -> Result<Resolution, DedupError> {
        ensure_present(
            &mut self.localities,
            store,
            record.id,
            "locality",
            |s| Ok(s.find_locality(record.id)?.is_some()),
            |s| s.insert_locality(record),
        )
    }

    /// Ensure the observer is stored.
    pub fn ensure_observer<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &Observer,
    ) -> Result<Resolution, DedupError> {
        ensure_present(
            &mut self.observers,
            store,
            record.id,
            "observer",
            |s| Ok(s.find_observer(record.id)?.is_some()),
            |s| s.insert_observer(record),
        )
    }

    /// Resolve the location at the record's coordinates to its synthetic
    /// id, inserting it when absent. Coordinates are keyed bitwise; the
    /// dump prints them consistently, so textual equality implies bitwise
    /// equality.
    pub fn resolve_location<S: EntityStore>(
        &mut self,
        store: &mut S,
        record: &NewLocation,
    ) -> Result<i64, DedupError> {
        let key = (record.point.x.to_bits(), record.point.y.to_bits());
        if let Some(id) = self.locations.get(&key) {
            return Ok(id);
        }
        let id = match store.find_location_id(record.point.x, record.point.y)? {
            Some(id) => id,
            None => match store.insert_location(record) {
                Ok(id) => id,
                Err(StoreError::UniqueViolation) => store
                    .find_location_id(record.point.x, record.point.y)?
                    .ok_or(DedupError::ConflictVanished { entity: "location" })?,
                Err(other) => return Err(other.into()),
            },
        };
        self.locations.insert(key, id);
        Ok(id)
    }

    /// Counter snapshot across all caches.
    #[must_use]
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            countries: self.countries.stats(),
            states: self.states.stats(),
            counties: self.counties.stats(),
            localities: self.localities.stats(),
            observers: self.observers.stats(),
            locations: self.locations.stats(),
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
