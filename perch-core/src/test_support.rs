//! Test doubles shared across the workspace.

use std::collections::{HashMap, HashSet};

use crate::entity::{
    Checklist, Country, County, Locality, NewLocation, Observation, Observer, Species,
    StateProvince, SubSpecies,
};
use crate::store::{EntityStore, StoreError};

/// In-memory [`EntityStore`] for unit tests.
///
/// Natural-key semantics match the SQLite backend: inserting an existing
/// key fails with [`StoreError::UniqueViolation`]. Transactions are not
/// modelled beyond counting `begin`/`commit` calls, which is enough to
/// assert batch boundaries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Countries by code.
    pub countries: HashMap<String, Country>,
    /// States/provinces by code.
    pub states: HashMap<String, StateProvince>,
    /// Counties by code.
    pub counties: HashMap<String, County>,
    /// Localities by id.
    pub localities: HashMap<i64, Locality>,
    /// Observers by id.
    pub observers: HashMap<i64, Observer>,
    /// Species by scientific name.
    pub species: HashMap<String, Species>,
    /// Subspecies-tier entries by scientific name.
    pub subspecies: HashMap<String, SubSpecies>,
    /// Locations by coordinate bits, mapped to their synthetic id.
    pub locations: HashMap<(u64, u64), i64>,
    /// Checklists by upstream id.
    pub checklists: HashMap<i64, Checklist>,
    /// Observations by upstream id.
    pub observations: HashMap<i64, Observation>,
    /// Number of `begin` calls observed.
    pub begins: usize,
    /// Number of `commit` calls observed.
    pub commits: usize,
    next_location_id: i64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_unique<K: std::hash::Hash + Eq, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
) -> Result<(), StoreError> {
    if map.contains_key(&key) {
        return Err(StoreError::UniqueViolation);
    }
    map.insert(key, value);
    Ok(())
}

impl EntityStore for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }

    fn find_country(&mut self, code: &str) -> Result<Option<Country>, StoreError> {
        Ok(self.countries.get(code).cloned())
    }

    fn insert_country(&mut self, record: &Country) -> Result<(), StoreError> {
        insert_unique(&mut self.countries, record.code.clone(), record.clone())
    }

    fn find_state_province(&mut self, code: &str) -> Result<Option<StateProvince>, StoreError> {
        Ok(self.states.get(code).cloned())
    }

    fn insert_state_province(&mut self, record: &StateProvince) -> Result<(), StoreError> {
        insert_unique(&mut self.states, record.code.clone(), record.clone())
    }

    fn find_county(&mut self, code: &str) -> Result<Option<County>, StoreError> {
        Ok(self.counties.get(code).cloned())
    }

    fn insert_county(&mut self, record: &County) -> Result<(), StoreError> {
        insert_unique(&mut self.counties, record.code.clone(), record.clone())
    }

    fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError> {
        Ok(self.localities.get(&id).cloned())
    }

    fn insert_locality(&mut self, record: &Locality) -> Result<(), StoreError> {
        insert_unique(&mut self.localities, record.id, record.clone())
    }

    fn find_observer(&mut self, id: i64) -> Result<Option<Observer>, StoreError> {
        Ok(self.observers.get(&id).copied())
    }

    fn insert_observer(&mut self, record: &Observer) -> Result<(), StoreError> {
        insert_unique(&mut self.observers, record.id, *record)
    }

    fn find_species(&mut self, scientific_name: &str) -> Result<Option<Species>, StoreError> {
        Ok(self.species.get(scientific_name).cloned())
    }

    fn insert_species(&mut self, record: &Species) -> Result<(), StoreError> {
        insert_unique(
            &mut self.species,
            record.scientific_name.clone(),
            record.clone(),
        )
    }

    fn find_subspecies(
        &mut self,
        scientific_name: &str,
    ) -> Result<Option<SubSpecies>, StoreError> {
        Ok(self.subspecies.get(scientific_name).cloned())
    }

    fn insert_subspecies(&mut self, record: &SubSpecies) -> Result<(), StoreError> {
        insert_unique(
            &mut self.subspecies,
            record.scientific_name.clone(),
            record.clone(),
        )
    }

    fn subspecies_names(&mut self) -> Result<HashSet<String>, StoreError> {
        Ok(self.subspecies.keys().cloned().collect())
    }

    fn find_location_id(&mut self, lon: f64, lat: f64) -> Result<Option<i64>, StoreError> {
        Ok(self.locations.get(&(lon.to_bits(), lat.to_bits())).copied())
    }

    fn insert_location(&mut self, record: &NewLocation) -> Result<i64, StoreError> {
        let key = (record.point.x.to_bits(), record.point.y.to_bits());
        if self.locations.contains_key(&key) {
            return Err(StoreError::UniqueViolation);
        }
        self.next_location_id += 1;
        self.locations.insert(key, self.next_location_id);
        Ok(self.next_location_id)
    }

    fn find_checklist(&mut self, id: i64) -> Result<Option<Checklist>, StoreError> {
        Ok(self.checklists.get(&id).cloned())
    }

    fn insert_checklist(&mut self, record: &Checklist) -> Result<(), StoreError> {
        insert_unique(&mut self.checklists, record.id, record.clone())
    }

    fn find_observation(&mut self, id: i64) -> Result<Option<Observation>, StoreError> {
        Ok(self.observations.get(&id).cloned())
    }

    fn insert_observation(&mut self, record: &Observation) -> Result<(), StoreError> {
        insert_unique(&mut self.observations, record.id, record.clone())
    }
}
