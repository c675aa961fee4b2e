//! Persistence boundary for the ingestion pipeline.
//!
//! The pipeline only ever needs three things from a backend: find a record
//! by its natural key, insert a record, and delimit durable batches. The
//! [`EntityStore`] trait spells those out per entity type so callers work
//! with strongly typed keys and records rather than dynamic filters.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::entity::{
    Checklist, Country, County, Locality, Location, NewLocation, Observation, Observer, Species,
    StateProvince, SubSpecies,
};

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert collided with an existing record holding the same natural
    /// key. Deduplication recovers from this by re-querying; it never
    /// reaches the operator.
    #[error("a record with the same natural key already exists")]
    UniqueViolation,
    /// Opening the database failed.
    #[error("failed to open database at {path:?}")]
    Open {
        /// Location of the database on disk.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A stored value could not be decoded into its domain type.
    #[error("stored value {value:?} in column {column} could not be decoded")]
    Decode {
        /// Column the value was read from.
        column: &'static str,
        /// Raw stored text.
        value: String,
    },
    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Typed find/insert access plus transactional batch boundaries.
///
/// Inserts must fail with [`StoreError::UniqueViolation`] when the natural
/// key is already present, and must not poison the enclosing batch when
/// they do: implementations scope each insert so a conflicting attempt can
/// be rolled back independently.
pub trait EntityStore {
    /// Open a durable batch. Work performed before the next
    /// [`commit`](EntityStore::commit) is staged, not yet durable.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit everything staged since the last [`begin`](EntityStore::begin).
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Look up a country by code.
    fn find_country(&mut self, code: &str) -> Result<Option<Country>, StoreError>;
    /// Insert a country record.
    fn insert_country(&mut self, record: &Country) -> Result<(), StoreError>;

    /// Look up a state or province by code.
    fn find_state_province(&mut self, code: &str) -> Result<Option<StateProvince>, StoreError>;
    /// Insert a state/province record.
    fn insert_state_province(&mut self, record: &StateProvince) -> Result<(), StoreError>;

    /// Look up a county by code.
    fn find_county(&mut self, code: &str) -> Result<Option<County>, StoreError>;
    /// Insert a county record.
    fn insert_county(&mut self, record: &County) -> Result<(), StoreError>;

    /// Look up a locality by its externally assigned id.
    fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError>;
    /// Insert a locality record.
    fn insert_locality(&mut self, record: &Locality) -> Result<(), StoreError>;

    /// Look up an observer by id.
    fn find_observer(&mut self, id: i64) -> Result<Option<Observer>, StoreError>;
    /// Insert an observer record.
    fn insert_observer(&mut self, record: &Observer) -> Result<(), StoreError>;

    /// Look up a species by scientific name.
    fn find_species(&mut self, scientific_name: &str) -> Result<Option<Species>, StoreError>;
    /// Insert a species record.
    fn insert_species(&mut self, record: &Species) -> Result<(), StoreError>;

    /// Look up a subspecies-tier entry by scientific name.
    fn find_subspecies(&mut self, scientific_name: &str)
    -> Result<Option<SubSpecies>, StoreError>;
    /// Insert a subspecies-tier record.
    fn insert_subspecies(&mut self, record: &SubSpecies) -> Result<(), StoreError>;

    /// All scientific names currently stored in the subspecies tier. Used
    /// to seed the category remap before ingestion starts.
    fn subspecies_names(&mut self) -> Result<HashSet<String>, StoreError>;

    /// Find the synthetic id of the location at exactly the given
    /// coordinates, if one exists.
    fn find_location_id(&mut self, lon: f64, lat: f64) -> Result<Option<i64>, StoreError>;
    /// Insert a location, returning the assigned synthetic id.
    fn insert_location(&mut self, record: &NewLocation) -> Result<i64, StoreError>;

    /// Look up a checklist by its upstream id.
    fn find_checklist(&mut self, id: i64) -> Result<Option<Checklist>, StoreError>;
    /// Insert a checklist record.
    fn insert_checklist(&mut self, record: &Checklist) -> Result<(), StoreError>;

    /// Look up an observation by its upstream id.
    fn find_observation(&mut self, id: i64) -> Result<Option<Observation>, StoreError>;
    /// Insert an observation record.
    fn insert_observation(&mut self, record: &Observation) -> Result<(), StoreError>;
}
