//! Core domain types and the persistence boundary for the perch loader.
//!
//! This crate defines the normalized entity model for biodiversity
//! observation dumps — reference entities keyed by natural keys, event
//! entities keyed by upstream ids — together with the [`EntityStore`]
//! trait the ingestion pipeline writes through and its SQLite
//! implementation.
#![forbid(unsafe_code)]

mod entity;
mod sqlite;
mod store;
pub mod test_support;

pub use entity::{
    Checklist, Country, County, Locality, Location, NewLocation, Observation, Observer, Species,
    StateProvince, SubSpecies, TaxonCategory,
};
pub use sqlite::SqliteStore;
pub use store::{EntityStore, StoreError};
