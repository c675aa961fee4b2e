//! Facade crate for the Perch observation loader.
//!
//! This crate re-exports the domain entities, the persistence boundary,
//! and the ingestion pipeline so embedders need a single dependency.

#![forbid(unsafe_code)]

pub use perch_core::{
    Checklist, Country, County, EntityStore, Locality, Location, NewLocation, Observation,
    Observer, Species, SqliteStore, StateProvince, StoreError, SubSpecies, TaxonCategory,
};
pub use perch_data::{
    CancelToken, FaultPolicy, IngestError, IngestOptions, IngestReport, SUPPORTED_DUMP_VERSION,
    TaxonomyFile, load_taxonomy, run_ingest, seed_taxa,
};
