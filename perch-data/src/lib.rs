//! Ingestion for biodiversity-observation dumps.
//!
//! The crate turns a tab-delimited observation dump and a companion
//! taxonomy reference file into normalised records behind the
//! [`perch_core::EntityStore`] boundary: scalar decoding in [`field`],
//! protocol mapping in [`protocol`], taxonomy loading in [`taxonomy`],
//! cached reference-entity resolution in [`dedup`], batched commits in
//! [`batch`], and the row-by-row orchestration in [`pipeline`].

#![forbid(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod dedup;
pub mod field;
pub mod pipeline;
pub mod protocol;
pub mod taxonomy;

pub use batch::{BatchCommitter, DEFAULT_BATCH_SIZE};
pub use cache::{BoundedCache, CacheStats};
pub use dedup::{
    DedupError, DedupStats, Deduplicator, HIGH_CARDINALITY_CAPACITY, LOW_CARDINALITY_CAPACITY,
    Resolution,
};
pub use field::FieldParseError;
pub use pipeline::{
    CancelToken, FaultPolicy, IngestError, IngestOptions, IngestReport, SUPPORTED_DUMP_VERSION,
    run_ingest, seed_taxa,
};
pub use protocol::protocol_code;
pub use taxonomy::{TaxonomyError, TaxonomyFile, load_taxonomy};
