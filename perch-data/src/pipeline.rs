//! The ingestion pipeline.
//!
//! Reads the observation dump row by row, decodes each field, resolves
//! reference entities in dependency order, assembles the location,
//! checklist and observation records, and stages them for batched commit.
//! The run is idempotent: re-running over the same dump, or resuming from
//! an offset, never duplicates a record.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use geo::Coord;
use log::{info, warn};
use thiserror::Error;

use perch_core::{
    Checklist, Country, County, EntityStore, Locality, NewLocation, Observation, Observer,
    StateProvince, StoreError,
};

use crate::batch::{BatchCommitter, DEFAULT_BATCH_SIZE};
use crate::dedup::{DedupError, Deduplicator};
use crate::field::{self, FieldParseError};
use crate::protocol::protocol_code;
use crate::taxonomy::{TaxonomyError, TaxonomyFile, load_taxonomy};

/// Dump format version this loader understands. Upstream revises the
/// format regularly; a header mismatch almost always means the dump is a
/// different version.
pub const SUPPORTED_DUMP_VERSION: &str = "1.12";

/// Every column the pipeline reads. Validated against the header before
/// any row is processed.
const REQUIRED_COLUMNS: &[&str] = &[
    "GLOBAL UNIQUE IDENTIFIER",
    "SAMPLING EVENT IDENTIFIER",
    "OBSERVATION COUNT",
    "AGE/SEX",
    "SPECIES COMMENTS",
    "CATEGORY",
    "SCIENTIFIC NAME",
    "SUBSPECIES SCIENTIFIC NAME",
    "OBSERVATION DATE",
    "TIME OBSERVATIONS STARTED",
    "DURATION MINUTES",
    "TRIP COMMENTS",
    "EFFORT DISTANCE KM",
    "EFFORT AREA HA",
    "NUMBER OBSERVERS",
    "ALL SPECIES REPORTED",
    "GROUP IDENTIFIER",
    "APPROVED",
    "REVIEWED",
    "REASON",
    "PROTOCOL TYPE",
    "PROJECT CODE",
    "OBSERVER ID",
    "LATITUDE",
    "LONGITUDE",
    "LOCALITY",
    "LOCALITY ID",
    "LOCALITY TYPE",
    "STATE CODE",
    "COUNTY CODE",
    "COUNTY",
    "STATE",
    "COUNTRY",
    "COUNTRY CODE",
    "HAS MEDIA",
    "LAST EDITED DATE",
];

/// Errors that stop an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Opening the dump failed.
    #[error("failed to open observation dump at {path:?}")]
    Open {
        /// Path of the dump.
        path: PathBuf,
        /// Source error from the CSV reader.
        #[source]
        source: csv::Error,
    },
    /// Reading a dump row failed.
    #[error("failed to read dump row {row}")]
    Read {
        /// Zero-based data row index.
        row: u64,
        /// Source error from the CSV reader.
        #[source]
        source: csv::Error,
    },
    /// The dump header lacks a required column, so this is not a dump of
    /// the supported format version.
    #[error(
        "column {column:?} is missing from the dump header; this loader supports \
         dump format version {SUPPORTED_DUMP_VERSION} and the upstream format \
         changes frequently"
    )]
    UnsupportedFormat {
        /// The absent column.
        column: &'static str,
    },
    /// A scalar field on one row failed to decode.
    #[error("row {row}: {source}")]
    Field {
        /// Zero-based data row index.
        row: u64,
        /// The decode failure.
        #[source]
        source: FieldParseError,
    },
    /// Loading the taxonomy reference file failed.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    /// Reference-entity resolution failed.
    #[error(transparent)]
    Dedup(#[from] DedupError),
    /// The backend failed outside of resolution.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether the [`FaultPolicy::SkipRow`] policy may skip past this
    /// fault. Only per-row scalar decode failures qualify; an unknown
    /// protocol name signals format drift and always aborts.
    fn row_skippable(&self) -> bool {
        match self {
            Self::Field { source, .. } => {
                !matches!(source, FieldParseError::UnknownProtocol { .. })
            }
            _ => false,
        }
    }
}

/// What to do when one row fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Stop the run, committing staged work first.
    #[default]
    Abort,
    /// Log the row and carry on. Unknown protocol names and non-row
    /// faults still abort.
    SkipRow,
}

/// Tunable knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Data rows to skip before processing starts. The skip is a linear
    /// scan from the top of the file, not a seek.
    pub resume_offset: u64,
    /// Rows per durable batch.
    pub batch_size: u64,
    /// Per-row fault handling.
    pub fault_policy: FaultPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            resume_offset: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            fault_policy: FaultPolicy::Abort,
        }
    }
}

/// Cooperative cancellation flag, checked between rows. Cloning shares
/// the flag, so a signal handler can hold one copy and the pipeline
/// another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unsignalled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    /// Rows processed and committed.
    pub rows_ingested: u64,
    /// Rows skipped by the resume offset.
    pub rows_skipped: u64,
    /// Rows dropped under [`FaultPolicy::SkipRow`].
    pub rows_faulted: u64,
    /// Whether the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl IngestReport {
    /// Absolute input row the next run should resume from: every row
    /// this run consumed, whether skipped, faulted, or committed.
    #[must_use]
    pub fn next_row(&self) -> u64 {
        self.rows_skipped + self.rows_faulted + self.rows_ingested
    }
}

/// Column positions for the validated dump header.
struct Header {
    index: HashMap<String, usize>,
}

impl Header {
    fn from_record(record: &csv::StringRecord) -> Result<Self, IngestError> {
        let mut index = HashMap::new();
        for (position, name) in record.iter().enumerate() {
            index.insert(name.trim_start_matches('\u{feff}').to_owned(), position);
        }
        for &column in REQUIRED_COLUMNS {
            if !index.contains_key(column) {
                return Err(IngestError::UnsupportedFormat { column });
            }
        }
        Ok(Self { index })
    }

    /// Cell text for a validated column; short rows read as blank.
    fn cell<'r>(&self, record: &'r csv::StringRecord, column: &str) -> &'r str {
        self.index
            .get(column)
            .and_then(|&position| record.get(position))
            .unwrap_or("")
    }
}

/// Seed the species and subspecies tables from a parsed taxonomy file.
///
/// Idempotent: records already present are left untouched, so the step
/// can run before every ingestion without harm. Each tier commits
/// separately, as subspecies parent references require the species tier
/// to be durable first.
pub fn seed_taxa<S: EntityStore>(
    store: &mut S,
    taxonomy: &TaxonomyFile,
) -> Result<(), IngestError> {
    store.begin()?;
    for species in taxonomy.species.values() {
        if store.find_species(&species.scientific_name)?.is_none() {
            match store.insert_species(species) {
                Ok(()) | Err(StoreError::UniqueViolation) => {}
                Err(other) => return Err(other.into()),
            }
        }
    }
    store.commit()?;

    store.begin()?;
    for subspecies in taxonomy.subspecies.values() {
        if store.find_subspecies(&subspecies.scientific_name)?.is_none() {
            match store.insert_subspecies(subspecies) {
                Ok(()) | Err(StoreError::UniqueViolation) => {}
                Err(other) => return Err(other.into()),
            }
        }
    }
    store.commit()?;

    info!(
        "taxonomy seeded: {} species, {} subspecies-tier entries",
        taxonomy.species.len(),
        taxonomy.subspecies.len()
    );
    Ok(())
}

/// Run the full ingestion pipeline over one observation dump.
///
/// When `taxonomy_path` is given, the taxonomy is loaded and seeded
/// first; otherwise the reference taxa must already be in the store.
pub fn run_ingest<S: EntityStore>(
    store: &mut S,
    dump_path: &Path,
    taxonomy_path: Option<&Path>,
    options: &IngestOptions,
    cancel: &CancelToken,
) -> Result<IngestReport, IngestError> {
    if let Some(path) = taxonomy_path {
        let taxonomy = load_taxonomy(path)?;
        seed_taxa(store, &taxonomy)?;
    }
    // Snapshot after seeding: the category remap consults this set.
    let subspecies_names = store.subspecies_names()?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        // The dump does not quote fields; a stray quote character is data.
        .quoting(false)
        .flexible(true)
        .from_path(dump_path)
        .map_err(|source| IngestError::Open {
            path: dump_path.to_path_buf(),
            source,
        })?;
    let header = Header::from_record(
        reader
            .headers()
            .map_err(|source| IngestError::Read { row: 0, source })?,
    )?;

    let mut dedup = Deduplicator::new();
    let mut committer = BatchCommitter::new(options.batch_size);
    let mut report = IngestReport::default();
    committer.begin(store)?;

    for (position, result) in reader.records().enumerate() {
        let row = position as u64;
        if cancel.is_cancelled() {
            committer.flush(store)?;
            report.cancelled = true;
            report.rows_ingested = committer.committed_rows();
            info!(
                "stop requested; committed {} rows before halting at input row {}",
                report.rows_ingested,
                report.next_row()
            );
            return Ok(report);
        }
        let record = match result {
            Ok(record) => record,
            Err(source) => {
                committer.flush(store)?;
                return Err(IngestError::Read { row, source });
            }
        };
        if row < options.resume_offset {
            report.rows_skipped += 1;
            continue;
        }
        match process_row(store, &mut dedup, &header, &subspecies_names, row, &record) {
            Ok(()) => {
                if committer.row_staged(store)? {
                    // Print the absolute input position, not the count of
                    // rows this run committed: a resumed run must report a
                    // resume point at or past its own offset.
                    info!(
                        "commit at input row {}; {}",
                        report.rows_skipped + report.rows_faulted + committer.committed_rows(),
                        dedup.stats()
                    );
                }
            }
            Err(fault) if options.fault_policy == FaultPolicy::SkipRow && fault.row_skippable() => {
                warn!("skipping row: {fault}");
                report.rows_faulted += 1;
            }
            Err(fault) => {
                // Staged rows are valid work; make them durable so the
                // operator can resume from the last printed count.
                committer.flush(store)?;
                return Err(fault);
            }
        }
    }

    committer.flush(store)?;
    report.rows_ingested = committer.committed_rows();
    info!(
        "ingest complete: {} rows committed, {} skipped by resume offset, {} faulted",
        report.rows_ingested, report.rows_skipped, report.rows_faulted
    );
    Ok(report)
}

/// Decode, resolve, and stage one dump row.
fn process_row<S: EntityStore>(
    store: &mut S,
    dedup: &mut Deduplicator,
    header: &Header,
    subspecies_names: &HashSet<String>,
    row: u64,
    record: &csv::StringRecord,
) -> Result<(), IngestError> {
    let cell = |column: &str| header.cell(record, column);
    let at_row = |source: FieldParseError| IngestError::Field { row, source };

    // Independent reference entities first.
    let country = Country {
        code: cell("COUNTRY CODE").to_owned(),
        name: cell("COUNTRY").to_owned(),
    };
    let state = StateProvince {
        code: cell("STATE CODE").to_owned(),
        name: cell("STATE").to_owned(),
    };
    let county = County {
        code: cell("COUNTY CODE").to_owned(),
        name: cell("COUNTY").to_owned(),
    };
    let locality = Locality {
        id: field::prefixed_id("L", cell("LOCALITY ID")).map_err(at_row)?,
        kind: cell("LOCALITY TYPE").to_owned(),
        name: cell("LOCALITY").to_owned(),
    };
    let observer_id =
        field::optional_prefixed_id("obsr", cell("OBSERVER ID")).map_err(at_row)?;

    dedup.ensure_country(store, &country)?;
    dedup.ensure_state_province(store, &state)?;
    dedup.ensure_county(store, &county)?;
    dedup.ensure_locality(store, &locality)?;
    if let Some(id) = observer_id {
        dedup.ensure_observer(store, &Observer { id })?;
    }

    // Location depends on all of the above.
    let location = NewLocation {
        point: Coord {
            x: field::coordinate(cell("LONGITUDE")).map_err(at_row)?,
            y: field::coordinate(cell("LATITUDE")).map_err(at_row)?,
        },
        country_code: country.code,
        state_code: state.code,
        county_code: county.code,
        locality_id: locality.id,
    };
    let location_id = dedup.resolve_location(store, &location)?;

    // Checklist depends on the location. Every column decodes on every
    // row, so a malformed value faults even when the checklist itself is
    // already stored; only the insert is gated on novelty.
    let checklist = Checklist {
        id: field::prefixed_id("S", cell("SAMPLING EVENT IDENTIFIER")).map_err(at_row)?,
        location_id,
        started_at: field::start_timestamp(
            cell("OBSERVATION DATE"),
            cell("TIME OBSERVATIONS STARTED"),
        )
        .map_err(at_row)?,
        comments: cell("TRIP COMMENTS").to_owned(),
        duration: field::duration_minutes(cell("DURATION MINUTES")).map_err(at_row)?,
        distance_km: field::decimal_or_none(cell("EFFORT DISTANCE KM")).map_err(at_row)?,
        area_ha: field::decimal_or_none(cell("EFFORT AREA HA")).map_err(at_row)?,
        observer_count: field::int_or_none(cell("NUMBER OBSERVERS")).map_err(at_row)?,
        complete: field::flag(cell("ALL SPECIES REPORTED")).map_err(at_row)?,
        group_id: field::optional_prefixed_id("G", cell("GROUP IDENTIFIER")).map_err(at_row)?,
        approved: field::flag(cell("APPROVED")).map_err(at_row)?,
        reviewed: field::flag(cell("REVIEWED")).map_err(at_row)?,
        reason: cell("REASON").to_owned(),
        protocol_code: protocol_code(cell("PROTOCOL TYPE"))
            .map_err(at_row)?
            .to_owned(),
        project_code: cell("PROJECT CODE").to_owned(),
    };
    let checklist_id = checklist.id;
    if store.find_checklist(checklist_id)?.is_none() {
        match store.insert_checklist(&checklist) {
            Ok(()) | Err(StoreError::UniqueViolation) => {}
            Err(other) => return Err(other.into()),
        }
    }

    // Observation last; a repeat id from a re-run is a no-op.
    let observation_id =
        field::observation_id(cell("GLOBAL UNIQUE IDENTIFIER")).map_err(at_row)?;
    if store.find_observation(observation_id)?.is_some() {
        return Ok(());
    }

    let (species, subspecies) = remap_taxon(
        cell("CATEGORY"),
        cell("SCIENTIFIC NAME"),
        cell("SUBSPECIES SCIENTIFIC NAME"),
        subspecies_names,
    );
    let (count, count_indeterminate) =
        field::observation_count(cell("OBSERVATION COUNT")).map_err(at_row)?;
    let comments = match cell("SPECIES COMMENTS") {
        "" => None,
        text => Some(text.to_owned()),
    };
    let observation = Observation {
        id: observation_id,
        count,
        count_indeterminate,
        age_sex: cell("AGE/SEX").to_owned(),
        comments,
        species,
        subspecies,
        checklist_id,
        observer_id,
        last_edited_at: field::last_edited(cell("LAST EDITED DATE")).map_err(at_row)?,
        has_media: field::flag(cell("HAS MEDIA")).map_err(at_row)?,
    };
    match store.insert_observation(&observation) {
        Ok(()) | Err(StoreError::UniqueViolation) => {}
        Err(other) => return Err(other.into()),
    }
    Ok(())
}

/// Pick the taxon reference for an observation row.
///
/// The dump labels spuhs, slashes, and hybrids as top-level taxa; here
/// they always land in the subspecies tier. Domestics and forms move to
/// the subspecies tier only when the taxonomy already knows the name
/// there. At most one of the two references is populated.
fn remap_taxon(
    category: &str,
    scientific_name: &str,
    subspecies_scientific_name: &str,
    subspecies_names: &HashSet<String>,
) -> (Option<String>, Option<String>) {
    let mut species = match scientific_name {
        "" => None,
        name => Some(name.to_owned()),
    };
    let mut subspecies = match subspecies_scientific_name {
        "" => None,
        name => Some(name.to_owned()),
    };
    match category {
        "spuh" | "slash" | "hybrid" => subspecies = species.take(),
        "domestic" | "form" => {
            if species
                .as_deref()
                .is_some_and(|name| subspecies_names.contains(name))
            {
                subspecies = species.take();
            } else {
                subspecies = None;
            }
        }
        _ => {
            if subspecies.is_some() {
                species = None;
            }
        }
    }
    (species, subspecies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(entries: &[&str]) -> HashSet<String> {
        entries.iter().map(|name| (*name).to_owned()).collect()
    }

    #[rstest]
    #[case("spuh", "Anas sp.")]
    #[case("slash", "Spatula discors/cyanoptera")]
    #[case("hybrid", "Anas platyrhynchos x rubripes")]
    fn aggregate_categories_always_become_subspecies(
        #[case] category: &str,
        #[case] name: &str,
    ) {
        let (species, subspecies) = remap_taxon(category, name, "", &names(&[]));
        assert_eq!(species, None);
        assert_eq!(subspecies.as_deref(), Some(name));
    }

    #[rstest]
    fn the_resume_position_counts_every_consumed_row() {
        let report = IngestReport {
            rows_ingested: 5,
            rows_skipped: 2,
            rows_faulted: 1,
            cancelled: true,
        };
        assert_eq!(report.next_row(), 8);
    }

    #[rstest]
    #[case("domestic")]
    #[case("form")]
    fn known_domestics_and_forms_become_subspecies(#[case] category: &str) {
        let known = names(&["Columba livia (Feral Pigeon)"]);
        let (species, subspecies) =
            remap_taxon(category, "Columba livia (Feral Pigeon)", "", &known);
        assert_eq!(species, None);
        assert_eq!(subspecies.as_deref(), Some("Columba livia (Feral Pigeon)"));
    }

    #[rstest]
    #[case("domestic")]
    #[case("form")]
    fn unknown_domestics_and_forms_stay_species(#[case] category: &str) {
        let (species, subspecies) =
            remap_taxon(category, "Columba livia (Feral Pigeon)", "", &names(&[]));
        assert_eq!(species.as_deref(), Some("Columba livia (Feral Pigeon)"));
        assert_eq!(subspecies, None);
    }

    #[rstest]
    fn issf_rows_reference_the_subspecies_only() {
        let (species, subspecies) = remap_taxon(
            "issf",
            "Junco hyemalis",
            "Junco hyemalis oreganus",
            &names(&["Junco hyemalis oreganus"]),
        );
        assert_eq!(species, None);
        assert_eq!(subspecies.as_deref(), Some("Junco hyemalis oreganus"));
    }

    #[rstest]
    fn plain_species_rows_reference_the_species() {
        let (species, subspecies) =
            remap_taxon("species", "Corvus brachyrhynchos", "", &names(&[]));
        assert_eq!(species.as_deref(), Some("Corvus brachyrhynchos"));
        assert_eq!(subspecies, None);
    }

    #[rstest]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[rstest]
    fn unknown_protocol_faults_are_never_row_skippable() {
        let fault = IngestError::Field {
            row: 3,
            source: FieldParseError::UnknownProtocol {
                name: "Casual Walk".into(),
            },
        };
        assert!(!fault.row_skippable());
        let fault = IngestError::Field {
            row: 3,
            source: FieldParseError::MalformedFlag { value: "yes".into() },
        };
        assert!(fault.row_skippable());
    }
}
