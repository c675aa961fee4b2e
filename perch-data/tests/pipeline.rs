//! End-to-end ingestion behaviour over a real SQLite store.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use perch_core::SqliteStore;
use perch_data::{CancelToken, FaultPolicy, FieldParseError, IngestError, IngestOptions, run_ingest};
use rstest::rstest;
use rusqlite::Connection;
use tempfile::{NamedTempFile, TempDir};

const COLUMNS: [&str; 36] = [
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

/// One dump row with sensible defaults; tests override what they probe.
struct Row {
    values: HashMap<&'static str, String>,
}

impl Row {
    fn new(observation: u64, checklist: u64) -> Self {
        let mut values = HashMap::new();
        let mut set = |column: &'static str, value: String| {
            values.insert(column, value);
        };
        set(
            "GLOBAL UNIQUE IDENTIFIER",
            format!("URN:CornellLabOfOrnithology:EBIRD:OBS{observation}"),
        );
        set("SAMPLING EVENT IDENTIFIER", format!("S{checklist}"));
        set("OBSERVATION COUNT", "2".into());
        set("AGE/SEX", String::new());
        set("SPECIES COMMENTS", String::new());
        set("CATEGORY", "species".into());
        set("SCIENTIFIC NAME", "Corvus brachyrhynchos".into());
        set("SUBSPECIES SCIENTIFIC NAME", String::new());
        set("OBSERVATION DATE", "03-04-2015".into());
        set("TIME OBSERVATIONS STARTED", "07:30:00".into());
        set("DURATION MINUTES", "45".into());
        set("TRIP COMMENTS", String::new());
        set("EFFORT DISTANCE KM", "1.5".into());
        set("EFFORT AREA HA", String::new());
        set("NUMBER OBSERVERS", "2".into());
        set("ALL SPECIES REPORTED", "1".into());
        set("GROUP IDENTIFIER", String::new());
        set("APPROVED", "1".into());
        set("REVIEWED", "0".into());
        set("REASON", String::new());
        set("PROTOCOL TYPE", "Traveling".into());
        set("PROJECT CODE", "EBIRD".into());
        set("OBSERVER ID", "obsr500".into());
        set("LATITUDE", "40.7".into());
        set("LONGITUDE", "-73.9".into());
        set("LOCALITY", "Central Park".into());
        set("LOCALITY ID", "L10".into());
        set("LOCALITY TYPE", "H".into());
        set("STATE CODE", "US-NY".into());
        set("COUNTY CODE", "US-NY-061".into());
        set("COUNTY", "New York".into());
        set("STATE", "New York".into());
        set("COUNTRY", "United States".into());
        set("COUNTRY CODE", "US".into());
        set("HAS MEDIA", "0".into());
        set("LAST EDITED DATE", "2021-06-01 12:00:05".into());
        Self { values }
    }

    fn with(mut self, column: &'static str, value: &str) -> Self {
        self.values.insert(column, value.to_owned());
        self
    }

    fn line(&self) -> String {
        COLUMNS
            .iter()
            .map(|column| self.values[column].as_str())
            .collect::<Vec<_>>()
            .join("\t")
    }
}

fn write_dump(rows: &[Row]) -> NamedTempFile {
    write_dump_with_header(rows, &COLUMNS)
}

fn write_dump_with_header(rows: &[Row], columns: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create dump file");
    writeln!(file, "{}", columns.join("\t")).expect("write header");
    for row in rows {
        writeln!(file, "{}", row.line()).expect("write row");
    }
    file
}

fn taxonomy_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create taxonomy file");
    write!(
        file,
        "SCI_NAME,PRIMARY_COM_NAME,SPECIES_CODE,CATEGORY,TAXON_ORDER,REPORT_AS\n\
         Corvus brachyrhynchos,American Crow,amecro,species,200,\n\
         corvid sp.,crow/raven sp.,corvid1,spuh,210,\n\
         Junco hyemalis,Dark-eyed Junco,daejun,species,300,\n\
         Junco hyemalis oreganus,Oregon Junco,oregjun,issf,301,daejun\n"
    )
    .expect("write taxonomy");
    file
}

fn standard_rows() -> Vec<Row> {
    vec![
        Row::new(1, 100),
        Row::new(2, 100)
            .with("CATEGORY", "issf")
            .with("SCIENTIFIC NAME", "Junco hyemalis")
            .with("SUBSPECIES SCIENTIFIC NAME", "Junco hyemalis oreganus"),
        Row::new(3, 200)
            .with("CATEGORY", "spuh")
            .with("SCIENTIFIC NAME", "corvid sp.")
            .with("OBSERVATION COUNT", "X"),
    ]
}

fn database_path(dir: &TempDir) -> PathBuf {
    dir.path().join("perch.db")
}

fn ingest(
    database: &Path,
    dump: &Path,
    options: &IngestOptions,
    cancel: &CancelToken,
) -> Result<perch_data::IngestReport, IngestError> {
    let taxonomy = taxonomy_file();
    let mut store = SqliteStore::open(database).expect("open store");
    run_ingest(&mut store, dump, Some(taxonomy.path()), options, cancel)
}

fn count(database: &Path, table: &str) -> i64 {
    let connection = Connection::open(database).expect("open database");
    connection
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .expect("count rows")
}

fn all_counts(database: &Path) -> Vec<(String, i64)> {
    [
        "country",
        "state_province",
        "county",
        "locality",
        "observer",
        "species",
        "subspecies",
        "location",
        "checklist",
        "observation",
    ]
    .iter()
    .map(|table| ((*table).to_owned(), count(database, table)))
    .collect()
}

#[rstest]
fn loads_rows_into_every_tier() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let dump = write_dump(&standard_rows());

    let report = ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("ingest should succeed");

    assert_eq!(report.rows_ingested, 3);
    assert_eq!(report.rows_skipped, 0);
    assert_eq!(report.rows_faulted, 0);
    assert!(!report.cancelled);
    assert_eq!(count(&database, "observation"), 3);
    assert_eq!(count(&database, "checklist"), 2);
    assert_eq!(count(&database, "location"), 1);
    assert_eq!(count(&database, "locality"), 1);
    assert_eq!(count(&database, "observer"), 1);
    assert_eq!(count(&database, "country"), 1);
    assert_eq!(count(&database, "state_province"), 1);
    assert_eq!(count(&database, "county"), 1);
}

#[rstest]
fn stores_the_remapped_taxon_references() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let dump = write_dump(&standard_rows());

    ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("ingest should succeed");

    let connection = Connection::open(&database).expect("open database");
    let taxon = |id: i64| -> (Option<String>, Option<String>) {
        connection
            .query_row(
                "SELECT species, subspecies FROM observation WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("select observation")
    };

    // Plain species row.
    assert_eq!(taxon(1), (Some("Corvus brachyrhynchos".into()), None));
    // issf row references the subspecies only.
    assert_eq!(taxon(2), (None, Some("Junco hyemalis oreganus".into())));
    // spuh rows always land in the subspecies tier.
    assert_eq!(taxon(3), (None, Some("corvid sp.".into())));

    // The "X" count decodes as indeterminate with no number.
    let (observed, indeterminate): (Option<i64>, bool) = connection
        .query_row(
            "SELECT count, count_indeterminate FROM observation WHERE id = 3",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("select count columns");
    assert_eq!(observed, None);
    assert!(indeterminate);
}

#[rstest]
fn rerunning_the_same_dump_changes_nothing() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let dump = write_dump(&standard_rows());

    ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("first run");
    let first = all_counts(&database);

    ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("second run");
    assert_eq!(all_counts(&database), first);
}

#[rstest]
fn resuming_from_an_offset_matches_a_single_pass() {
    let dir = TempDir::new().expect("create temp dir");
    let rows = standard_rows();
    let full = write_dump(&rows);
    let first_two = write_dump(&rows[..2]);

    let single_pass = database_path(&dir);
    ingest(
        &single_pass,
        full.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("single pass");

    let resumed = dir.path().join("resumed.db");
    ingest(
        &resumed,
        first_two.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect("interrupted pass");
    let report = ingest(
        &resumed,
        full.path(),
        &IngestOptions {
            resume_offset: 2,
            ..IngestOptions::default()
        },
        &CancelToken::new(),
    )
    .expect("resumed pass");

    assert_eq!(report.rows_skipped, 2);
    // The resume position counts skipped rows too; a further resume must
    // start past the whole dump, not at row 1.
    assert_eq!(report.next_row(), 3);
    assert_eq!(all_counts(&resumed), all_counts(&single_pass));
}

#[rstest]
fn missing_column_aborts_with_a_format_diagnosis() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let truncated: Vec<&str> = COLUMNS
        .iter()
        .copied()
        .filter(|column| *column != "LAST EDITED DATE")
        .collect();
    // Rows are irrelevant; the header alone must fail validation.
    let dump = write_dump_with_header(&[], &truncated);

    let error = ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect_err("header validation should fail");

    assert!(matches!(
        error,
        IngestError::UnsupportedFormat {
            column: "LAST EDITED DATE"
        }
    ));
    assert!(error.to_string().contains("1.12"));
}

#[rstest]
fn skip_row_policy_drops_only_the_malformed_row() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let mut rows = standard_rows();
    rows[1] = Row::new(2, 100).with("OBSERVATION DATE", "not-a-date");
    let dump = write_dump(&rows);

    let report = ingest(
        &database,
        dump.path(),
        &IngestOptions {
            fault_policy: FaultPolicy::SkipRow,
            ..IngestOptions::default()
        },
        &CancelToken::new(),
    )
    .expect("run should continue past the bad row");

    assert_eq!(report.rows_faulted, 1);
    assert_eq!(report.rows_ingested, 2);
    assert_eq!(count(&database, "observation"), 2);
}

#[rstest]
fn abort_policy_commits_rows_staged_before_the_fault() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let mut rows = standard_rows();
    rows[1] = Row::new(2, 100).with("OBSERVATION DATE", "not-a-date");
    let dump = write_dump(&rows);

    let error = ingest(
        &database,
        dump.path(),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .expect_err("the malformed row should abort the run");

    assert!(matches!(
        error,
        IngestError::Field {
            row: 1,
            source: FieldParseError::MalformedDate { .. }
        }
    ));
    // The first row was staged before the fault and must survive it.
    assert_eq!(count(&database, "observation"), 1);
}

#[rstest]
fn unknown_protocol_aborts_even_under_skip_row() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let mut rows = standard_rows();
    rows[1] = Row::new(2, 100).with("PROTOCOL TYPE", "Casual Walk");
    let dump = write_dump(&rows);

    let error = ingest(
        &database,
        dump.path(),
        &IngestOptions {
            fault_policy: FaultPolicy::SkipRow,
            ..IngestOptions::default()
        },
        &CancelToken::new(),
    )
    .expect_err("an unknown protocol must abort");

    assert!(matches!(
        error,
        IngestError::Field {
            source: FieldParseError::UnknownProtocol { .. },
            ..
        }
    ));
}

#[rstest]
fn a_cancelled_run_stops_before_processing() {
    let dir = TempDir::new().expect("create temp dir");
    let database = database_path(&dir);
    let dump = write_dump(&standard_rows());
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = ingest(&database, dump.path(), &IngestOptions::default(), &cancel)
        .expect("cancellation is not an error");

    assert!(report.cancelled);
    assert_eq!(report.rows_ingested, 0);
    assert_eq!(count(&database, "observation"), 0);
}
