//! Command-line interface for the Perch observation loader.
#![forbid(unsafe_code)]

mod error;

pub use error::CliError;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use perch_core::SqliteStore;
use perch_data::{
    CancelToken, DEFAULT_BATCH_SIZE, FaultPolicy, IngestOptions, IngestReport, run_ingest,
};

/// Run the loader with the current process arguments.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || handle.cancel())?;
    let report = load(&cli, &cancel)?;
    if report.cancelled {
        info!(
            "stopped on request after {} committed rows; resume with --resume-offset {}",
            report.rows_ingested,
            report.next_row()
        );
    }
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "perch",
    about = "Bulk loader for biodiversity observation dumps",
    version
)]
struct Cli {
    /// Tab-delimited observation dump to load.
    #[arg(value_name = "DUMP")]
    dump: Utf8PathBuf,
    /// SQLite database to load into; created when absent.
    #[arg(long, value_name = "path")]
    database: Utf8PathBuf,
    /// Taxonomy reference CSV. Omit when the reference taxa are already
    /// loaded.
    #[arg(long, value_name = "path")]
    taxonomy: Option<Utf8PathBuf>,
    /// Data rows to skip before processing starts.
    #[arg(long, default_value_t = 0, value_name = "rows")]
    resume_offset: u64,
    /// Rows per durable batch.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "rows")]
    batch_size: u64,
    /// Skip rows whose scalar fields fail to decode instead of aborting.
    #[arg(long)]
    skip_bad_rows: bool,
}

fn load(cli: &Cli, cancel: &CancelToken) -> Result<IngestReport, CliError> {
    require_existing(&cli.dump, "dump")?;
    if let Some(taxonomy) = &cli.taxonomy {
        require_existing(taxonomy, "taxonomy")?;
    }
    let mut store =
        SqliteStore::open(cli.database.as_std_path()).map_err(CliError::OpenStore)?;
    let options = IngestOptions {
        resume_offset: cli.resume_offset,
        batch_size: cli.batch_size,
        fault_policy: if cli.skip_bad_rows {
            FaultPolicy::SkipRow
        } else {
            FaultPolicy::Abort
        },
    };
    let report = run_ingest(
        &mut store,
        cli.dump.as_std_path(),
        cli.taxonomy.as_deref().map(Utf8Path::as_std_path),
        &options,
        cancel,
    )?;
    Ok(report)
}

fn require_existing(path: &Utf8PathBuf, field: &'static str) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::MissingSourceFile {
            field,
            path: path.clone(),
        })
    }
}
