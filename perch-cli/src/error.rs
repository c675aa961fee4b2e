//! Error types emitted by the Perch CLI.

use camino::Utf8PathBuf;
use perch_core::StoreError;
use perch_data::IngestError;
use thiserror::Error;

/// Errors emitted by the Perch CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// A referenced input path does not exist on disk or is not a file.
    #[error("{field} path {path:?} does not exist or is not a file")]
    MissingSourceFile {
        /// Which input the path was given for, e.g. `dump` or `taxonomy`.
        field: &'static str,
        /// The path as supplied on the command line.
        path: Utf8PathBuf,
    },
    /// Opening or initialising the database failed.
    #[error("failed to open the database: {0}")]
    OpenStore(#[source] StoreError),
    /// Installing the interrupt handler failed.
    #[error("failed to install the interrupt handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
    /// The ingestion run failed.
    #[error(transparent)]
    Ingest(#[from] IngestError),
}
