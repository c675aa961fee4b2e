//! Taxonomy reference file loader.
//!
//! The reference file is comma-delimited with one row per taxon, ordered
//! by taxonomic sort position. Species rows land in one map, everything
//! else (issf, forms, domestics, slashes, intergrades, spuhs, hybrids) in
//! the subspecies-tier map. Parent references (`REPORT_AS`) always point
//! at a row earlier in the file, so a single top-to-bottom scan with a
//! running code table resolves them; a miss means the file is malformed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use thiserror::Error;

use perch_core::{Species, SubSpecies, TaxonCategory};

const COLUMN_COMMON_NAME: &str = "PRIMARY_COM_NAME";
const COLUMN_SCIENTIFIC_NAME: &str = "SCI_NAME";
const COLUMN_TAXON_ORDER: &str = "TAXON_ORDER";
const COLUMN_CATEGORY: &str = "CATEGORY";
const COLUMN_REPORT_AS: &str = "REPORT_AS";
const COLUMN_SPECIES_CODE: &str = "SPECIES_CODE";

/// Errors raised while loading the taxonomy reference file.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// Opening the file failed.
    #[error("failed to open taxonomy file at {path:?}")]
    Open {
        /// Path of the file.
        path: PathBuf,
        /// Source error from the CSV reader.
        #[source]
        source: csv::Error,
    },
    /// Reading a record failed.
    #[error("failed to read taxonomy record {record}")]
    Read {
        /// One-based record number.
        record: u64,
        /// Source error from the CSV reader.
        #[source]
        source: csv::Error,
    },
    /// A required column is missing from the header.
    #[error("taxonomy file is missing column {column}")]
    MissingColumn {
        /// The absent column.
        column: &'static str,
    },
    /// A taxonomic order value failed to parse as a decimal.
    #[error("malformed taxonomic order {value:?} in record {record}")]
    MalformedOrder {
        /// Offending raw value.
        value: String,
        /// One-based record number.
        record: u64,
    },
    /// A category label outside the known set.
    #[error("unknown taxonomy category {value:?} in record {record}")]
    UnknownCategory {
        /// Offending raw value.
        value: String,
        /// One-based record number.
        record: u64,
    },
    /// A parent code that no earlier row defined. Well-formed files are
    /// ordered parents-first, so this is an input-format fault.
    #[error(
        "record {record} reports as code {code:?}, which no earlier taxonomy row defines"
    )]
    UnknownParent {
        /// Offending parent code.
        code: String,
        /// One-based record number.
        record: u64,
    },
}

/// Parsed taxonomy reference data, ordered by taxonomic sort position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxonomyFile {
    /// Rows labelled `species`, keyed by taxonomic order.
    pub species: BTreeMap<Decimal, Species>,
    /// All other rows, keyed by taxonomic order.
    pub subspecies: BTreeMap<Decimal, SubSpecies>,
}

struct Columns {
    common_name: usize,
    scientific_name: usize,
    taxon_order: usize,
    category: usize,
    report_as: usize,
    species_code: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, TaxonomyError> {
        let mut index = HashMap::new();
        for (position, name) in headers.iter().enumerate() {
            // The upstream file carries a UTF-8 byte order mark.
            index.insert(name.trim_start_matches('\u{feff}'), position);
        }
        let find = |column: &'static str| {
            index
                .get(column)
                .copied()
                .ok_or(TaxonomyError::MissingColumn { column })
        };
        Ok(Self {
            common_name: find(COLUMN_COMMON_NAME)?,
            scientific_name: find(COLUMN_SCIENTIFIC_NAME)?,
            taxon_order: find(COLUMN_TAXON_ORDER)?,
            category: find(COLUMN_CATEGORY)?,
            report_as: find(COLUMN_REPORT_AS)?,
            species_code: find(COLUMN_SPECIES_CODE)?,
        })
    }
}

/// Parse the taxonomy reference file into its species and subspecies
/// tiers.
pub fn load_taxonomy(path: &Path) -> Result<TaxonomyFile, TaxonomyError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| TaxonomyError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let columns = Columns::from_headers(
        reader
            .headers()
            .map_err(|source| TaxonomyError::Read { record: 0, source })?,
    )?;

    let mut taxonomy = TaxonomyFile::default();
    // Running code -> scientific name table for parent resolution; filled
    // strictly top-to-bottom.
    let mut names_by_code: HashMap<String, String> = HashMap::new();

    for (position, result) in reader.records().enumerate() {
        let record_number = position as u64 + 1;
        let record = result.map_err(|source| TaxonomyError::Read {
            record: record_number,
            source,
        })?;
        let cell = |column: usize| record.get(column).unwrap_or("");

        let common_name = cell(columns.common_name).to_owned();
        let scientific_name = cell(columns.scientific_name).to_owned();
        let order_text = cell(columns.taxon_order);
        let category = cell(columns.category);
        let parent_code = cell(columns.report_as);
        let code = cell(columns.species_code).to_owned();

        let taxonomic_order: Decimal =
            order_text
                .parse()
                .map_err(|_| TaxonomyError::MalformedOrder {
                    value: order_text.to_owned(),
                    record: record_number,
                })?;
        names_by_code.insert(code.clone(), scientific_name.clone());

        let parent_species = if parent_code.is_empty() {
            None
        } else {
            Some(names_by_code.get(parent_code).cloned().ok_or_else(|| {
                TaxonomyError::UnknownParent {
                    code: parent_code.to_owned(),
                    record: record_number,
                }
            })?)
        };

        if category == "species" {
            taxonomy.species.insert(
                taxonomic_order,
                Species {
                    scientific_name,
                    common_name,
                    taxonomic_order,
                    species_code: code,
                },
            );
        } else {
            let category = TaxonCategory::from_label(category).ok_or_else(|| {
                TaxonomyError::UnknownCategory {
                    value: category.to_owned(),
                    record: record_number,
                }
            })?;
            taxonomy.subspecies.insert(
                taxonomic_order,
                SubSpecies {
                    scientific_name,
                    common_name,
                    taxonomic_order,
                    category,
                    parent_species,
                    code,
                },
            );
        }
    }

    Ok(taxonomy)
}
