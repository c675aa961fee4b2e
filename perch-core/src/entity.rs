//! Domain entities for the observation loader.
//!
//! Reference entities carry their natural key (country code, scientific
//! name, externally assigned integer id) as the primary key; event entities
//! carry the identifier assigned by the upstream dataset. All of them are
//! plain data: validation happens in the field codec before a record is
//! ever constructed.

use chrono::{Duration, NaiveDateTime};
use geo::Coord;
use rust_decimal::Decimal;

/// A country, keyed by its upstream country code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    /// Natural key, e.g. `US`.
    pub code: String,
    /// Display name, unique across countries.
    pub name: String,
}

/// A state or province, keyed by its upstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateProvince {
    /// Natural key, e.g. `US-NY`.
    pub code: String,
    /// Display name.
    pub name: String,
}

/// A county, keyed by its upstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct County {
    /// Natural key, e.g. `US-NY-109`.
    pub code: String,
    /// Display name.
    pub name: String,
}

/// A named place observations are reported from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locality {
    /// Externally assigned integer id (the digits of `L1234567`).
    pub id: i64,
    /// Locality type code, e.g. `H` for hotspots or `P` for personal
    /// locations.
    pub kind: String,
    /// Display name.
    pub name: String,
}

/// A registered observer. The dataset exposes nothing but the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observer {
    /// Externally assigned integer id (the digits of `obsr123456`).
    pub id: i64,
}

/// A full species from the taxonomy reference file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    /// Natural key.
    pub scientific_name: String,
    /// Primary common name.
    pub common_name: String,
    /// Position in the taxonomic sort order. High precision; two taxa may
    /// differ only in the fractional digits.
    pub taxonomic_order: Decimal,
    /// Short upstream species code, e.g. `amecro`.
    pub species_code: String,
}

/// Taxonomy category for entries below (or beside) the species level.
///
/// The integer codes are part of the stored representation and must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonCategory {
    /// Identifiable subspecific group.
    Issf,
    /// Recognisable form not tied to a subspecies.
    Form,
    /// Domestic type.
    Domestic,
    /// Unresolved pair, e.g. "Greater/Lesser Scaup".
    Slash,
    /// Intergrade between two identifiable forms.
    Intergrade,
    /// Genus-level (or broader) placeholder, e.g. "duck sp.".
    Spuh,
    /// Hybrid between two species.
    Hybrid,
}

impl TaxonCategory {
    /// Parse the category label used by the taxonomy reference file.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "issf" => Some(Self::Issf),
            "form" => Some(Self::Form),
            "domestic" => Some(Self::Domestic),
            "slash" => Some(Self::Slash),
            "intergrade" => Some(Self::Intergrade),
            "spuh" => Some(Self::Spuh),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    /// Stored integer code for the category.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Issf => 0,
            Self::Form => 1,
            Self::Domestic => 2,
            Self::Slash => 3,
            Self::Intergrade => 4,
            Self::Spuh => 5,
            Self::Hybrid => 6,
        }
    }

    /// Inverse of [`TaxonCategory::code`].
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Issf),
            1 => Some(Self::Form),
            2 => Some(Self::Domestic),
            3 => Some(Self::Slash),
            4 => Some(Self::Intergrade),
            5 => Some(Self::Spuh),
            6 => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// A taxonomy entry stored below the species tier.
///
/// Everything the taxonomy file labels with a category other than
/// `species` lands here, including spuhs and hybrids the upstream data
/// treats as top-level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSpecies {
    /// Natural key.
    pub scientific_name: String,
    /// Primary common name.
    pub common_name: String,
    /// Position in the taxonomic sort order.
    pub taxonomic_order: Decimal,
    /// Category of the entry.
    pub category: TaxonCategory,
    /// Scientific name of the parent species, when the reference file
    /// reports one.
    pub parent_species: Option<String>,
    /// Short upstream code for the entry.
    pub code: String,
}

/// A geographic point an observation event is tied to.
///
/// The id is synthetic and assigned by the store on insert; the natural
/// key is the coordinate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Store-assigned synthetic id.
    pub id: i64,
    /// WGS84 position with `x = longitude`, `y = latitude`.
    pub point: Coord<f64>,
    /// Referenced country code.
    pub country_code: String,
    /// Referenced state/province code.
    pub state_code: String,
    /// Referenced county code.
    pub county_code: String,
    /// Referenced locality id.
    pub locality_id: i64,
}

/// A [`Location`] before the store has assigned its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    /// WGS84 position with `x = longitude`, `y = latitude`.
    pub point: Coord<f64>,
    /// Referenced country code.
    pub country_code: String,
    /// Referenced state/province code.
    pub state_code: String,
    /// Referenced county code.
    pub county_code: String,
    /// Referenced locality id.
    pub locality_id: i64,
}

impl NewLocation {
    /// Attach the store-assigned id, producing the persisted form.
    #[must_use]
    pub fn with_id(self, id: i64) -> Location {
        Location {
            id,
            point: self.point,
            country_code: self.country_code,
            state_code: self.state_code,
            county_code: self.county_code,
            locality_id: self.locality_id,
        }
    }
}

/// A sampling event: one outing reported by one observer (or group).
#[derive(Debug, Clone, PartialEq)]
pub struct Checklist {
    /// Upstream id (the digits of `S1234567`).
    pub id: i64,
    /// Referenced location.
    pub location_id: i64,
    /// Start of the outing; absent when the source row carried neither a
    /// date nor a time.
    pub started_at: Option<NaiveDateTime>,
    /// Free-text trip comments.
    pub comments: String,
    /// Reported effort duration.
    pub duration: Option<Duration>,
    /// Distance covered, in kilometres.
    pub distance_km: Option<Decimal>,
    /// Area covered, in hectares.
    pub area_ha: Option<Decimal>,
    /// Number of observers in the party.
    pub observer_count: Option<i64>,
    /// Whether all species seen were reported.
    pub complete: bool,
    /// Shared-outing group id (the digits of `G1234567`).
    pub group_id: Option<i64>,
    /// Whether the checklist passed review.
    pub approved: bool,
    /// Whether the checklist was flagged for review.
    pub reviewed: bool,
    /// Reviewer-supplied reason text.
    pub reason: String,
    /// Two-character survey protocol code.
    pub protocol_code: String,
    /// Portal or project the checklist was submitted through.
    pub project_code: String,
}

/// A single taxon reported on a checklist.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Upstream id (the digits at the end of the URN identifier).
    pub id: i64,
    /// Number of individuals, when the observer gave one.
    pub count: Option<i64>,
    /// True when the source reported presence without a count.
    pub count_indeterminate: bool,
    /// Free-text age and sex breakdown.
    pub age_sex: String,
    /// Free-text species comments.
    pub comments: Option<String>,
    /// Referenced species scientific name. At most one of `species` and
    /// `subspecies` is populated.
    pub species: Option<String>,
    /// Referenced subspecies scientific name.
    pub subspecies: Option<String>,
    /// Referenced checklist.
    pub checklist_id: i64,
    /// Referenced observer, when the source row named one.
    pub observer_id: Option<i64>,
    /// Upstream last-edit timestamp.
    pub last_edited_at: Option<NaiveDateTime>,
    /// Whether media is attached upstream.
    pub has_media: bool,
}
