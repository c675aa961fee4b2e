//! SQLite implementation of the [`EntityStore`] persistence boundary.
//!
//! One connection, one writer. Batch boundaries map to plain
//! `BEGIN`/`COMMIT`; every insert runs inside its own savepoint so a
//! natural-key collision rolls back the failed statement without
//! disturbing the rows already staged in the enclosing batch.

use std::collections::HashSet;
use std::path::Path;

use chrono::Duration;
use rusqlite::{Connection, OptionalExtension, Params, ffi, params};
use rust_decimal::Decimal;

use crate::entity::{
    Checklist, Country, County, Locality, NewLocation, Observation, Observer, Species,
    StateProvince, SubSpecies, TaxonCategory,
};
use crate::store::{EntityStore, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS country (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS state_province (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS county (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS locality (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS observer (
        id INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS species (
        scientific_name TEXT PRIMARY KEY,
        common_name TEXT NOT NULL,
        taxonomic_order TEXT NOT NULL,
        species_code TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS subspecies (
        scientific_name TEXT PRIMARY KEY,
        common_name TEXT NOT NULL,
        taxonomic_order TEXT NOT NULL,
        category INTEGER NOT NULL,
        parent_species TEXT REFERENCES species (scientific_name),
        code TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS location (
        id INTEGER PRIMARY KEY,
        lon REAL NOT NULL,
        lat REAL NOT NULL,
        country_code TEXT NOT NULL REFERENCES country (code),
        state_code TEXT NOT NULL REFERENCES state_province (code),
        county_code TEXT NOT NULL REFERENCES county (code),
        locality_id INTEGER NOT NULL REFERENCES locality (id),
        UNIQUE (lon, lat)
    );
    CREATE TABLE IF NOT EXISTS checklist (
        id INTEGER PRIMARY KEY,
        location_id INTEGER NOT NULL REFERENCES location (id),
        started_at TEXT,
        comments TEXT NOT NULL,
        duration_minutes INTEGER,
        distance_km TEXT,
        area_ha TEXT,
        observer_count INTEGER,
        complete INTEGER NOT NULL,
        group_id INTEGER,
        approved INTEGER NOT NULL,
        reviewed INTEGER NOT NULL,
        reason TEXT NOT NULL,
        protocol_code TEXT NOT NULL,
        project_code TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS observation (
        id INTEGER PRIMARY KEY,
        count INTEGER,
        count_indeterminate INTEGER NOT NULL,
        age_sex TEXT NOT NULL,
        comments TEXT,
        species TEXT REFERENCES species (scientific_name),
        subspecies TEXT REFERENCES subspecies (scientific_name),
        checklist_id INTEGER NOT NULL REFERENCES checklist (id),
        observer_id INTEGER REFERENCES observer (id),
        last_edited_at TEXT,
        has_media INTEGER NOT NULL
    );
";

/// [`EntityStore`] backed by a single SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the supplied path, initialising
    /// the schema and enabling foreign keys.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::initialise(connection)
    }

    /// Open an in-memory database. Used by tests that do not care about
    /// durability.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialise(Connection::open_in_memory()?)
    }

    fn initialise(connection: Connection) -> Result<Self, StoreError> {
        connection.pragma_update(None, "foreign_keys", true)?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self { connection })
    }

    /// Execute an insert inside a savepoint, mapping natural-key
    /// collisions to [`StoreError::UniqueViolation`] and returning the
    /// rowid of the inserted row otherwise.
    fn guarded_insert<P: Params>(&mut self, sql: &str, params: P) -> Result<i64, StoreError> {
        self.connection.execute_batch("SAVEPOINT dedup_insert")?;
        match self.connection.execute(sql, params) {
            Ok(_) => {
                self.connection.execute_batch("RELEASE dedup_insert")?;
                Ok(self.connection.last_insert_rowid())
            }
            Err(source) => {
                self.connection
                    .execute_batch("ROLLBACK TO dedup_insert; RELEASE dedup_insert")?;
                Err(map_insert_error(source))
            }
        }
    }
}

/// Natural-key collisions surface as primary-key or unique-index
/// violations. Other constraint failures (foreign keys, NOT NULL) stay
/// plain database errors so they abort the run instead of triggering a
/// pointless re-query.
fn map_insert_error(source: rusqlite::Error) -> StoreError {
    match &source {
        rusqlite::Error::SqliteFailure(error, _)
            if error.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || error.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::UniqueViolation
        }
        _ => StoreError::Database(source),
    }
}

fn parse_decimal(column: &'static str, value: Option<String>) -> Result<Option<Decimal>, StoreError> {
    value
        .map(|text| {
            text.parse()
                .map_err(|_| StoreError::Decode { column, value: text })
        })
        .transpose()
}

impl EntityStore for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch("COMMIT")?;
        Ok(())
    }

    fn find_country(&mut self, code: &str) -> Result<Option<Country>, StoreError> {
        let record = self
            .connection
            .query_row(
                "SELECT code, name FROM country WHERE code = ?1",
                [code],
                |row| {
                    Ok(Country {
                        code: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_country(&mut self, record: &Country) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO country (code, name) VALUES (?1, ?2)",
            params![record.code, record.name],
        )
        .map(|_| ())
    }

    fn find_state_province(&mut self, code: &str) -> Result<Option<StateProvince>, StoreError> {
        let record = self
            .connection
            .query_row(
                "SELECT code, name FROM state_province WHERE code = ?1",
                [code],
                |row| {
                    Ok(StateProvince {
                        code: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_state_province(&mut self, record: &StateProvince) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO state_province (code, name) VALUES (?1, ?2)",
            params![record.code, record.name],
        )
        .map(|_| ())
    }

    fn find_county(&mut self, code: &str) -> Result<Option<County>, StoreError> {
        let record = self
            .connection
            .query_row(
                "SELECT code, name FROM county WHERE code = ?1",
                [code],
                |row| {
                    Ok(County {
                        code: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_county(&mut self, record: &County) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO county (code, name) VALUES (?1, ?2)",
            params![record.code, record.name],
        )
        .map(|_| ())
    }

    fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError> {
        let record = self
            .connection
            .query_row(
                "SELECT id, kind, name FROM locality WHERE id = ?1",
                [id],
                |row| {
                    Ok(Locality {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_locality(&mut self, record: &Locality) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO locality (id, kind, name) VALUES (?1, ?2, ?3)",
            params![record.id, record.kind, record.name],
        )
        .map(|_| ())
    }

    fn find_observer(&mut self, id: i64) -> Result<Option<Observer>, StoreError> {
        let record = self
            .connection
            .query_row("SELECT id FROM observer WHERE id = ?1", [id], |row| {
                Ok(Observer { id: row.get(0)? })
            })
            .optional()?;
        Ok(record)
    }

    fn insert_observer(&mut self, record: &Observer) -> Result<(), StoreError> {
        self.guarded_insert("INSERT INTO observer (id) VALUES (?1)", params![record.id])
            .map(|_| ())
    }

    fn find_species(&mut self, scientific_name: &str) -> Result<Option<Species>, StoreError> {
        let raw = self
            .connection
            .query_row(
                "SELECT scientific_name, common_name, taxonomic_order, species_code
                 FROM species WHERE scientific_name = ?1",
                [scientific_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        raw.map(|(scientific_name, common_name, order, species_code)| {
            let taxonomic_order = parse_decimal("taxonomic_order", Some(order))?
                .unwrap_or_default();
            Ok(Species {
                scientific_name,
                common_name,
                taxonomic_order,
                species_code,
            })
        })
        .transpose()
    }

    fn insert_species(&mut self, record: &Species) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO species (scientific_name, common_name, taxonomic_order, species_code)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.scientific_name,
                record.common_name,
                record.taxonomic_order.to_string(),
                record.species_code,
            ],
        )
        .map(|_| ())
    }

    fn find_subspecies(
        &mut self,
        scientific_name: &str,
    ) -> Result<Option<SubSpecies>, StoreError> {
        let raw = self
            .connection
            .query_row(
                "SELECT scientific_name, common_name, taxonomic_order, category,
                        parent_species, code
                 FROM subspecies WHERE scientific_name = ?1",
                [scientific_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        raw.map(
            |(scientific_name, common_name, order, category, parent_species, code)| {
                let taxonomic_order = parse_decimal("taxonomic_order", Some(order))?
                    .unwrap_or_default();
                let category =
                    TaxonCategory::from_code(category).ok_or(StoreError::Decode {
                        column: "category",
                        value: category.to_string(),
                    })?;
                Ok(SubSpecies {
                    scientific_name,
                    common_name,
                    taxonomic_order,
                    category,
                    parent_species,
                    code,
                })
            },
        )
        .transpose()
    }

    fn insert_subspecies(&mut self, record: &SubSpecies) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO subspecies
                 (scientific_name, common_name, taxonomic_order, category, parent_species, code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.scientific_name,
                record.common_name,
                record.taxonomic_order.to_string(),
                record.category.code(),
                record.parent_species,
                record.code,
            ],
        )
        .map(|_| ())
    }

    fn subspecies_names(&mut self) -> Result<HashSet<String>, StoreError> {
        let mut statement = self
            .connection
            .prepare("SELECT scientific_name FROM subspecies")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    fn find_location_id(&mut self, lon: f64, lat: f64) -> Result<Option<i64>, StoreError> {
        let id = self
            .connection
            .query_row(
                "SELECT id FROM location WHERE lon = ?1 AND lat = ?2",
                params![lon, lat],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_location(&mut self, record: &NewLocation) -> Result<i64, StoreError> {
        self.guarded_insert(
            "INSERT INTO location (lon, lat, country_code, state_code, county_code, locality_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.point.x,
                record.point.y,
                record.country_code,
                record.state_code,
                record.county_code,
                record.locality_id,
            ],
        )
    }

    fn find_checklist(&mut self, id: i64) -> Result<Option<Checklist>, StoreError> {
        let raw = self
            .connection
            .query_row(
                "SELECT id, location_id, started_at, comments, duration_minutes, distance_km,
                        area_ha, observer_count, complete, group_id, approved, reviewed,
                        reason, protocol_code, project_code
                 FROM checklist WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<chrono::NaiveDateTime>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, bool>(8)?,
                        row.get::<_, Option<i64>>(9)?,
                        row.get::<_, bool>(10)?,
                        row.get::<_, bool>(11)?,
                        row.get::<_, String>(12)?,
                        row.get::<_, String>(13)?,
                        row.get::<_, String>(14)?,
                    ))
                },
            )
            .optional()?;
        raw.map(
            |(
                id,
                location_id,
                started_at,
                comments,
                duration_minutes,
                distance_km,
                area_ha,
                observer_count,
                complete,
                group_id,
                approved,
                reviewed,
                reason,
                protocol_code,
                project_code,
            )| {
                Ok(Checklist {
                    id,
                    location_id,
                    started_at,
                    comments,
                    duration: duration_minutes.map(Duration::minutes),
                    distance_km: parse_decimal("distance_km", distance_km)?,
                    area_ha: parse_decimal("area_ha", area_ha)?,
                    observer_count,
                    complete,
                    group_id,
                    approved,
                    reviewed,
                    reason,
                    protocol_code,
                    project_code,
                })
            },
        )
        .transpose()
    }

    fn insert_checklist(&mut self, record: &Checklist) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO checklist
                 (id, location_id, started_at, comments, duration_minutes, distance_km, area_ha,
                  observer_count, complete, group_id, approved, reviewed, reason, protocol_code,
                  project_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.id,
                record.location_id,
                record.started_at,
                record.comments,
                record.duration.map(|d| d.num_minutes()),
                record.distance_km.map(|d| d.to_string()),
                record.area_ha.map(|d| d.to_string()),
                record.observer_count,
                record.complete,
                record.group_id,
                record.approved,
                record.reviewed,
                record.reason,
                record.protocol_code,
                record.project_code,
            ],
        )
        .map(|_| ())
    }

    fn find_observation(&mut self, id: i64) -> Result<Option<Observation>, StoreError> {
        let record = self
            .connection
            .query_row(
                "SELECT id, count, count_indeterminate, age_sex, comments, species, subspecies,
                        checklist_id, observer_id, last_edited_at, has_media
                 FROM observation WHERE id = ?1",
                [id],
                |row| {
                    Ok(Observation {
                        id: row.get(0)?,
                        count: row.get(1)?,
                        count_indeterminate: row.get(2)?,
                        age_sex: row.get(3)?,
                        comments: row.get(4)?,
                        species: row.get(5)?,
                        subspecies: row.get(6)?,
                        checklist_id: row.get(7)?,
                        observer_id: row.get(8)?,
                        last_edited_at: row.get(9)?,
                        has_media: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_observation(&mut self, record: &Observation) -> Result<(), StoreError> {
        self.guarded_insert(
            "INSERT INTO observation
                 (id, count, count_indeterminate, age_sex, comments, species, subspecies,
                  checklist_id, observer_id, last_edited_at, has_media)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.count,
                record.count_indeterminate,
                record.age_sex,
                record.comments,
                record.species,
                record.subspecies,
                record.checklist_id,
                record.observer_id,
                record.last_edited_at,
                record.has_media,
            ],
        )
        .map(|_| ())
    }
}
