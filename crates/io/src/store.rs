// Locality record store using SQLite
//
// Three tables keyed by natural keys: locality by OKTMO code, economic data by
// (locality, year), infrastructure one-to-one with locality. The batch commit
// upserts all three inside a single write transaction.

use std::fmt;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

use gorodindex_recon::{EnrichedCity, InfrastructureCounts};

use crate::STORE_SCHEMA_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locality (
    id INTEGER PRIMARY KEY,
    city TEXT NOT NULL,
    region TEXT NOT NULL DEFAULT '',
    population INTEGER NOT NULL CHECK (population >= 1),
    oktmo_code TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS economic_data (
    id INTEGER PRIMARY KEY,
    locality_id INTEGER NOT NULL REFERENCES locality(id) ON DELETE CASCADE,
    year INTEGER NOT NULL,
    ndfl_total INTEGER NOT NULL,
    unemployment_rate REAL,           -- NULL when no region rate matched
    UNIQUE (locality_id, year)
);

CREATE TABLE IF NOT EXISTS infrastructure_data (
    id INTEGER PRIMARY KEY,
    locality_id INTEGER NOT NULL UNIQUE REFERENCES locality(id) ON DELETE CASCADE,
    schools INTEGER NOT NULL DEFAULT 0 CHECK (schools >= 0),
    gas_stations INTEGER NOT NULL DEFAULT 0 CHECK (gas_stations >= 0),
    bus_stops INTEGER NOT NULL DEFAULT 0 CHECK (bus_stops >= 0)
);

CREATE INDEX IF NOT EXISTS idx_locality_region ON locality(region);
"#;

const UPSERT_LOCALITY: &str = "
INSERT INTO locality (city, region, population, oktmo_code, is_active, updated_at)
VALUES (?1, ?2, ?3, ?4, 1, ?5)
ON CONFLICT(oktmo_code) DO UPDATE SET
    city = excluded.city,
    region = excluded.region,
    population = excluded.population,
    is_active = 1,
    updated_at = excluded.updated_at";

const UPSERT_ECONOMIC: &str = "
INSERT INTO economic_data (locality_id, year, ndfl_total, unemployment_rate)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(locality_id, year) DO UPDATE SET
    ndfl_total = excluded.ndfl_total,
    unemployment_rate = excluded.unemployment_rate";

const UPSERT_INFRASTRUCTURE: &str = "
INSERT INTO infrastructure_data (locality_id, schools, gas_stations, bus_stops)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(locality_id) DO UPDATE SET
    schools = excluded.schools,
    gas_stations = excluded.gas_stations,
    bus_stops = excluded.bus_stops";

/// Locality joined to its latest economic row (by year) and its infrastructure row.
const SELECT_VIEW: &str = "
SELECT l.oktmo_code, l.city, l.region, l.population, l.is_active,
       e.year, e.ndfl_total, e.unemployment_rate,
       i.schools, i.gas_stations, i.bus_stops
FROM locality l
LEFT JOIN economic_data e ON e.id = (
    SELECT id FROM economic_data WHERE locality_id = l.id ORDER BY year DESC LIMIT 1
)
LEFT JOIN infrastructure_data i ON i.locality_id = l.id";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    InvalidFilter(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "store error: {}", e),
            Self::InvalidFilter(msg) => write!(f, "invalid filter: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::InvalidFilter(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

// ---------------------------------------------------------------------------
// Read model
// ---------------------------------------------------------------------------

/// Consumer query over localities. All bounds inclusive.
#[derive(Debug, Clone, Default)]
pub struct LocalityFilter {
    pub region: Option<String>,
    pub population_min: Option<u32>,
    pub population_max: Option<u32>,
    pub include_inactive: bool,
}

impl LocalityFilter {
    pub fn validate(&self) -> Result<(), StoreError> {
        if let (Some(min), Some(max)) = (self.population_min, self.population_max) {
            if min > max {
                return Err(StoreError::InvalidFilter(format!(
                    "minimum population {} exceeds maximum {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicView {
    pub year: u16,
    pub ndfl_total: i64,
    pub unemployment_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalityView {
    pub oktmo: String,
    pub city: String,
    pub region: String,
    pub population: u32,
    pub is_active: bool,
    pub economics: Option<EconomicView>,
    pub infrastructure: Option<InfrastructureCounts>,
}

impl LocalityView {
    /// Revenue per resident from the latest economic row.
    pub fn ndfl_per_capita(&self) -> Option<f64> {
        let econ = self.economics.as_ref()?;
        if self.population == 0 {
            return None;
        }
        Some(econ.ndfl_total as f64 / f64::from(self.population))
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let year: Option<u16> = row.get(5)?;
        let economics = match year {
            Some(year) => Some(EconomicView {
                year,
                ndfl_total: row.get(6)?,
                unemployment_rate: row.get(7)?,
            }),
            None => None,
        };
        let schools: Option<u32> = row.get(8)?;
        let infrastructure = match schools {
            Some(schools) => Some(InfrastructureCounts {
                schools,
                gas_stations: row.get(9)?,
                bus_stops: row.get(10)?,
            }),
            None => None,
        };
        Ok(Self {
            oktmo: row.get(0)?,
            city: row.get(1)?,
            region: row.get(2)?,
            population: row.get(3)?,
            is_active: row.get(4)?,
            economics,
            infrastructure,
        })
    }
}

/// Row totals per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub localities: usize,
    pub economic_rows: usize,
    pub infrastructure_rows: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", STORE_SCHEMA_VERSION)?;
        Ok(Self { conn })
    }

    /// Upsert a batch for `year` in one immediate transaction.
    ///
    /// Either every item is written or none is. Returns the number of items.
    pub fn commit(&mut self, batch: &[EnrichedCity], year: u16) -> Result<usize, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        {
            let mut locality = tx.prepare(UPSERT_LOCALITY)?;
            let mut lookup = tx.prepare("SELECT id FROM locality WHERE oktmo_code = ?1")?;
            let mut economic = tx.prepare(UPSERT_ECONOMIC)?;
            let mut infra = tx.prepare(UPSERT_INFRASTRUCTURE)?;

            for item in batch {
                let city = &item.city;
                locality.execute(params![
                    city.name,
                    item.region_label(),
                    city.population,
                    city.oktmo,
                    now
                ])?;
                let id: i64 = lookup.query_row(params![city.oktmo], |r| r.get(0))?;

                economic.execute(params![id, year, city.ndfl_total, item.unemployment_rate])?;

                let counts = &item.infrastructure;
                infra.execute(params![id, counts.schools, counts.gas_stations, counts.bus_stops])?;
            }
        }

        tx.commit()?;
        log::debug!("committed {} localities for {}", batch.len(), year);
        Ok(batch.len())
    }

    /// Localities matching `filter`, most populous first.
    pub fn localities(&self, filter: &LocalityFilter) -> Result<Vec<LocalityView>, StoreError> {
        filter.validate()?;
        let sql = format!(
            "{SELECT_VIEW}
             WHERE (?1 OR l.is_active = 1)
               AND (?2 IS NULL OR l.region = ?2)
               AND (?3 IS NULL OR l.population >= ?3)
               AND (?4 IS NULL OR l.population <= ?4)
             ORDER BY l.population DESC, l.city"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.include_inactive,
                filter.region,
                filter.population_min,
                filter.population_max
            ],
            LocalityView::from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn locality(&self, oktmo: &str) -> Result<Option<LocalityView>, StoreError> {
        let sql = format!("{SELECT_VIEW} WHERE l.oktmo_code = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![oktmo], LocalityView::from_row)
            .optional()?)
    }

    /// Distinct non-empty regions of active localities, sorted.
    pub fn regions(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT region FROM locality WHERE is_active = 1 AND region != '' ORDER BY region",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn counts(&self) -> Result<TableCounts, StoreError> {
        let count = |table: &str| -> Result<usize, StoreError> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(n as usize)
        };
        Ok(TableCounts {
            localities: count("locality")?,
            economic_rows: count("economic_data")?,
            infrastructure_rows: count("infrastructure_data")?,
        })
    }
}
