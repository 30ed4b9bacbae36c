use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS regions (
            position           INTEGER PRIMARY KEY,
            code               TEXT UNIQUE NOT NULL,
            name               TEXT NOT NULL,
            provinces          TEXT NOT NULL,
            cities             TEXT NOT NULL,
            municipalities     TEXT NOT NULL,
            barangays          TEXT NOT NULL,
            population         TEXT NOT NULL,
            provinces_url      TEXT NOT NULL,
            citimuni_url       TEXT NOT NULL,
            barangays_url      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provinces (
            position           INTEGER PRIMARY KEY,
            code               TEXT UNIQUE NOT NULL,
            name               TEXT NOT NULL,
            region_code        TEXT NOT NULL,
            info               TEXT NOT NULL,
            income_class       TEXT NOT NULL,
            population         TEXT NOT NULL,
            provinces_url      TEXT NOT NULL,
            citimuni_url       TEXT NOT NULL,
            barangays_url      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provinces_region ON provinces(region_code);

        CREATE TABLE IF NOT EXISTS citimuni (
            position           INTEGER PRIMARY KEY,
            code               TEXT UNIQUE NOT NULL,
            name               TEXT NOT NULL,
            region_code        TEXT NOT NULL,
            province_code      TEXT NOT NULL,
            income_class       TEXT NOT NULL,
            population         TEXT NOT NULL,
            provinces_url      TEXT NOT NULL,
            citimuni_url       TEXT NOT NULL,
            barangays_url      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_citimuni_province ON citimuni(province_code);

        CREATE TABLE IF NOT EXISTS barangays (
            position           INTEGER PRIMARY KEY,
            code               TEXT UNIQUE NOT NULL,
            name               TEXT NOT NULL,
            region_code        TEXT NOT NULL,
            province_code      TEXT NOT NULL,
            citimuni_code      TEXT NOT NULL,
            type               TEXT NOT NULL,
            population         TEXT NOT NULL,
            provinces_url      TEXT NOT NULL,
            citimuni_url       TEXT NOT NULL,
            barangays_url      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_barangays_citimuni ON barangays(citimuni_code);

        -- One row per level, written in the same transaction as the snapshot
        CREATE TABLE IF NOT EXISTS stage_runs (
            level              TEXT PRIMARY KEY,
            records            INTEGER NOT NULL,
            completed_at       TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Levels ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Level {
    #[value(name = "regions")]
    Region,
    #[value(name = "provinces")]
    Province,
    #[value(name = "citimuni")]
    CityMunicipality,
    #[value(name = "barangays")]
    Barangay,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Region,
        Level::Province,
        Level::CityMunicipality,
        Level::Barangay,
    ];

    /// Table name, also used as the export file stem.
    pub fn table(self) -> &'static str {
        match self {
            Level::Region => "regions",
            Level::Province => "provinces",
            Level::CityMunicipality => "citimuni",
            Level::Barangay => "barangays",
        }
    }

    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Region => None,
            Level::Province => Some(Level::Region),
            Level::CityMunicipality => Some(Level::Province),
            Level::Barangay => Some(Level::CityMunicipality),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ── Records ──

/// Listing URLs for the children of one administrative unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildUrls {
    pub provinces: String,
    pub citimuni: String,
    pub barangays: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub provinces: String,
    pub cities: String,
    pub municipalities: String,
    pub barangays: String,
    pub population: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub name: String,
    #[serde(rename = "url")]
    pub urls: ChildUrls,
    pub stats: RegionStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    pub code: String,
    pub name: String,
    pub region_code: String,
    pub info: String,
    /// Empty when the source row has no income class column.
    pub income_class: String,
    #[serde(rename = "stats", with = "population_stats")]
    pub population: String,
    #[serde(rename = "url")]
    pub urls: ChildUrls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityMunicipality {
    pub code: String,
    pub name: String,
    pub region_code: String,
    pub province_code: String,
    pub income_class: String,
    #[serde(rename = "stats", with = "population_stats")]
    pub population: String,
    #[serde(rename = "url")]
    pub urls: ChildUrls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barangay {
    pub code: String,
    pub name: String,
    pub region_code: String,
    pub province_code: String,
    pub citimuni_code: String,
    /// Urban/rural classifier.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "stats", with = "population_stats")]
    pub population: String,
    #[serde(rename = "url")]
    pub urls: ChildUrls,
}

/// Per-unit population, nested as `"stats": {"population": ..}` in the JSON
/// feed the way region stats are.
mod population_stats {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Stats<T> {
        population: T,
    }

    pub fn serialize<S: Serializer>(population: &str, serializer: S) -> Result<S::Ok, S::Error> {
        Stats { population }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Stats::<String>::deserialize(deserializer).map(|s| s.population)
    }
}

/// A record type that owns one level's snapshot table.
pub trait Record: Sized {
    const LEVEL: Level;
    const COLUMNS: &'static [&'static str];

    fn code(&self) -> &str;

    /// Ancestor codes, root first. Empty for regions.
    fn lineage(&self) -> Vec<&str>;

    /// Column values in `COLUMNS` order.
    fn values(&self) -> Vec<&dyn ToSql>;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl Record for Region {
    const LEVEL: Level = Level::Region;
    const COLUMNS: &'static [&'static str] = &[
        "code", "name", "provinces", "cities", "municipalities", "barangays", "population",
        "provinces_url", "citimuni_url", "barangays_url",
    ];

    fn code(&self) -> &str {
        &self.code
    }

    fn lineage(&self) -> Vec<&str> {
        Vec::new()
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        let s = &self.stats;
        vec![
            &self.code, &self.name, &s.provinces, &s.cities, &s.municipalities, &s.barangays,
            &s.population, &self.urls.provinces, &self.urls.citimuni, &self.urls.barangays,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Region {
            code: row.get(0)?,
            name: row.get(1)?,
            stats: RegionStats {
                provinces: row.get(2)?,
                cities: row.get(3)?,
                municipalities: row.get(4)?,
                barangays: row.get(5)?,
                population: row.get(6)?,
            },
            urls: ChildUrls {
                provinces: row.get(7)?,
                citimuni: row.get(8)?,
                barangays: row.get(9)?,
            },
        })
    }
}

impl Record for Province {
    const LEVEL: Level = Level::Province;
    const COLUMNS: &'static [&'static str] = &[
        "code", "name", "region_code", "info", "income_class", "population",
        "provinces_url", "citimuni_url", "barangays_url",
    ];

    fn code(&self) -> &str {
        &self.code
    }

    fn lineage(&self) -> Vec<&str> {
        vec![&self.region_code]
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.code, &self.name, &self.region_code, &self.info, &self.income_class,
            &self.population, &self.urls.provinces, &self.urls.citimuni, &self.urls.barangays,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Province {
            code: row.get(0)?,
            name: row.get(1)?,
            region_code: row.get(2)?,
            info: row.get(3)?,
            income_class: row.get(4)?,
            population: row.get(5)?,
            urls: ChildUrls {
                provinces: row.get(6)?,
                citimuni: row.get(7)?,
                barangays: row.get(8)?,
            },
        })
    }
}

impl Record for CityMunicipality {
    const LEVEL: Level = Level::CityMunicipality;
    const COLUMNS: &'static [&'static str] = &[
        "code", "name", "region_code", "province_code", "income_class", "population",
        "provinces_url", "citimuni_url", "barangays_url",
    ];

    fn code(&self) -> &str {
        &self.code
    }

    fn lineage(&self) -> Vec<&str> {
        vec![&self.region_code, &self.province_code]
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.code, &self.name, &self.region_code, &self.province_code, &self.income_class,
            &self.population, &self.urls.provinces, &self.urls.citimuni, &self.urls.barangays,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CityMunicipality {
            code: row.get(0)?,
            name: row.get(1)?,
            region_code: row.get(2)?,
            province_code: row.get(3)?,
            income_class: row.get(4)?,
            population: row.get(5)?,
            urls: ChildUrls {
                provinces: row.get(6)?,
                citimuni: row.get(7)?,
                barangays: row.get(8)?,
            },
        })
    }
}

impl Record for Barangay {
    const LEVEL: Level = Level::Barangay;
    const COLUMNS: &'static [&'static str] = &[
        "code", "name", "region_code", "province_code", "citimuni_code", "type", "population",
        "provinces_url", "citimuni_url", "barangays_url",
    ];

    fn code(&self) -> &str {
        &self.code
    }

    fn lineage(&self) -> Vec<&str> {
        vec![&self.region_code, &self.province_code, &self.citimuni_code]
    }

    fn values(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.code, &self.name, &self.region_code, &self.province_code, &self.citimuni_code,
            &self.kind, &self.population, &self.urls.provinces, &self.urls.citimuni,
            &self.urls.barangays,
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Barangay {
            code: row.get(0)?,
            name: row.get(1)?,
            region_code: row.get(2)?,
            province_code: row.get(3)?,
            citimuni_code: row.get(4)?,
            kind: row.get(5)?,
            population: row.get(6)?,
            urls: ChildUrls {
                provinces: row.get(7)?,
                citimuni: row.get(8)?,
                barangays: row.get(9)?,
            },
        })
    }
}

// ── Snapshots ──

/// Replace the level's snapshot with `records`, all or nothing.
pub fn save<R: Record>(conn: &Connection, records: &[R]) -> Result<usize> {
    let table = R::LEVEL.table();
    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DELETE FROM {}", table), [])?;
    {
        let placeholders = (1..=R::COLUMNS.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (position, {}) VALUES ({})",
            table,
            R::COLUMNS.join(", "),
            placeholders
        ))?;
        for (i, record) in records.iter().enumerate() {
            let position = i as i64;
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(R::COLUMNS.len() + 1);
            values.push(&position);
            values.extend(record.values());
            stmt.execute(values.as_slice())
                .with_context(|| format!("Failed to insert {} {}", R::LEVEL, record.code()))?;
        }
    }
    tx.execute(
        "INSERT OR REPLACE INTO stage_runs (level, records, completed_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![table, records.len() as i64, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    Ok(records.len())
}

/// Read the level's snapshot back in saved order.
pub fn load<R: Record>(conn: &Connection) -> Result<Vec<R>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY position",
        R::COLUMNS.join(", "),
        R::LEVEL.table()
    ))?;
    let rows = stmt
        .query_map([], |row| R::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stage runs ──

pub struct StageRun {
    pub level: String,
    pub records: usize,
    pub completed_at: String,
}

pub fn stage_run(conn: &Connection, level: Level) -> Result<Option<StageRun>> {
    let run = conn
        .query_row(
            "SELECT level, records, completed_at FROM stage_runs WHERE level = ?1",
            [level.table()],
            |row| {
                Ok(StageRun {
                    level: row.get(0)?,
                    records: row.get(1)?,
                    completed_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(run)
}
