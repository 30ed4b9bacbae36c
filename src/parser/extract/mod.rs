pub mod barangays;
pub mod citimuni;
pub mod provinces;
pub mod regions;

use crate::db::RegionStats;
use crate::error::ExtractError;

// Entries are what one page says about its rows. Parent codes and child URLs
// are not on the page; the stage runner adds them from its own context.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEntry {
    pub code: String,
    pub name: String,
    pub stats: RegionStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvinceEntry {
    pub code: String,
    pub name: String,
    pub info: String,
    pub income_class: String,
    pub population: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityMuniEntry {
    pub code: String,
    pub name: String,
    pub income_class: String,
    pub population: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarangayEntry {
    pub code: String,
    pub name: String,
    pub kind: String,
    pub population: String,
}

/// One page of a barangay listing and the raw href of the page after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarangayPage {
    pub entries: Vec<BarangayEntry>,
    pub next: Option<String>,
}

fn require_tables(found: usize, expected: &'static str, ok: bool) -> Result<(), ExtractError> {
    if ok {
        Ok(())
    } else {
        Err(ExtractError::MissingTable { expected, found })
    }
}
