use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{require_tables, RegionEntry};
use crate::db::RegionStats;
use crate::error::ExtractError;
use crate::parser::cells::{exact, own_text, tables};

static HEAD_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("thead > tr > th").unwrap());
static BODY_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody > tr > td").unwrap());
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Region:\s*(\S.*)").unwrap());
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Code:\s*(\S+)").unwrap());

/// The body carries a bare "Population" label next to the population figure.
const POPULATION_LABEL: &str = "Population";

/// Parse the region listing: one table per region.
pub fn extract(doc: &Html) -> Result<Vec<RegionEntry>, ExtractError> {
    let tables = tables(doc);
    require_tables(tables.len(), "at least 1", !tables.is_empty())?;
    tables
        .into_iter()
        .enumerate()
        .map(|(i, table)| parse_table(i, table))
        .collect()
}

fn parse_table(index: usize, table: ElementRef<'_>) -> Result<RegionEntry, ExtractError> {
    let head: Vec<String> = table.select(&HEAD_CELL).flat_map(own_text).collect();
    let name = capture(&NAME_RE, &head);
    let code = capture(&CODE_RE, &head);
    let (Some(name), Some(code)) = (name, code) else {
        return Err(ExtractError::MalformedHeader {
            table: index,
            text: head,
        });
    };

    let cells = strip_population_label(table.select(&BODY_CELL).flat_map(own_text).collect());
    let [provinces, cities, municipalities, barangays, population] = exact(index, "5", cells)?;

    Ok(RegionEntry {
        code,
        name,
        stats: RegionStats {
            provinces,
            cities,
            municipalities,
            barangays,
            population,
        },
    })
}

fn capture(re: &Regex, texts: &[String]) -> Option<String> {
    texts
        .iter()
        .find_map(|t| re.captures(t))
        .map(|c| c[1].trim().to_string())
}

fn strip_population_label(cells: Vec<String>) -> Vec<String> {
    cells.into_iter().filter(|c| c != POPULATION_LABEL).collect()
}
