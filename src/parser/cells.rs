use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::error::ExtractError;

static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table#classifytable").unwrap());
static BODY_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tbody > tr").unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static CELL_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td > a").unwrap());
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+|\d{1,3}(?:,\d{3})+)$").unwrap());

/// Every catalog table on the page, in document order.
pub fn tables(doc: &Html) -> Vec<ElementRef<'_>> {
    doc.select(&TABLE).collect()
}

pub fn body_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    table.select(&BODY_ROW).collect()
}

/// Direct text children of an element, whitespace-collapsed, empties dropped.
/// Text inside nested elements (links, bold labels) is not included.
pub fn own_text(el: ElementRef<'_>) -> Vec<String> {
    el.children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Cells of a listing row: linked texts first, then plain cell texts.
///
/// The name column is the only one wrapped in a link, so this ordering puts it
/// back in front of the rest.
pub fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    let linked = row.select(&CELL_LINK).flat_map(own_text);
    let plain = row.select(&CELL).flat_map(own_text);
    linked.chain(plain).collect()
}

/// Convert a fixed-arity row into an array, or report what was found.
pub fn exact<const N: usize>(
    row: usize,
    expected: &'static str,
    cells: Vec<String>,
) -> Result<[String; N], ExtractError> {
    <[String; N]>::try_from(cells).map_err(|cells| ExtractError::RowArityMismatch {
        row,
        expected,
        found: cells.len(),
        cells,
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{raw:?} is not a well-formed count")]
pub struct CountError {
    pub raw: String,
}

/// Parse a population or child-count cell such as `"5,301,139"`.
///
/// Only plain digits or comma groups of three are accepted; anything else is
/// an error rather than a best guess.
pub fn parse_count(raw: &str) -> Result<u64, CountError> {
    let trimmed = raw.trim();
    if !COUNT_RE.is_match(trimmed) {
        return Err(CountError { raw: raw.to_string() });
    }
    trimmed
        .replace(',', "")
        .parse()
        .map_err(|_| CountError { raw: raw.to_string() })
}
