use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::{require_tables, BarangayEntry, BarangayPage};
use crate::error::ExtractError;
use crate::parser::cells::{body_rows, exact, row_cells, tables};

static PAGER_NEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li.pager-next a").unwrap());

/// Parse one page of a city/municipality's barangay listing.
pub fn extract(doc: &Html) -> Result<BarangayPage, ExtractError> {
    let tables = tables(doc);
    require_tables(tables.len(), "2", tables.len() == 2)?;
    let entries = body_rows(tables[1])
        .into_iter()
        .enumerate()
        .map(|(i, row)| -> Result<BarangayEntry, ExtractError> {
            let [name, code, kind, population] = exact(i, "4", row_cells(row))?;
            Ok(BarangayEntry {
                code,
                name,
                kind,
                population,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BarangayPage {
        entries,
        next: next_page(doc),
    })
}

/// Raw href of the pager's "next" link, unresolved.
pub fn next_page(doc: &Html) -> Option<String> {
    doc.select(&PAGER_NEXT)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(String::from)
}
