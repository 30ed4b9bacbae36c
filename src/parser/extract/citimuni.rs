use scraper::Html;

use super::{require_tables, CityMuniEntry};
use crate::error::ExtractError;
use crate::parser::cells::{body_rows, exact, row_cells, tables};

/// Parse a province's city/municipality listing.
///
/// Cities and municipalities may come in separate tables; every table after
/// the leading summary contributes rows, in document order.
pub fn extract(doc: &Html) -> Result<Vec<CityMuniEntry>, ExtractError> {
    let tables = tables(doc);
    require_tables(tables.len(), "at least 1", !tables.is_empty())?;
    tables[1..]
        .iter()
        .flat_map(|table| body_rows(*table))
        .enumerate()
        .map(|(i, row)| -> Result<CityMuniEntry, ExtractError> {
            let [name, code, income_class, population] = exact(i, "4", row_cells(row))?;
            Ok(CityMuniEntry {
                code,
                name,
                income_class,
                population,
            })
        })
        .collect()
}
