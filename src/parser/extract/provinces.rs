use scraper::Html;

use super::{require_tables, ProvinceEntry};
use crate::error::ExtractError;
use crate::parser::cells::{body_rows, exact, row_cells, tables};

/// Parse a region's province listing. The first table is the region summary;
/// the second lists the provinces.
pub fn extract(doc: &Html) -> Result<Vec<ProvinceEntry>, ExtractError> {
    let tables = tables(doc);
    require_tables(tables.len(), "2", tables.len() == 2)?;
    body_rows(tables[1])
        .into_iter()
        .enumerate()
        .map(|(i, row)| parse_row(i, row_cells(row)))
        .collect()
}

/// Rows without an income class have four cells instead of five.
fn parse_row(row: usize, cells: Vec<String>) -> Result<ProvinceEntry, ExtractError> {
    match cells.len() {
        4 => {
            let [name, code, info, population] = exact(row, "4 or 5", cells)?;
            Ok(ProvinceEntry {
                code,
                name,
                info,
                income_class: String::new(),
                population,
            })
        }
        5 => {
            let [name, code, info, income_class, population] = exact(row, "4 or 5", cells)?;
            Ok(ProvinceEntry {
                code,
                name,
                info,
                income_class,
                population,
            })
        }
        found => Err(ExtractError::RowArityMismatch {
            row,
            expected: "4 or 5",
            found,
            cells,
        }),
    }
}
