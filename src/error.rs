use thiserror::Error;

use crate::db::Level;

/// Transport-level failure from the document fetcher.
///
/// A page that loads fine but carries no rows is not an error; only a missing
/// or unusable response is.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// A page whose table markup does not have the shape its level expects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("table {table}: header does not match `Region: <name>` / `Code: <code>` (got {text:?})")]
    MalformedHeader { table: usize, text: Vec<String> },
    #[error("row {row}: expected {expected} cells, found {found} ({cells:?})")]
    RowArityMismatch {
        row: usize,
        expected: &'static str,
        found: usize,
        cells: Vec<String>,
    },
    #[error("expected {expected} tables, found {found}")]
    MissingTable { expected: &'static str, found: usize },
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{level} stage, parent {parent}, page {page}: {source}")]
    Transport {
        level: Level,
        parent: String,
        page: usize,
        #[source]
        source: FetchError,
    },
    #[error("{level} stage, parent {parent}, page {page} ({url}): {source}")]
    Extract {
        level: Level,
        parent: String,
        page: usize,
        url: String,
        #[source]
        source: ExtractError,
    },
    #[error("{level} stage, parent {parent}: next-page link {url} was already visited")]
    PaginationLoop {
        level: Level,
        parent: String,
        url: String,
    },
    #[error("{level} stage, parent {parent}: more than {limit} pages")]
    PageLimit {
        level: Level,
        parent: String,
        limit: usize,
    },
    #[error("{level} stage, parent {parent}: cannot resolve link {href:?} against {base}")]
    BadLink {
        level: Level,
        parent: String,
        base: String,
        href: String,
    },
    #[error("{level} {code}: parent {parent_level} {parent_code} not found or lineage differs")]
    ReferentialGap {
        level: Level,
        code: String,
        parent_level: Level,
        parent_code: String,
    },
    #[error("{level} code {code} appears more than once")]
    DuplicateCode { level: Level, code: String },
    #[error("{level} stage needs {parent_level} records, but that stage has not completed")]
    MissingInput { level: Level, parent_level: Level },
    #[error("{level} stage worker failed: {message}")]
    Worker { level: Level, message: String },
}
