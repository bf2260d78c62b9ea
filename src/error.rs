use thiserror::Error;

use crate::models::OutputRow;

/// Failures talking to the invoicing portal. All of them end the run.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not logged in; call login() first")]
    NotAuthenticated,

    /// No refresh flow exists; a rejected token stops the pull.
    #[error("access token rejected or expired (HTTP {0})")]
    TokenExpired(u16),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A pull that stopped part way. `rows` holds everything flattened before
/// the failing page and must be treated as incomplete.
#[derive(Error, Debug)]
#[error("fetch aborted on page {page} after {} rows", .rows.len())]
pub struct FetchAborted {
    pub page: u32,
    pub rows: Vec<OutputRow>,
    #[source]
    pub source: ApiError,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing setting `{0}` (set UBOT_{1})")]
    Missing(&'static str, &'static str),

    #[error("page_size must be between 1 and {max}, got {got}")]
    PageSize { got: u32, max: u32 },

    #[error("row limit must be at least 1")]
    ZeroLimit,

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// A CSV record the importer skipped. Counted, logged, never fatal.
#[derive(Error, Debug)]
pub enum MalformedRow {
    #[error("unreadable record: {0}")]
    Csv(#[from] csv::Error),

    #[error("unparsable invoice date {0:?}")]
    Date(String),

    #[error("insert failed: {0}")]
    Insert(#[from] rusqlite::Error),
}
