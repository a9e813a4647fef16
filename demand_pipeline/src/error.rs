use thiserror::Error;

use crate::models::Zone;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures surfaced by the ingestion pipeline.
///
/// Structural variants are fatal for one file only; batch callers skip the
/// file and keep going. Cell-level coercion problems never show up here,
/// they become missing values.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not find the header row in {file}")]
    HeaderNotFound { file: String },

    #[error("no SIN/BCA/BCS columns in {file}; columns: {columns:?}")]
    NoZoneColumns { file: String, columns: Vec<String> },

    #[error("no demand balance column in {file}; columns: {columns:?}")]
    DemandColumnNotFound { file: String, columns: Vec<String> },

    #[error("could not extract a YYYY-MM-DD date from file name {file}")]
    DateExtractionError { file: String },

    #[error("missing required columns {missing:?} in {file}")]
    MissingColumns { file: String, missing: Vec<String> },

    #[error("unsupported input {file}: expected .csv or .parquet")]
    UnsupportedInput { file: String },

    #[error("fetch failed for {system}: {source}")]
    FetchFailed {
        system: Zone,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("stored table {file} is not a valid hourly table: {reason}")]
    CorruptTable { file: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl IngestError {
    /// File identifier for per-file failures, if the variant carries one.
    pub fn file(&self) -> Option<&str> {
        match self {
            IngestError::HeaderNotFound { file }
            | IngestError::NoZoneColumns { file, .. }
            | IngestError::DemandColumnNotFound { file, .. }
            | IngestError::DateExtractionError { file }
            | IngestError::MissingColumns { file, .. }
            | IngestError::UnsupportedInput { file } => Some(file),
            _ => None,
        }
    }
}
