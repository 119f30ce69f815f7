use thiserror::Error;

/// Failures raised by the tabular store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Dataset has no rows, or query text is blank
    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("invalid identifier: '{0}' (allowed: letters, digits, underscore)")]
    InvalidIdentifier(String),

    #[error("table '{0}' already exists")]
    AlreadyExists(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("query result is not a valid dataset: {0}")]
    MalformedResult(#[from] DatasetError),
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: duckdb::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Structural problems when building a dataset.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("invalid filters: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not decode file with any supported encoding: {}", .tried.join(", "))]
    Decoding { tried: Vec<&'static str> },

    #[error("failed to parse CSV file: {0}")]
    Parse(#[from] polars::error::PolarsError),

    #[error("CSV file is empty")]
    Empty,

    #[error("CSV file has no columns")]
    NoColumns,

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("file size ({size_mb:.1}MB) exceeds maximum ({max_mb}MB)")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// A store failure during one KPI's primary/secondary attempt sequence.
#[derive(Debug, Error)]
#[error("failed to calculate KPI {kpi}: {source}")]
pub struct KpiError {
    pub kpi: u8,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
