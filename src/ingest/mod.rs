use encoding_rs::{UTF_8, WINDOWS_1252};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, info};

use crate::dataset::{Column, Scalar, TabularDataset};
use crate::error::IngestError;

/// Rows scanned for CSV schema inference
const INFER_SCHEMA_ROWS: usize = 1000;

/// Text encodings tried, in order, when decoding an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Iso8859_1,
    Cp1252,
}

impl TextEncoding {
    pub const FALLBACK_ORDER: [TextEncoding; 4] = [
        TextEncoding::Utf8,
        TextEncoding::Latin1,
        TextEncoding::Iso8859_1,
        TextEncoding::Cp1252,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Iso8859_1 => "iso-8859-1",
            TextEncoding::Cp1252 => "cp1252",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => UTF_8
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
            // ISO-8859-1 maps every byte to the code point of the same value
            TextEncoding::Latin1 | TextEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&b| char::from(b)).collect())
            }
            TextEncoding::Cp1252 => WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
        }
    }
}

/// Decode raw upload bytes, first matching encoding wins.
pub fn decode_bytes(bytes: &[u8]) -> Result<(String, TextEncoding), IngestError> {
    for encoding in TextEncoding::FALLBACK_ORDER {
        if let Some(text) = encoding.decode(bytes) {
            debug!("Decoded {} bytes as {}", bytes.len(), encoding.label());
            let text = match text.strip_prefix('\u{feff}') {
                Some(stripped) => stripped.to_string(),
                None => text,
            };
            return Ok((text, encoding));
        }
    }
    Err(IngestError::Decoding {
        tried: TextEncoding::FALLBACK_ORDER.iter().map(|e| e.label()).collect(),
    })
}

/// Which copy of a duplicated row survives deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    #[default]
    First,
    Last,
    /// Drop every row that has a duplicate
    None,
}

impl DedupStrategy {
    fn keep(self) -> UniqueKeepStrategy {
        match self {
            DedupStrategy::First => UniqueKeepStrategy::First,
            DedupStrategy::Last => UniqueKeepStrategy::Last,
            DedupStrategy::None => UniqueKeepStrategy::None,
        }
    }
}

/// Parse CSV text with a header row into a polars frame.
pub fn read_csv(text: &str) -> Result<DataFrame, IngestError> {
    let cursor = Cursor::new(text.as_bytes().to_vec());
    let df = CsvReader::new(cursor)
        .has_header(true)
        .infer_schema(Some(INFER_SCHEMA_ROWS))
        .finish()?;
    Ok(df)
}

/// Remove duplicate rows, preserving the original row order.
///
/// With a non-empty `subset` only those columns (matched case-insensitively)
/// decide whether two rows are duplicates.
pub fn deduplicate(df: &DataFrame, strategy: DedupStrategy, subset: &[String]) -> Result<DataFrame, IngestError> {
    if subset.is_empty() {
        return Ok(df.unique_stable(None, strategy.keep(), None)?);
    }

    let names = df.get_column_names();
    let mut resolved = Vec::with_capacity(subset.len());
    let mut missing = Vec::new();
    for wanted in subset {
        match names.iter().find(|n| n.eq_ignore_ascii_case(wanted)) {
            Some(name) => resolved.push(name.to_string()),
            None => missing.push(wanted.to_lowercase()),
        }
    }
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }
    Ok(df.unique_stable(Some(resolved.as_slice()), strategy.keep(), None)?)
}

/// Convert a polars frame into a [`TabularDataset`].
pub fn to_dataset(df: &DataFrame) -> Result<TabularDataset, IngestError> {
    let mut columns = Vec::with_capacity(df.width());
    for series in df.get_columns() {
        columns.push(Column::new(series.name(), series_values(series)?));
    }
    Ok(TabularDataset::new(columns)?)
}

fn series_values(series: &Series) -> Result<Vec<Scalar>, IngestError> {
    let values = match series.dtype() {
        DataType::Boolean => series.bool()?.into_iter().map(Scalar::from).collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => series
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(Scalar::from)
            .collect(),
        DataType::UInt64 | DataType::Float32 | DataType::Float64 => series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(Scalar::from)
            .collect(),
        _ => series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| Scalar::from(v.map(str::to_string)))
            .collect(),
    };
    Ok(values)
}

pub fn validate_not_empty(dataset: &TabularDataset) -> Result<(), IngestError> {
    if dataset.column_count() == 0 {
        return Err(IngestError::NoColumns);
    }
    if dataset.row_count() == 0 {
        return Err(IngestError::Empty);
    }
    Ok(())
}

/// Case-insensitive presence check for required columns
pub fn validate_required_columns(dataset: &TabularDataset, required: &[String]) -> Result<(), IngestError> {
    let present: Vec<String> = dataset.column_names().iter().map(|c| c.to_lowercase()).collect();
    let missing: Vec<String> = required
        .iter()
        .map(|c| c.to_lowercase())
        .filter(|c| !present.contains(c))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::MissingColumns(missing))
    }
}

pub fn validate_file_size(size_bytes: usize, max_size_mb: u64) -> Result<(), IngestError> {
    let max_bytes = max_size_mb.saturating_mul(1024 * 1024);
    if size_bytes as u64 > max_bytes {
        return Err(IngestError::TooLarge {
            size_mb: size_bytes as f64 / 1024.0 / 1024.0,
            max_mb: max_size_mb,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
}

impl FileInfo {
    pub fn of(dataset: &TabularDataset) -> Self {
        Self {
            row_count: dataset.row_count(),
            column_count: dataset.column_count(),
            columns: dataset.column_names().iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_file_size_mb: u64,
    pub dedup: DedupStrategy,
    /// Columns that identify a duplicate; empty means whole rows
    pub dedup_subset: Vec<String>,
    pub required_columns: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            dedup: DedupStrategy::First,
            dedup_subset: Vec::new(),
            required_columns: Vec::new(),
        }
    }
}

/// Output of the upload pipeline
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub dataset: TabularDataset,
    pub encoding: TextEncoding,
    pub duplicates_removed: usize,
}

/// Size check → decode → parse → validate → deduplicate.
pub fn load_upload(bytes: &[u8], options: &IngestOptions) -> Result<LoadedFile, IngestError> {
    validate_file_size(bytes.len(), options.max_file_size_mb)?;
    let (text, encoding) = decode_bytes(bytes)?;

    let df = read_csv(&text)?;
    let parsed = to_dataset(&df)?;
    validate_not_empty(&parsed)?;
    validate_required_columns(&parsed, &options.required_columns)?;

    let deduped = deduplicate(&df, options.dedup, &options.dedup_subset)?;
    let dataset = to_dataset(&deduped)?;
    let duplicates_removed = parsed.row_count() - dataset.row_count();

    info!(
        "📄 Parsed upload: {} rows, {} columns ({} duplicates removed, {})",
        dataset.row_count(),
        dataset.column_count(),
        duplicates_removed,
        encoding.label()
    );
    Ok(LoadedFile {
        dataset,
        encoding,
        duplicates_removed,
    })
}
