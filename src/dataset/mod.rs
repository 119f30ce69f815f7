use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::error::DatasetError;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view of the value; `None` for text, booleans and nulls
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Bool(v) => serializer.serialize_bool(*v),
            Scalar::Int(v) => serializer.serialize_i64(*v),
            Scalar::Float(v) => serializer.serialize_f64(*v),
            Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered, column-oriented table of scalars.
///
/// Every column has the same length and column names are unique; both are
/// checked by [`TabularDataset::new`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularDataset {
    columns: Vec<Column>,
}

impl TabularDataset {
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DatasetError::DuplicateColumn(column.name.clone()));
            }
        }

        if let Some(first) = columns.first() {
            let expected = first.values.len();
            for column in &columns[1..] {
                if column.values.len() != expected {
                    return Err(DatasetError::LengthMismatch {
                        column: column.name.clone(),
                        expected,
                        actual: column.values.len(),
                    });
                }
            }
        }

        Ok(Self { columns })
    }

    /// Zero-row dataset with a fixed set of column names
    pub fn empty(names: &[&str]) -> Self {
        Self {
            columns: names.iter().map(|n| Column::new(*n, Vec::new())).collect(),
        }
    }

    /// Build from row-major values. Every row must have one value per name.
    pub fn from_rows(names: &[String], rows: Vec<Vec<Scalar>>) -> Result<Self, DatasetError> {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column::new(n.clone(), Vec::with_capacity(rows.len())))
            .collect();

        for (row_index, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::LengthMismatch {
                    column: format!("row {}", row_index),
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }

        Self::new(columns)
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Scalar> {
        self.column(column).and_then(|c| c.values.get(row))
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Scalar>> + '_ {
        (0..self.row_count()).map(move |i| self.columns.iter().map(|c| &c.values[i]).collect())
    }

    /// Numeric (x, y) pairs from two columns, skipping rows where either side is not numeric
    pub fn numeric_pairs(&self, x: &str, y: &str) -> Vec<(f64, f64)> {
        match (self.column(x), self.column(y)) {
            (Some(xs), Some(ys)) => xs
                .values
                .iter()
                .zip(&ys.values)
                .filter_map(|(a, b)| Some((a.as_f64()?, b.as_f64()?)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Serializes as a JSON array of records keyed by column name.
impl Serialize for TabularDataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Record<'a>(&'a TabularDataset, usize);

        impl Serialize for Record<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.column_count()))?;
                for column in &self.0.columns {
                    map.serialize_entry(&column.name, &column.values[self.1])?;
                }
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.row_count()))?;
        for i in 0..self.row_count() {
            seq.serialize_element(&Record(self, i))?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_ragged_columns() {
        let result = TabularDataset::new(vec![
            Column::new("a", vec![Scalar::Int(1), Scalar::Int(2)]),
            Column::new("b", vec![Scalar::Int(1)]),
        ]);
        assert_eq!(
            result.unwrap_err(),
            DatasetError::LengthMismatch {
                column: "b".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        let result = TabularDataset::new(vec![
            Column::new("a", vec![Scalar::Int(1)]),
            Column::new("a", vec![Scalar::Int(2)]),
        ]);
        assert_eq!(result.unwrap_err(), DatasetError::DuplicateColumn("a".to_string()));
    }

    #[test]
    fn test_from_rows_and_accessors() {
        let names = vec!["gender".to_string(), "score".to_string()];
        let ds = TabularDataset::from_rows(
            &names,
            vec![
                vec!["M".into(), Scalar::Float(70.0)],
                vec!["F".into(), Scalar::Null],
            ],
        )
        .unwrap();

        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.column_names(), vec!["gender", "score"]);
        assert_eq!(ds.value(1, "gender"), Some(&Scalar::Text("F".to_string())));
        assert_eq!(ds.rows().count(), 2);
    }

    #[test]
    fn test_numeric_pairs_skip_nulls() {
        let ds = TabularDataset::new(vec![
            Column::new("x", vec![Scalar::Int(1), Scalar::Null, Scalar::Float(3.5)]),
            Column::new("y", vec![Scalar::Float(2.0), Scalar::Float(4.0), Scalar::Int(7)]),
        ])
        .unwrap();

        assert_eq!(ds.numeric_pairs("x", "y"), vec![(1.0, 2.0), (3.5, 7.0)]);
        assert!(ds.numeric_pairs("x", "missing").is_empty());
    }

    #[test]
    fn test_json_records() {
        let ds = TabularDataset::new(vec![
            Column::new("group", vec!["M".into()]),
            Column::new("count", vec![Scalar::Int(2)]),
        ])
        .unwrap();

        let json = serde_json::to_string(&ds).unwrap();
        assert_eq!(json, r#"[{"group":"M","count":2}]"#);
    }

    #[test]
    fn test_empty_keeps_schema() {
        let ds = TabularDataset::empty(&["study_hours", "exam_score"]);
        assert!(ds.is_empty());
        assert_eq!(ds.column_count(), 2);
    }
}
