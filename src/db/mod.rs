use duckdb::types::{ToSql, ToSqlOutput, Value, ValueRef};
use duckdb::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

use crate::dataset::{Scalar, TabularDataset};
use crate::error::StoreError;

pub const IN_MEMORY: &str = ":memory:";

const STAGING_SUFFIX: &str = "__staging";

/// Embedded analytical store holding the session's named tables.
///
/// Owns a single DuckDB connection; one store per session.
pub struct Store {
    conn: Connection,
    path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: i64,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Table identifiers are restricted to `[A-Za-z0-9_]+`.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quote an identifier, doubling any embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// What `import` does when the target table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    #[default]
    Replace,
    Append,
    Fail,
}

/// Suffix repeated result names (`id`, `id_1`, `id_2`, ...) so joins and
/// repeated aliases still form a valid dataset
fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut suffix = 1;
            while seen.contains(&candidate) {
                candidate = format!("{}_{}", name, suffix);
                suffix += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

impl ToSql for Scalar {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(v) => Value::Boolean(*v),
            Scalar::Int(v) => Value::BigInt(*v),
            Scalar::Float(v) => Value::Double(*v),
            Scalar::Text(s) => Value::Text(s.clone()),
        }))
    }
}

impl Store {
    /// Open a store; `":memory:"` gives a transient in-memory database
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if path == IN_MEMORY {
            return Self::in_memory();
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::io(format!("failed to open DuckDB database '{}'", path), e))?;

        info!("🦆 Opened store at {}", path);
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::io("failed to open in-memory DuckDB database", e))?;

        debug!("🦆 Opened in-memory store");
        Ok(Self {
            conn,
            path: IN_MEMORY.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Load `dataset` into table `name`; `mode` decides what happens when it exists.
    ///
    /// Rows are loaded into a staging table first and swapped in (or appended)
    /// within a single transaction, so the old table stays visible until commit.
    pub fn import(&self, dataset: &TabularDataset, name: &str, mode: ImportMode) -> Result<(), StoreError> {
        if dataset.is_empty() {
            return Err(StoreError::EmptyInput("cannot import empty dataset".to_string()));
        }
        validate_identifier(name)?;

        let exists = self.table_exists(name);
        if exists && mode == ImportMode::Fail {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }

        let staging = format!("{}{}", name, STAGING_SUFFIX);
        let result = self.load_staging(dataset, &staging).and_then(|_| {
            if exists && mode == ImportMode::Append {
                self.append_from(&staging, name)
            } else {
                self.swap_in(&staging, name)
            }
        });

        if result.is_err() {
            if let Err(e) = self.conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                quote_identifier(&staging)
            )) {
                warn!("Failed to clean up staging table {}: {}", staging, e);
            }
        } else {
            info!("📥 Imported {} rows into '{}' ({:?})", dataset.row_count(), name, mode);
        }
        result
    }

    fn load_staging(&self, dataset: &TabularDataset, staging: &str) -> Result<(), StoreError> {
        let column_defs: Vec<String> = dataset
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), infer_sql_type(&c.values).sql()))
            .collect();

        let ddl = format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({defs});",
            table = quote_identifier(staging),
            defs = column_defs.join(", ")
        );
        self.conn
            .execute_batch(&ddl)
            .map_err(|e| StoreError::io(format!("failed to create table '{}'", staging), e))?;

        let types: Vec<SqlType> = dataset
            .columns()
            .iter()
            .map(|c| infer_sql_type(&c.values))
            .collect();
        let placeholders = vec!["?"; types.len()].join(", ");
        let insert = format!("INSERT INTO {} VALUES ({})", quote_identifier(staging), placeholders);

        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(|e| StoreError::io("failed to begin import transaction", e))?;

        let inserted = self.insert_rows(dataset, &types, &insert);
        match inserted {
            Ok(()) => self
                .conn
                .execute_batch("COMMIT")
                .map_err(|e| StoreError::io(format!("failed to commit rows into '{}'", staging), e))?,
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }

        debug!("Loaded {} rows into staging table {}", dataset.row_count(), staging);
        Ok(())
    }

    /// Batch insert through one prepared statement
    fn insert_rows(&self, dataset: &TabularDataset, types: &[SqlType], insert: &str) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare(insert)
            .map_err(|e| StoreError::io("failed to prepare insert", e))?;

        for row in dataset.rows() {
            let values = row.iter().zip(types).map(|(v, t)| t.coerce(v));
            stmt.execute(params_from_iter(values))
                .map_err(|e| StoreError::io("failed to insert row", e))?;
        }
        Ok(())
    }

    fn swap_in(&self, staging: &str, name: &str) -> Result<(), StoreError> {
        let swap = format!(
            "BEGIN TRANSACTION; DROP TABLE IF EXISTS {target}; ALTER TABLE {staging} RENAME TO {target}; COMMIT;",
            target = quote_identifier(name),
            staging = quote_identifier(staging),
        );
        if let Err(e) = self.conn.execute_batch(&swap) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(StoreError::io(format!("failed to replace table '{}'", name), e));
        }
        Ok(())
    }

    /// Insert the staging rows into `name`, matching columns by name
    fn append_from(&self, staging: &str, name: &str) -> Result<(), StoreError> {
        let append = format!(
            "BEGIN TRANSACTION; INSERT INTO {target} BY NAME SELECT * FROM {staging}; DROP TABLE {staging}; COMMIT;",
            target = quote_identifier(name),
            staging = quote_identifier(staging),
        );
        if let Err(e) = self.conn.execute_batch(&append) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(StoreError::io(format!("failed to append to table '{}'", name), e));
        }
        Ok(())
    }

    pub fn query(&self, sql: &str) -> Result<TabularDataset, StoreError> {
        self.query_with_params(sql, &[])
    }

    /// Run a query with positional `?` parameters
    pub fn query_with_params(&self, sql: &str, params: &[Scalar]) -> Result<TabularDataset, StoreError> {
        if sql.trim().is_empty() {
            return Err(StoreError::EmptyInput("query cannot be empty".to_string()));
        }
        debug!("Executing query: {} ({} params)", sql.trim(), params.len());

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| StoreError::io("query execution failed", e))?;

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| StoreError::io("query execution failed", e))?;

        // Column count is found per row; names are read once Rows is released.
        let mut collected = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| StoreError::io("failed to fetch row", e))?
        {
            let mut values = Vec::new();
            for i in 0.. {
                match row.get_ref(i) {
                    Ok(value) => values.push(scalar_from_ref(value)),
                    Err(_) => break,
                }
            }
            collected.push(values);
        }
        drop(rows);

        let names = unique_column_names(stmt.column_names());
        Ok(TabularDataset::from_rows(&names, collected)?)
    }

    /// Fail-safe existence check: lookup errors read as "absent".
    /// Names compare case-insensitively, as DuckDB resolves them.
    pub fn table_exists(&self, name: &str) -> bool {
        match self.list_tables() {
            Ok(tables) => tables.iter().any(|t| t.eq_ignore_ascii_case(name)),
            Err(e) => {
                debug!("table_exists({}) lookup failed: {}", name, e);
                false
            }
        }
    }

    pub fn list_tables(&self) -> Result<BTreeSet<String>, StoreError> {
        let result = self.query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        Ok(result
            .columns()
            .first()
            .map(|c| {
                c.values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Drop a table; a missing table is not an error
    pub fn drop_table(&self, name: &str) -> Result<(), StoreError> {
        validate_identifier(name)?;
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(name)))
            .map_err(|e| StoreError::io(format!("failed to delete table '{}'", name), e))?;
        info!("🗑️  Dropped table '{}'", name);
        Ok(())
    }

    pub fn describe_table(&self, name: &str) -> Result<TableInfo, StoreError> {
        validate_identifier(name)?;
        let context = format!("failed to retrieve table info for '{}'", name);

        let row_count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_identifier(name)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::io(context.clone(), e))?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns
                 WHERE table_schema = 'main' AND table_name = ?
                 ORDER BY ordinal_position",
            )
            .map_err(|e| StoreError::io(context.clone(), e))?;

        let columns = stmt
            .query_map(duckdb::params![name], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })
            .map_err(|e| StoreError::io(context.clone(), e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::io(context.clone(), e))?;

        Ok(TableInfo {
            name: name.to_string(),
            row_count,
            columns,
        })
    }

    /// Full outer join of two tables on a shared column, materialized as `output`
    pub fn merge(&self, left: &str, right: &str, on_column: &str, output: &str) -> Result<(), StoreError> {
        for name in [left, right, on_column, output] {
            validate_identifier(name)?;
        }

        let sql = format!(
            "CREATE TABLE {out} AS SELECT * FROM {l} FULL OUTER JOIN {r} USING ({on})",
            out = quote_identifier(output),
            l = quote_identifier(left),
            r = quote_identifier(right),
            on = quote_identifier(on_column),
        );
        self.conn
            .execute_batch(&sql)
            .map_err(|e| StoreError::io("failed to merge tables", e))?;

        info!("🔗 Merged '{}' and '{}' on {} into '{}'", left, right, on_column, output);
        Ok(())
    }

    /// Distinct non-null values of a column, ascending
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Scalar>, StoreError> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        let col = quote_identifier(column);
        let result = self.query(&format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = col,
            table = quote_identifier(table),
        ))?;
        Ok(result
            .columns()
            .first()
            .map(|c| c.values.clone())
            .unwrap_or_default())
    }

    /// Minimum and maximum of a numeric column
    pub fn column_range(&self, table: &str, column: &str) -> Result<(f64, f64), StoreError> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        let sql = format!(
            "SELECT CAST(MIN({col}) AS DOUBLE), CAST(MAX({col}) AS DOUBLE) FROM {table}",
            col = quote_identifier(column),
            table = quote_identifier(table),
        );
        let context = format!("failed to get range for {}", column);
        let (min, max): (Option<f64>, Option<f64>) = self
            .conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| StoreError::io(context.clone(), e))?;

        match (min, max) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(StoreError::io(
                format!("{}: column has no values", context),
                duckdb::Error::QueryReturnedNoRows,
            )),
        }
    }

    /// Close the underlying connection
    pub fn close(self) -> Result<(), StoreError> {
        let path = self.path.clone();
        self.conn
            .close()
            .map_err(|(_, e)| StoreError::io(format!("failed to close store '{}'", path), e))?;
        debug!("Closed store at {}", path);
        Ok(())
    }
}

/// Storage type chosen for an imported column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    Boolean,
    BigInt,
    Double,
    Varchar,
}

impl SqlType {
    fn sql(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Varchar => "VARCHAR",
        }
    }

    fn coerce(self, value: &Scalar) -> Scalar {
        match (self, value) {
            (_, Scalar::Null) => Scalar::Null,
            (SqlType::Double, Scalar::Int(v)) => Scalar::Float(*v as f64),
            (SqlType::Varchar, Scalar::Text(_)) => value.clone(),
            (SqlType::Varchar, other) => Scalar::Text(other.to_string()),
            _ => value.clone(),
        }
    }
}

fn infer_sql_type(values: &[Scalar]) -> SqlType {
    let mut inferred: Option<SqlType> = None;
    for value in values {
        let current = match value {
            Scalar::Null => continue,
            Scalar::Bool(_) => SqlType::Boolean,
            Scalar::Int(_) => SqlType::BigInt,
            Scalar::Float(_) => SqlType::Double,
            Scalar::Text(_) => return SqlType::Varchar,
        };
        inferred = Some(match (inferred, current) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(SqlType::BigInt), SqlType::Double) | (Some(SqlType::Double), SqlType::BigInt) => {
                SqlType::Double
            }
            _ => return SqlType::Varchar,
        });
    }
    inferred.unwrap_or(SqlType::Varchar)
}

fn scalar_from_ref(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Boolean(b) => Scalar::Bool(b),
        ValueRef::TinyInt(i) => Scalar::Int(i.into()),
        ValueRef::SmallInt(i) => Scalar::Int(i.into()),
        ValueRef::Int(i) => Scalar::Int(i.into()),
        ValueRef::BigInt(i) => Scalar::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Scalar::Int)
            .unwrap_or(Scalar::Float(i as f64)),
        ValueRef::UTinyInt(i) => Scalar::Int(i.into()),
        ValueRef::USmallInt(i) => Scalar::Int(i.into()),
        ValueRef::UInt(i) => Scalar::Int(i.into()),
        ValueRef::UBigInt(i) => i64::try_from(i)
            .map(Scalar::Int)
            .unwrap_or(Scalar::Float(i as f64)),
        ValueRef::Float(f) => Scalar::Float(f.into()),
        ValueRef::Double(f) => Scalar::Float(f),
        ValueRef::Text(s) => Scalar::Text(String::from_utf8_lossy(s).into_owned()),
        other => Scalar::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;

    fn sample_dataset() -> TabularDataset {
        TabularDataset::new(vec![
            Column::new("student_id", vec![1i64.into(), 2i64.into(), 3i64.into()]),
            Column::new("gender", vec!["Male".into(), "Female".into(), "Male".into()]),
            Column::new("exam_score", vec![85.0.into(), 90.0.into(), Scalar::Null]),
        ])
        .unwrap()
    }

    #[test]
    fn test_import_and_select_keeps_row_count() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let result = store.query("SELECT * FROM students").unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.column_names(), vec!["student_id", "gender", "exam_score"]);
        assert_eq!(result.value(2, "exam_score"), Some(&Scalar::Null));
    }

    #[test]
    fn test_import_rejects_empty_dataset() {
        let store = Store::in_memory().unwrap();
        let empty = TabularDataset::empty(&["a"]);
        assert!(matches!(
            store.import(&empty, "t", ImportMode::Replace),
            Err(StoreError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_import_rejects_bad_identifiers() {
        let store = Store::in_memory().unwrap();
        for name in ["bad-name", "bang!", "", "drop table"] {
            assert!(matches!(
                store.import(&sample_dataset(), name, ImportMode::Replace),
                Err(StoreError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_import_replaces_existing_table() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let replacement = TabularDataset::new(vec![Column::new("other", vec!["x".into()])]).unwrap();
        store.import(&replacement, "students", ImportMode::Replace).unwrap();

        let info = store.describe_table("students").unwrap();
        assert_eq!(info.row_count, 1);
        assert_eq!(info.columns.len(), 1);
        assert_eq!(info.columns[0].name, "other");
        assert!(!store.table_exists("students__staging"));
    }

    #[test]
    fn test_failed_import_keeps_previous_table() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        // Two columns differing only by case collide inside DuckDB
        let bad = TabularDataset::new(vec![
            Column::new("gender", vec!["M".into()]),
            Column::new("Gender", vec!["F".into()]),
        ])
        .unwrap();
        assert!(matches!(store.import(&bad, "students", ImportMode::Replace), Err(StoreError::Io { .. })));

        assert_eq!(store.describe_table("students").unwrap().row_count, 3);
        assert!(!store.table_exists("students__staging"));
    }

    #[test]
    fn test_query_rejects_blank_text() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(store.query("   \n"), Err(StoreError::EmptyInput(_))));
    }

    #[test]
    fn test_query_failure_is_io_error() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(
            store.query("SELECT * FROM missing_table"),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_join_with_repeated_columns_is_renamed() {
        let store = Store::in_memory().unwrap();
        let left = TabularDataset::new(vec![
            Column::new("id", vec![Scalar::Int(1), Scalar::Int(2)]),
            Column::new("x", vec!["a".into(), "b".into()]),
        ])
        .unwrap();
        let right = TabularDataset::new(vec![
            Column::new("id", vec![Scalar::Int(2), Scalar::Int(3)]),
            Column::new("x", vec!["c".into(), "d".into()]),
        ])
        .unwrap();
        store.import(&left, "a", ImportMode::Replace).unwrap();
        store.import(&right, "b", ImportMode::Replace).unwrap();

        let result = store.query("SELECT * FROM a JOIN b ON a.id = b.id").unwrap();
        assert_eq!(result.column_names(), vec!["id", "x", "id_1", "x_1"]);
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.value(0, "x_1"), Some(&Scalar::from("c")));
    }

    #[test]
    fn test_repeated_alias_is_renamed() {
        let store = Store::in_memory().unwrap();
        let result = store.query("SELECT 1 AS v, 2 AS v, 3 AS v_1").unwrap();
        assert_eq!(result.column_names(), vec!["v", "v_1", "v_1_1"]);
        assert_eq!(result.value(0, "v_1"), Some(&Scalar::Int(2)));
    }

    #[test]
    fn test_unique_column_names() {
        let names = vec!["v".to_string(), "v_1".to_string(), "v".to_string()];
        assert_eq!(unique_column_names(names), vec!["v", "v_1", "v_2"]);
    }

    #[test]
    fn test_table_exists_ignores_case() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "Students", ImportMode::Replace).unwrap();
        assert!(store.table_exists("Students"));
        assert!(store.table_exists("students"));
        assert!(store.table_exists("STUDENTS"));
        assert!(!store.table_exists("student"));
    }

    #[test]
    fn test_import_modes() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        assert!(matches!(
            store.import(&sample_dataset(), "Students", ImportMode::Fail),
            Err(StoreError::AlreadyExists(_))
        ));

        store
            .import(&sample_dataset(), "students", ImportMode::Append)
            .unwrap();
        assert_eq!(store.describe_table("students").unwrap().row_count, 6);
        assert!(!store.table_exists("students__staging"));

        // Append onto a missing table simply creates it
        store
            .import(&sample_dataset(), "fresh", ImportMode::Append)
            .unwrap();
        assert_eq!(store.describe_table("fresh").unwrap().row_count, 3);
    }

    #[test]
    fn test_failed_append_keeps_table() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let unknown = TabularDataset::new(vec![Column::new("nickname", vec!["x".into()])]).unwrap();
        assert!(matches!(
            store.import(&unknown, "students", ImportMode::Append),
            Err(StoreError::Io { .. })
        ));
        assert_eq!(store.describe_table("students").unwrap().row_count, 3);
        assert!(!store.table_exists("students__staging"));
    }

    #[test]
    fn test_query_with_params_binds_values() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let result = store
            .query_with_params(
                "SELECT student_id FROM students WHERE gender = ? ORDER BY student_id",
                &["Male".into()],
            )
            .unwrap();
        assert_eq!(result.column("student_id").unwrap().values, vec![Scalar::Int(1), Scalar::Int(3)]);
    }

    #[test]
    fn test_empty_result_keeps_column_names() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let result = store.query("SELECT gender, exam_score FROM students WHERE 1 = 0").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.column_names(), vec!["gender", "exam_score"]);
    }

    #[test]
    fn test_table_listing_and_drop() {
        let store = Store::in_memory().unwrap();
        assert!(!store.table_exists("students"));

        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();
        assert!(store.table_exists("students"));
        assert_eq!(store.list_tables().unwrap().into_iter().collect::<Vec<_>>(), vec!["students"]);

        store.drop_table("students").unwrap();
        assert!(!store.table_exists("students"));
        // Idempotent
        store.drop_table("students").unwrap();
    }

    #[test]
    fn test_describe_missing_table_fails() {
        let store = Store::in_memory().unwrap();
        assert!(matches!(store.describe_table("nope"), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_describe_reports_types() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let info = store.describe_table("students").unwrap();
        assert_eq!(info.row_count, 3);
        assert_eq!(info.column_count(), 3);
        let types: Vec<&str> = info.columns.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(types, vec!["BIGINT", "VARCHAR", "DOUBLE"]);
    }

    #[test]
    fn test_merge_full_outer_join() {
        let store = Store::in_memory().unwrap();
        let left = TabularDataset::new(vec![
            Column::new("student_id", vec![1i64.into(), 2i64.into()]),
            Column::new("sleep_hours", vec![7.0.into(), 8.0.into()]),
        ])
        .unwrap();
        let right = TabularDataset::new(vec![
            Column::new("student_id", vec![2i64.into(), 3i64.into()]),
            Column::new("attendance", vec![90.0.into(), 75.0.into()]),
        ])
        .unwrap();
        store.import(&left, "habits", ImportMode::Replace).unwrap();
        store.import(&right, "factors", ImportMode::Replace).unwrap();

        store.merge("habits", "factors", "student_id", "merged").unwrap();

        let info = store.describe_table("merged").unwrap();
        assert_eq!(info.row_count, 3);
        assert_eq!(info.column_count(), 3);
    }

    #[test]
    fn test_merge_missing_column_fails() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "a", ImportMode::Replace).unwrap();
        store.import(&sample_dataset(), "b", ImportMode::Replace).unwrap();
        assert!(matches!(
            store.merge("a", "b", "no_such_column", "out"),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_distinct_values_and_range() {
        let store = Store::in_memory().unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();

        let genders = store.distinct_values("students", "gender").unwrap();
        assert_eq!(genders, vec![Scalar::from("Female"), Scalar::from("Male")]);

        let (min, max) = store.column_range("students", "exam_score").unwrap();
        assert_eq!((min, max), (85.0, 90.0));
    }

    #[test]
    fn test_mixed_numeric_column_becomes_double() {
        assert_eq!(infer_sql_type(&[Scalar::Int(1), Scalar::Float(2.5)]), SqlType::Double);
        assert_eq!(infer_sql_type(&[Scalar::Null, Scalar::Bool(true)]), SqlType::Boolean);
        assert_eq!(infer_sql_type(&[Scalar::Int(1), Scalar::Text("a".into())]), SqlType::Varchar);
        assert_eq!(infer_sql_type(&[Scalar::Null]), SqlType::Varchar);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyzer.db");
        let path = path.to_str().unwrap();

        let store = Store::open(path).unwrap();
        store.import(&sample_dataset(), "students", ImportMode::Replace).unwrap();
        store.close().unwrap();

        let reopened = Store::open(path).unwrap();
        assert_eq!(reopened.describe_table("students").unwrap().row_count, 3);
    }
}
