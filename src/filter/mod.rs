use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::dataset::Scalar;
use crate::db::{quote_identifier, Store};
use crate::error::{FilterError, StoreError};

/// Attribute that the KPI injector treats as range-filterable
pub const AGE_ATTRIBUTE: &str = "age";

/// One user selection for an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Equality
    Scalar(Scalar),
    /// Inclusive `(lo, hi)`
    Range(f64, f64),
    /// Set membership
    List(Vec<Scalar>),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Scalar(v) => write!(f, "{}", v),
            FilterValue::Range(lo, hi) => write!(f, "{}–{}", lo, hi),
            FilterValue::List(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// The user's current selection, keyed by attribute name.
pub type FilterSpec = BTreeMap<String, FilterValue>;

/// A query plus its positional parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<Scalar>,
}

impl BoundQuery {
    pub fn unbound(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append raw SQL text (grouping, ordering)
    pub fn push_sql(&mut self, text: &str) {
        self.sql.push_str(text);
    }
}

impl fmt::Display for BoundQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Predicates joined with `AND`, without the `WHERE` keyword.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundClause {
    pub predicates: Vec<String>,
    pub params: Vec<Scalar>,
}

impl BoundClause {
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn sql(&self) -> String {
        self.predicates.join(" AND ")
    }

    /// Attach to `base` with `WHERE`, or `AND` when `base` already filters
    pub fn attach(self, base: &str) -> BoundQuery {
        if self.is_empty() {
            return BoundQuery::unbound(base);
        }
        let keyword = if base.to_uppercase().contains("WHERE") { "AND" } else { "WHERE" };
        BoundQuery {
            sql: format!("{} {} {}", base, keyword, self.sql()),
            params: self.params,
        }
    }
}

fn resolve_column<'a>(attribute: &'a str, known_columns: Option<&[&'a str]>) -> Option<&'a str> {
    match known_columns {
        Some(columns) => columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(attribute))
            .copied(),
        None => Some(attribute),
    }
}

/// Extend a KPI query with the filters whose attribute exists in `known_columns`.
///
/// Attribute names match case-insensitively and resolve to the casing used by
/// the table. Only `age` ranges and text/numeric equality are applied here;
/// booleans, lists and other ranges are skipped.
pub fn inject_filters(base_query: &str, filters: &FilterSpec, known_columns: Option<&[&str]>) -> BoundQuery {
    if filters.is_empty() {
        return BoundQuery::unbound(base_query);
    }

    let mut clause = BoundClause::default();
    for (attribute, value) in filters {
        let Some(column) = resolve_column(attribute, known_columns) else {
            debug!("Skipping filter '{}': not present in table schema", attribute);
            continue;
        };
        let column = quote_identifier(column);

        match value {
            FilterValue::Range(lo, hi) if attribute == AGE_ATTRIBUTE => {
                clause.predicates.push(format!("{} BETWEEN ? AND ?", column));
                clause.params.push(Scalar::Float(*lo));
                clause.params.push(Scalar::Float(*hi));
            }
            FilterValue::Scalar(v @ (Scalar::Text(_) | Scalar::Int(_) | Scalar::Float(_))) => {
                clause.predicates.push(format!("{} = ?", column));
                clause.params.push(v.clone());
            }
            _ => debug!("Filter '{}' has a shape the KPI path does not apply", attribute),
        }
    }

    clause.attach(base_query)
}

/// General-purpose predicate builder: every value shape, no schema check.
pub fn build_filter_clause(filters: &FilterSpec) -> BoundClause {
    let mut clause = BoundClause::default();

    for (attribute, value) in filters {
        let column = quote_identifier(attribute);
        match value {
            FilterValue::List(values) if !values.is_empty() => {
                let placeholders = vec!["?"; values.len()].join(", ");
                clause.predicates.push(format!("{} IN ({})", column, placeholders));
                clause.params.extend(values.iter().cloned());
            }
            FilterValue::List(_) => {}
            FilterValue::Range(lo, hi) => {
                clause.predicates.push(format!("{} BETWEEN ? AND ?", column));
                clause.params.push(Scalar::Float(*lo));
                clause.params.push(Scalar::Float(*hi));
            }
            FilterValue::Scalar(Scalar::Null) => {}
            FilterValue::Scalar(v) => {
                clause.predicates.push(format!("{} = ?", column));
                clause.params.push(v.clone());
            }
        }
    }

    clause
}

pub fn apply_filters(base_query: &str, filters: &FilterSpec) -> BoundQuery {
    build_filter_clause(filters).attach(base_query)
}

/// Reject empty lists and inverted ranges, reporting every offending filter.
pub fn validate_filters(filters: &FilterSpec) -> Result<(), FilterError> {
    let errors: Vec<String> = filters
        .iter()
        .filter_map(|(key, value)| match value {
            FilterValue::List(values) if values.is_empty() => {
                Some(format!("Filter '{}' has empty list", key))
            }
            FilterValue::Range(lo, hi) if lo > hi => {
                Some(format!("Filter '{}' range start is greater than end", key))
            }
            _ => None,
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(FilterError::Invalid(errors))
    }
}

/// Filter-option discovery against the loaded tables.
pub struct FilterEngine<'a> {
    store: &'a Store,
}

impl<'a> FilterEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Distinct values available for a column
    pub fn filter_options(&self, table: &str, column: &str) -> Result<Vec<Scalar>, StoreError> {
        self.store.distinct_values(table, column)
    }

    pub fn column_range(&self, table: &str, column: &str) -> Result<(f64, f64), StoreError> {
        self.store.column_range(table, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, TabularDataset};
    use crate::db::ImportMode;

    const BASE: &str = "SELECT gender, AVG(exam_score) FROM student_habits_performance";

    fn spec(entries: Vec<(&str, FilterValue)>) -> FilterSpec {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_empty_filters_leave_query_unchanged() {
        let result = inject_filters(BASE, &FilterSpec::new(), Some(&["age", "gender"]));
        assert_eq!(result, BoundQuery::unbound(BASE));

        let result = inject_filters(BASE, &FilterSpec::new(), None);
        assert_eq!(result.sql, BASE);
    }

    #[test]
    fn test_age_range_uses_where_then_and() {
        let filters = spec(vec![("age", FilterValue::Range(18.0, 25.0))]);

        let result = inject_filters(BASE, &filters, Some(&["age", "gender"]));
        assert_eq!(result.sql, format!("{} WHERE \"age\" BETWEEN ? AND ?", BASE));
        assert_eq!(result.params, vec![Scalar::Float(18.0), Scalar::Float(25.0)]);

        let with_where = format!("{} where exam_score IS NOT NULL", BASE);
        let result = inject_filters(&with_where, &filters, Some(&["age", "gender"]));
        assert_eq!(result.sql, format!("{} AND \"age\" BETWEEN ? AND ?", with_where));
        assert_eq!(result.params.len(), 2);
    }

    #[test]
    fn test_unknown_attribute_is_skipped() {
        let filters = spec(vec![("unknown_attr", FilterValue::Scalar("X".into()))]);
        let result = inject_filters(BASE, &filters, Some(&["age", "gender"]));
        assert_eq!(result, BoundQuery::unbound(BASE));
    }

    #[test]
    fn test_attribute_resolves_case_insensitively() {
        let filters = spec(vec![("Gender", FilterValue::Scalar("Male".into()))]);
        let result = inject_filters(BASE, &filters, Some(&["age", "gender"]));
        assert!(result.sql.ends_with("WHERE \"gender\" = ?"));
        assert_eq!(result.params, vec![Scalar::from("Male")]);

        let filters = spec(vec![("gender", FilterValue::Scalar("Female".into()))]);
        let result = inject_filters(BASE, &filters, Some(&["Gender", "Exam_Score"]));
        assert!(result.sql.ends_with("WHERE \"Gender\" = ?"));
    }

    #[test]
    fn test_without_known_columns_uses_attribute_verbatim() {
        let filters = spec(vec![("Sleep_Hours", FilterValue::Scalar(Scalar::Int(7)))]);
        let result = inject_filters(BASE, &filters, None);
        assert!(result.sql.ends_with("WHERE \"Sleep_Hours\" = ?"));
        assert_eq!(result.params, vec![Scalar::Int(7)]);
    }

    #[test]
    fn test_kpi_injector_skips_unsupported_shapes() {
        let filters = spec(vec![
            ("gender", FilterValue::List(vec!["Male".into()])),
            ("parental_education_level", FilterValue::Range(1.0, 2.0)),
            ("age", FilterValue::Scalar(Scalar::Bool(true))),
        ]);
        let known = ["age", "gender", "parental_education_level"];
        let result = inject_filters(BASE, &filters, Some(&known));
        assert_eq!(result, BoundQuery::unbound(BASE));
    }

    #[test]
    fn test_multiple_predicates_join_with_and() {
        let filters = spec(vec![
            ("age", FilterValue::Range(17.0, 24.0)),
            ("gender", FilterValue::Scalar("Female".into())),
        ]);
        let result = inject_filters(BASE, &filters, Some(&["age", "gender"]));
        assert_eq!(
            result.sql,
            format!("{} WHERE \"age\" BETWEEN ? AND ? AND \"gender\" = ?", BASE)
        );
        assert_eq!(
            result.params,
            vec![Scalar::Float(17.0), Scalar::Float(24.0), Scalar::from("Female")]
        );
    }

    #[test]
    fn test_quote_in_value_is_bound_not_interpolated() {
        let filters = spec(vec![("gender", FilterValue::Scalar("O'Brien".into()))]);
        let result = inject_filters(BASE, &filters, Some(&["gender"]));
        assert!(!result.sql.contains("O'Brien"));
        assert_eq!(result.params, vec![Scalar::from("O'Brien")]);
    }

    #[test]
    fn test_general_builder_handles_all_shapes() {
        let filters = spec(vec![
            ("attendance_percentage", FilterValue::Range(80.0, 100.0)),
            ("gender", FilterValue::List(vec!["Male".into(), "Female".into()])),
            ("part_time_job", FilterValue::Scalar(Scalar::Bool(false))),
        ]);
        let clause = build_filter_clause(&filters);
        assert_eq!(
            clause.sql(),
            "\"attendance_percentage\" BETWEEN ? AND ? AND \"gender\" IN (?, ?) AND \"part_time_job\" = ?"
        );
        assert_eq!(clause.params.len(), 5);
    }

    #[test]
    fn test_general_builder_skips_empty_list() {
        let filters = spec(vec![("gender", FilterValue::List(vec![]))]);
        assert!(build_filter_clause(&filters).is_empty());
        assert_eq!(apply_filters("SELECT 1", &filters).sql, "SELECT 1");
    }

    #[test]
    fn test_apply_filters_appends_with_and() {
        let filters = spec(vec![("gender", FilterValue::Scalar("Male".into()))]);
        let result = apply_filters("SELECT * FROM t WHERE x > 1", &filters);
        assert_eq!(result.sql, "SELECT * FROM t WHERE x > 1 AND \"gender\" = ?");
    }

    #[test]
    fn test_validate_filters() {
        assert!(validate_filters(&spec(vec![("a", FilterValue::List(vec![]))])).is_err());
        assert!(validate_filters(&spec(vec![("a", FilterValue::Range(10.0, 5.0))])).is_err());
        assert!(validate_filters(&spec(vec![("a", FilterValue::Range(5.0, 10.0))])).is_ok());
        assert!(validate_filters(&FilterSpec::new()).is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let filters = spec(vec![
            ("a", FilterValue::List(vec![])),
            ("b", FilterValue::Range(3.0, 1.0)),
        ]);
        let FilterError::Invalid(messages) = validate_filters(&filters).unwrap_err();
        assert_eq!(
            messages,
            vec![
                "Filter 'a' has empty list".to_string(),
                "Filter 'b' range start is greater than end".to_string()
            ]
        );
    }

    #[test]
    fn test_bound_query_executes_against_store() {
        let store = Store::in_memory().unwrap();
        let ds = TabularDataset::new(vec![
            Column::new("age", vec![Scalar::Int(18), Scalar::Int(22), Scalar::Int(30)]),
            Column::new("gender", vec!["Male".into(), "Female".into(), "Male".into()]),
        ])
        .unwrap();
        store.import(&ds, "people", ImportMode::Replace).unwrap();

        let filters = spec(vec![
            ("age", FilterValue::Range(18.0, 25.0)),
            ("gender", FilterValue::Scalar("Male".into())),
        ]);
        let query = inject_filters("SELECT * FROM people", &filters, Some(&["age", "gender"]));
        let result = store.query_with_params(&query.sql, &query.params).unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[test]
    fn test_filter_engine_options() {
        let store = Store::in_memory().unwrap();
        let ds = TabularDataset::new(vec![Column::new(
            "gender",
            vec!["Male".into(), "Female".into(), "Male".into()],
        )])
        .unwrap();
        store.import(&ds, "people", ImportMode::Replace).unwrap();

        let engine = FilterEngine::new(&store);
        assert_eq!(
            engine.filter_options("people", "gender").unwrap(),
            vec![Scalar::from("Female"), Scalar::from("Male")]
        );
        assert!(engine.filter_options("people", "missing").is_err());
    }
}
