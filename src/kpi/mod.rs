use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::TabularDataset;
use crate::db::{quote_identifier, Store};
use crate::error::KpiError;
use crate::filter::{inject_filters, FilterSpec};

/// Default table holding the primary (habits) schema
pub const HABITS_TABLE: &str = "student_habits_performance";
/// Default table holding the secondary (factors) schema
pub const FACTORS_TABLE: &str = "student_performance_factors";

/// A logical attribute shared by both source schemas under different names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concept {
    Age,
    Gender,
    ParentalEducation,
    StudyHours,
    Attendance,
    SleepHours,
    ExamScore,
}

/// Concepts every KPI accepts filters on
const FILTER_CONCEPTS: [Concept; 3] = [Concept::Age, Concept::Gender, Concept::ParentalEducation];

/// The two supported source table layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchemaVariant {
    /// `student_habits_performance`: lower-case columns, has `age`
    Habits,
    /// `StudentPerformanceFactors`: capitalised columns, no age
    Factors,
}

impl SchemaVariant {
    pub fn column(self, concept: Concept) -> Option<&'static str> {
        use Concept::*;
        match (self, concept) {
            (SchemaVariant::Habits, Age) => Some("age"),
            (SchemaVariant::Habits, Gender) => Some("gender"),
            (SchemaVariant::Habits, ParentalEducation) => Some("parental_education_level"),
            (SchemaVariant::Habits, StudyHours) => Some("study_hours_per_day"),
            (SchemaVariant::Habits, Attendance) => Some("attendance_percentage"),
            (SchemaVariant::Habits, SleepHours) => Some("sleep_hours"),
            (SchemaVariant::Habits, ExamScore) => Some("exam_score"),
            (SchemaVariant::Factors, Age) => None,
            (SchemaVariant::Factors, Gender) => Some("Gender"),
            (SchemaVariant::Factors, ParentalEducation) => Some("Parental_Education_Level"),
            (SchemaVariant::Factors, StudyHours) => Some("Hours_Studied"),
            (SchemaVariant::Factors, Attendance) => Some("Attendance"),
            (SchemaVariant::Factors, SleepHours) => Some("Sleep_Hours"),
            (SchemaVariant::Factors, ExamScore) => Some("Exam_Score"),
        }
    }

    /// Quoted column name for a concept the variant is known to carry
    fn col(self, concept: Concept) -> String {
        quote_identifier(self.column(concept).unwrap_or_default())
    }
}

/// A schema variant bound to the table that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceTable {
    pub variant: SchemaVariant,
    pub table: String,
}

impl SourceTable {
    pub fn new(variant: SchemaVariant, table: impl Into<String>) -> Self {
        Self {
            variant,
            table: table.into(),
        }
    }

    /// Filterable columns for an attempt: the filter concepts plus the KPI's own
    fn known_columns(&self, kpi: Kpi) -> Vec<&'static str> {
        FILTER_CONCEPTS
            .iter()
            .chain(kpi.concepts())
            .filter_map(|c| self.variant.column(*c))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Kpi {
    ScoresByGroup,
    StudyCorrelation,
    AttendanceImpact,
    SleepPerformance,
}

impl Kpi {
    pub const ALL: [Kpi; 4] = [
        Kpi::ScoresByGroup,
        Kpi::StudyCorrelation,
        Kpi::AttendanceImpact,
        Kpi::SleepPerformance,
    ];

    pub fn number(self) -> u8 {
        match self {
            Kpi::ScoresByGroup => 1,
            Kpi::StudyCorrelation => 2,
            Kpi::AttendanceImpact => 3,
            Kpi::SleepPerformance => 4,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Kpi::ScoresByGroup => "Average Exam Score by Group",
            Kpi::StudyCorrelation => "Study Hours vs Exam Score",
            Kpi::AttendanceImpact => "Attendance Impact",
            Kpi::SleepPerformance => "Sleep vs Performance",
        }
    }

    pub fn output_columns(self) -> &'static [&'static str] {
        match self {
            Kpi::ScoresByGroup => &["group", "average_score", "count"],
            Kpi::StudyCorrelation => &["study_hours", "exam_score"],
            Kpi::AttendanceImpact => &["attendance_range", "average_score", "count"],
            Kpi::SleepPerformance => &["sleep_hours", "exam_score"],
        }
    }

    fn concepts(self) -> &'static [Concept] {
        match self {
            Kpi::ScoresByGroup => &[Concept::ExamScore],
            Kpi::StudyCorrelation => &[Concept::StudyHours, Concept::ExamScore],
            Kpi::AttendanceImpact => &[Concept::Attendance, Concept::ExamScore],
            Kpi::SleepPerformance => &[Concept::SleepHours, Concept::ExamScore],
        }
    }

    /// `(select … from … [where …], grouping/ordering suffix)` for one source
    fn recipe(self, source: &SourceTable) -> (String, String) {
        let v = source.variant;
        let table = quote_identifier(&source.table);
        let exam = v.col(Concept::ExamScore);

        match self {
            Kpi::ScoresByGroup => {
                let gender = v.col(Concept::Gender);
                (
                    format!(
                        "SELECT {gender} AS \"group\", AVG({exam}) AS average_score, COUNT(*) AS \"count\" FROM {table}"
                    ),
                    format!(" GROUP BY {gender} ORDER BY average_score DESC, \"group\" ASC"),
                )
            }
            Kpi::StudyCorrelation => Self::pairs(&v.col(Concept::StudyHours), "study_hours", &exam, &table),
            Kpi::AttendanceImpact => {
                let att = v.col(Concept::Attendance);
                let bucket = format!("ROUND({att} / 10) * 10");
                (
                    format!(
                        "SELECT {bucket} AS attendance_range, AVG({exam}) AS average_score, COUNT(*) AS \"count\" \
                         FROM {table} WHERE {att} IS NOT NULL AND {exam} IS NOT NULL"
                    ),
                    format!(" GROUP BY {bucket} ORDER BY attendance_range"),
                )
            }
            Kpi::SleepPerformance => Self::pairs(&v.col(Concept::SleepHours), "sleep_hours", &exam, &table),
        }
    }

    fn pairs(x: &str, alias: &str, exam: &str, table: &str) -> (String, String) {
        (
            format!(
                "SELECT {x} AS {alias}, {exam} AS exam_score FROM {table} \
                 WHERE {x} IS NOT NULL AND {exam} IS NOT NULL"
            ),
            format!(" ORDER BY {x}"),
        )
    }
}

/// Computes the four KPIs from the store under the current filters.
///
/// Each KPI tries the primary source and falls back to the secondary one when
/// the primary table is missing or yields no rows.
pub struct KpiAggregator<'a> {
    store: &'a Store,
    filters: FilterSpec,
    sources: [SourceTable; 2],
}

impl<'a> KpiAggregator<'a> {
    /// Unfiltered aggregator over a primary and a fallback source
    pub fn new(store: &'a Store, sources: [SourceTable; 2]) -> Self {
        Self {
            store,
            filters: FilterSpec::new(),
            sources,
        }
    }

    pub fn update_filters(&mut self, filters: FilterSpec) {
        self.filters = filters;
    }

    pub fn compute(&self, kpi: Kpi) -> Result<TabularDataset, KpiError> {
        match kpi {
            Kpi::ScoresByGroup => self.scores_by_group(),
            Kpi::StudyCorrelation => self.study_correlation(),
            Kpi::AttendanceImpact => self.attendance_impact(),
            Kpi::SleepPerformance => self.sleep_performance(),
        }
    }

    fn run(&self, kpi: Kpi) -> Result<TabularDataset, KpiError> {
        for source in &self.sources {
            if !self.store.table_exists(&source.table) {
                debug!("KPI {}: table '{}' not loaded, skipping", kpi.number(), source.table);
                continue;
            }

            let (base, suffix) = kpi.recipe(source);
            let known = source.known_columns(kpi);
            let mut query = inject_filters(&base, &self.filters, Some(known.as_slice()));
            query.push_sql(&suffix);

            let result = self
                .store
                .query_with_params(&query.sql, &query.params)
                .map_err(|source| KpiError {
                    kpi: kpi.number(),
                    source,
                })?;

            if !result.is_empty() {
                info!(
                    "📊 KPI {} computed from '{}' ({} rows)",
                    kpi.number(),
                    source.table,
                    result.row_count()
                );
                return Ok(result);
            }
            debug!("KPI {}: '{}' returned no rows", kpi.number(), source.table);
        }

        Ok(TabularDataset::empty(kpi.output_columns()))
    }

    pub fn scores_by_group(&self) -> Result<TabularDataset, KpiError> {
        self.run(Kpi::ScoresByGroup)
    }

    pub fn study_correlation(&self) -> Result<TabularDataset, KpiError> {
        self.run(Kpi::StudyCorrelation)
    }

    pub fn attendance_impact(&self) -> Result<TabularDataset, KpiError> {
        self.run(Kpi::AttendanceImpact)
    }

    pub fn sleep_performance(&self) -> Result<TabularDataset, KpiError> {
        self.run(Kpi::SleepPerformance)
    }

    /// Pearson r over the two columns of a KPI 2 or KPI 4 result
    pub fn correlation(kpi: Kpi, result: &TabularDataset) -> Option<f64> {
        match kpi {
            Kpi::StudyCorrelation | Kpi::SleepPerformance => {
                let cols = kpi.output_columns();
                let (x, y): (Vec<f64>, Vec<f64>) = result.numeric_pairs(cols[0], cols[1]).into_iter().unzip();
                Some(pearson_correlation(&x, &y))
            }
            _ => None,
        }
    }
}

/// Pearson correlation coefficient.
///
/// Returns 0.0 when either side has fewer than two values and NaN when either
/// side has zero variance. Sequences of unequal length are compared over
/// their common prefix.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() < 2 || y.len() < 2 {
        return 0.0;
    }
    let n = x.len().min(y.len());
    let (x, y) = (&x[..n], &y[..n]);

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    cov / denom
}
