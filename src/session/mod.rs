use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dataset::{Scalar, TabularDataset};
use crate::db::{ImportMode, Store};
use crate::error::{FilterError, StoreError, UploadError};
use crate::filter::{validate_filters, FilterSpec, FilterValue, AGE_ATTRIBUTE};
use crate::ingest::{load_upload, FileInfo};
use crate::kpi::{Concept, Kpi, KpiAggregator, SchemaVariant, SourceTable};

/// Age slider bounds used when no age column is loaded
pub const DEFAULT_AGE_BOUNDS: (f64, f64) = (17.0, 24.0);

/// Which of the two supported uploads a file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetKind {
    Habits,
    Factors,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Habits => write!(f, "habits"),
            DatasetKind::Factors => write!(f, "factors"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub table: String,
    pub rows: usize,
    pub duplicates_removed: usize,
    pub encoding: &'static str,
    pub file: FileInfo,
}

/// One dashboard cell: a KPI and either its rows or the error to display.
#[derive(Debug, Clone)]
pub struct KpiPanel {
    pub kpi: Kpi,
    pub result: Result<TabularDataset, String>,
}

impl KpiPanel {
    /// Pearson r for the scatter KPIs when the panel holds data
    pub fn correlation(&self) -> Option<f64> {
        match &self.result {
            Ok(data) if !data.is_empty() => KpiAggregator::correlation(self.kpi, data),
            _ => None,
        }
    }
}

/// A single user's analysis session: its own store, filters and load state.
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    store: Store,
    filters: FilterSpec,
    data_loaded: bool,
    config: AppConfig,
}

impl Session {
    pub fn start(config: AppConfig) -> Result<Self, StoreError> {
        let store = Store::open(&config.database.path)?;
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("🚀 Session {} started at {}", id, started_at.format("%Y-%m-%d %H:%M:%S"));

        let mut session = Self {
            id,
            started_at,
            store,
            filters: FilterSpec::new(),
            data_loaded: false,
            config,
        };
        // A file-backed store may already hold tables from an earlier run
        session.data_loaded = !session.loaded_tables().is_empty();
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn table_for(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Habits => &self.config.tables.habits,
            DatasetKind::Factors => &self.config.tables.factors,
        }
    }

    fn sources(&self) -> [SourceTable; 2] {
        [
            SourceTable::new(SchemaVariant::Habits, self.config.tables.habits.clone()),
            SourceTable::new(SchemaVariant::Factors, self.config.tables.factors.clone()),
        ]
    }

    /// Parse an uploaded CSV and load it into the matching table
    pub fn upload(
        &mut self,
        kind: DatasetKind,
        bytes: &[u8],
        mode: ImportMode,
    ) -> Result<ImportSummary, UploadError> {
        let loaded = load_upload(bytes, &self.config.ingest.options())?;
        let table = self.table_for(kind).to_string();
        self.store.import(&loaded.dataset, &table, mode)?;
        self.data_loaded = true;

        info!("✅ Loaded {} data into '{}' ({} rows)", kind, table, loaded.dataset.row_count());
        Ok(ImportSummary {
            table,
            rows: loaded.dataset.row_count(),
            duplicates_removed: loaded.duplicates_removed,
            encoding: loaded.encoding.label(),
            file: FileInfo::of(&loaded.dataset),
        })
    }

    pub fn set_filter(&mut self, attribute: &str, value: FilterValue) -> Result<(), FilterError> {
        let mut candidate = FilterSpec::new();
        candidate.insert(attribute.to_string(), value.clone());
        validate_filters(&candidate)?;

        debug!("Filter set: {} = {}", attribute, value);
        self.filters.insert(attribute.to_string(), value);
        Ok(())
    }

    pub fn remove_filter(&mut self, attribute: &str) -> Option<FilterValue> {
        self.filters.remove(attribute)
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn is_loaded(&self) -> bool {
        self.data_loaded
    }

    /// Configured source tables currently present in the store
    pub fn loaded_tables(&self) -> BTreeSet<String> {
        self.sources()
            .into_iter()
            .map(|s| s.table)
            .filter(|t| self.store.table_exists(t))
            .collect()
    }

    /// Distinct gender labels from the first source table that has them
    pub fn gender_options(&self) -> Vec<String> {
        for source in self.sources() {
            let Some(column) = source.variant.column(Concept::Gender) else {
                continue;
            };
            if !self.store.table_exists(&source.table) {
                continue;
            }
            match self.store.distinct_values(&source.table, column) {
                Ok(values) if !values.is_empty() => {
                    return values.iter().filter_map(Scalar::as_str).map(str::to_string).collect();
                }
                Ok(_) => {}
                Err(e) => warn!("Could not read gender options from '{}': {}", source.table, e),
            }
        }
        Vec::new()
    }

    /// Observed age range, or the default bounds when unavailable
    pub fn age_bounds(&self) -> (f64, f64) {
        let table = &self.config.tables.habits;
        if !self.store.table_exists(table) {
            return DEFAULT_AGE_BOUNDS;
        }
        self.store
            .column_range(table, AGE_ATTRIBUTE)
            .unwrap_or(DEFAULT_AGE_BOUNDS)
    }

    /// All four KPIs under the current filters; failures stay inside their panel
    pub fn compute_dashboard(&self) -> [KpiPanel; 4] {
        let mut aggregator = KpiAggregator::new(&self.store, self.sources());
        aggregator.update_filters(self.filters.clone());
        Kpi::ALL.map(|kpi| {
            let result = aggregator.compute(kpi).map_err(|e| {
                warn!("⚠️  {}", e);
                e.to_string()
            });
            KpiPanel { kpi, result }
        })
    }

    pub fn end(self) -> Result<(), StoreError> {
        let elapsed = Utc::now() - self.started_at;
        self.store.close()?;
        info!("👋 Session {} ended after {}s", self.id, elapsed.num_seconds());
        Ok(())
    }
}
