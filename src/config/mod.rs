use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::db::{is_valid_identifier, IN_MEMORY};
use crate::ingest::{DedupStrategy, IngestOptions};
use crate::kpi::{FACTORS_TABLE, HABITS_TABLE};

/// Environment variable overriding the store path
pub const DB_PATH_ENV: &str = "STUDENT_ANALYZER_DB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tables: TableConfig,
    pub ingest: IngestConfig,
    pub chart: ChartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `:memory:` or a file path
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: IN_MEMORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub habits: String,
    pub factors: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            habits: HABITS_TABLE.to_string(),
            factors: FACTORS_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_file_size_mb: u64,
    pub dedup: DedupStrategy,
    /// Columns that identify a duplicate row; empty compares whole rows
    pub dedup_subset: Vec<String>,
    pub required_columns: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let defaults = IngestOptions::default();
        Self {
            max_file_size_mb: defaults.max_file_size_mb,
            dedup: defaults.dedup,
            dedup_subset: defaults.dedup_subset,
            required_columns: defaults.required_columns,
        }
    }
}

impl IngestConfig {
    pub fn options(&self) -> IngestOptions {
        IngestOptions {
            max_file_size_mb: self.max_file_size_mb,
            dedup: self.dedup,
            dedup_subset: self.dedup_subset.clone(),
            required_columns: self.required_columns.clone(),
        }
    }
}

/// Text chart size; unset dimensions follow the terminal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(text).context("invalid configuration YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the YAML file (if any), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("⚙️  Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            debug!("Store path overridden by {}", DB_PATH_ENV);
            config.database.path = db_path;
        }
        Ok(config)
    }

    pub fn with_db_path(mut self, path: Option<String>) -> Self {
        if let Some(path) = path {
            self.database.path = path;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        for name in [&self.tables.habits, &self.tables.factors] {
            if !is_valid_identifier(name) {
                bail!("invalid table name in configuration: '{}'", name);
            }
        }
        if self.tables.habits == self.tables.factors {
            bail!("habits and factors tables must differ");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.tables.habits, "student_habits_performance");
        assert_eq!(config.ingest.max_file_size_mb, 50);
        assert_eq!(config.ingest.dedup, DedupStrategy::First);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            "database:\n  path: analyzer.db\ningest:\n  dedup: none\n  dedup_subset: [student_id]\n  required_columns: [gender]\nchart:\n  width: 100\n",
        )
        .unwrap();
        assert_eq!(config.database.path, "analyzer.db");
        assert_eq!(config.ingest.dedup, DedupStrategy::None);
        assert_eq!(config.ingest.required_columns, vec!["gender"]);
        assert_eq!(config.ingest.options().dedup_subset, vec!["student_id"]);
        assert_eq!(config.tables.factors, "student_performance_factors");
        assert_eq!(config.chart.width, Some(100));
        assert_eq!(config.chart.height, None);
    }

    #[test]
    fn test_rejects_bad_table_name() {
        assert!(AppConfig::from_yaml("tables:\n  habits: bad-name\n").is_err());
        assert!(AppConfig::from_yaml("tables:\n  habits: same\n  factors: same\n").is_err());
    }

    #[test]
    fn test_cli_path_wins() {
        let config = AppConfig::default().with_db_path(Some("session.db".to_string()));
        assert_eq!(config.database.path, "session.db");
    }
}
