use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::dashboard::Dashboard;
use crate::config::AppConfig;
use crate::dataset::{Scalar, TabularDataset};
use crate::db::{quote_identifier, validate_identifier, ImportMode, Store};
use crate::filter::{apply_filters, validate_filters, FilterEngine, FilterSpec, FilterValue, AGE_ATTRIBUTE};
use crate::plotting::{format_correlation, KpiChartRenderer};
use crate::session::{DatasetKind, ImportSummary, Session};

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum KpiFormat {
    Chart,
    Table,
    Json,
    Csv,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DatasetKindArg {
    Habits,
    Factors,
}

impl From<DatasetKindArg> for DatasetKind {
    fn from(kind: DatasetKindArg) -> Self {
        match kind {
            DatasetKindArg::Habits => DatasetKind::Habits,
            DatasetKindArg::Factors => DatasetKind::Factors,
        }
    }
}

/// Behaviour of `import` when the target table already exists
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum IfExistsArg {
    Replace,
    Append,
    Fail,
}

impl From<IfExistsArg> for ImportMode {
    fn from(arg: IfExistsArg) -> Self {
        match arg {
            IfExistsArg::Replace => ImportMode::Replace,
            IfExistsArg::Append => ImportMode::Append,
            IfExistsArg::Fail => ImportMode::Fail,
        }
    }
}

/// Spinner shown while a file is parsed and loaded
fn create_spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

async fn upload_file(session: &mut Session, kind: DatasetKind, path: &Path, mode: ImportMode) -> Result<ImportSummary> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let spinner = create_spinner(&format!("Loading {} ({} bytes)", path.display(), bytes.len()))?;
    let result = session.upload(kind, &bytes, mode);
    spinner.finish_and_clear();

    let summary = result.with_context(|| format!("failed to import {}", path.display()))?;
    Ok(summary)
}

/// Load the optional `--habits` / `--factors` files into a session
async fn load_inputs(session: &mut Session, habits: Option<&Path>, factors: Option<&Path>) -> Result<()> {
    for (kind, path) in [(DatasetKind::Habits, habits), (DatasetKind::Factors, factors)] {
        if let Some(path) = path {
            let summary = upload_file(session, kind, path, ImportMode::Replace).await?;
            info!(
                "📥 {} → '{}' ({} rows, {} duplicates removed)",
                path.display(),
                summary.table,
                summary.rows,
                summary.duplicates_removed
            );
        }
    }
    Ok(())
}

/// Parse an `LO-HI` age range such as `18-22`
pub fn parse_age_range(text: &str) -> Result<(f64, f64)> {
    let (lo, hi) = text
        .split_once('-')
        .ok_or_else(|| anyhow!("age range must look like LO-HI, got '{}'", text))?;
    let lo: f64 = lo.trim().parse().with_context(|| format!("invalid lower age '{}'", lo))?;
    let hi: f64 = hi.trim().parse().with_context(|| format!("invalid upper age '{}'", hi))?;
    Ok((lo, hi))
}

fn parse_scalar(text: &str) -> Scalar {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        Scalar::Int(v)
    } else if let Ok(v) = text.parse::<f64>() {
        Scalar::Float(v)
    } else {
        Scalar::Text(text.to_string())
    }
}

/// Parse `col=value`, `col=lo..hi` or `col=a|b|c` into a named filter
pub fn parse_filter(text: &str) -> Result<(String, FilterValue)> {
    let (column, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("filter must look like COLUMN=VALUE, got '{}'", text))?;
    let column = column.trim();
    if column.is_empty() {
        bail!("filter '{}' has no column name", text);
    }

    let value = if value.contains('|') {
        FilterValue::List(
            value
                .split('|')
                .filter(|part| !part.trim().is_empty())
                .map(parse_scalar)
                .collect(),
        )
    } else if let Some((lo, hi)) = value.split_once("..") {
        let lo: f64 = lo.trim().parse().with_context(|| format!("invalid range start '{}'", lo))?;
        let hi: f64 = hi.trim().parse().with_context(|| format!("invalid range end '{}'", hi))?;
        FilterValue::Range(lo, hi)
    } else {
        FilterValue::Scalar(parse_scalar(value))
    };
    Ok((column.to_string(), value))
}

/// Rows of `table` matching every filter, optionally capped at `limit`
pub fn select_rows(store: &Store, table: &str, filters: &FilterSpec, limit: Option<usize>) -> Result<TabularDataset> {
    validate_identifier(table)?;
    validate_filters(filters)?;
    if !store.table_exists(table) {
        bail!("table '{}' does not exist", table);
    }

    let mut query = apply_filters(&format!("SELECT * FROM {}", quote_identifier(table)), filters);
    if let Some(limit) = limit {
        query.push_sql(&format!(" LIMIT {}", limit));
    }
    Ok(store.query_with_params(&query.sql, &query.params)?)
}

fn print_dataset(dataset: &TabularDataset, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_table(dataset),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(dataset)?),
        OutputFormat::Csv => print!("{}", to_csv(dataset)),
    }
    Ok(())
}

fn print_table(dataset: &TabularDataset) {
    println!("{}", dataset.column_names().join(" | "));
    println!("{:-<80}", "");
    for row in dataset.rows() {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join(" | "));
    }
    println!("({} rows)", dataset.row_count());
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Header plus one line per row; nulls become empty fields
pub fn to_csv(dataset: &TabularDataset) -> String {
    let mut out = dataset
        .column_names()
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for row in dataset.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|v| if v.is_null() { String::new() } else { csv_field(&v.to_string()) })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

#[derive(Args)]
pub struct DashboardCommand {
    /// CSV with the habits schema (student_habits_performance)
    #[arg(long)]
    pub habits: Option<PathBuf>,

    /// CSV with the factors schema (StudentPerformanceFactors)
    #[arg(long)]
    pub factors: Option<PathBuf>,
}

impl DashboardCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let mut session = Session::start(config)?;
        load_inputs(&mut session, self.habits.as_deref(), self.factors.as_deref()).await?;

        let session = Dashboard::new(session).run()?;
        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct KpiCommand {
    #[arg(long)]
    pub habits: Option<PathBuf>,

    #[arg(long)]
    pub factors: Option<PathBuf>,

    /// Only include this gender
    #[arg(long)]
    pub gender: Option<String>,

    /// Age range as LO-HI (habits data only)
    #[arg(long)]
    pub age: Option<String>,

    /// Only include this parental education level
    #[arg(long)]
    pub education: Option<String>,

    #[arg(short, long, value_enum, default_value = "chart")]
    pub format: KpiFormat,
}

impl KpiCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let renderer = KpiChartRenderer::from_config(&config.chart);
        let mut session = Session::start(config)?;
        load_inputs(&mut session, self.habits.as_deref(), self.factors.as_deref()).await?;

        if !session.is_loaded() {
            println!("⚠️  No data loaded. Pass --habits and/or --factors, or point --db at a populated store.");
            return session.end().map_err(Into::into);
        }

        if let Some(gender) = &self.gender {
            session.set_filter("gender", FilterValue::Scalar(gender.as_str().into()))?;
        }
        if let Some(education) = &self.education {
            session.set_filter("parental_education_level", FilterValue::Scalar(education.as_str().into()))?;
        }
        if let Some(age) = &self.age {
            let (lo, hi) = parse_age_range(age)?;
            session.set_filter(AGE_ATTRIBUTE, FilterValue::Range(lo, hi))?;
        }

        let panels = session.compute_dashboard();
        match self.format {
            KpiFormat::Chart => {
                for panel in &panels {
                    println!("\n{}", renderer.render_panel(panel));
                }
            }
            KpiFormat::Table | KpiFormat::Csv => {
                for panel in &panels {
                    println!("\n📊 KPI {}: {}", panel.kpi.number(), panel.kpi.title());
                    match &panel.result {
                        Ok(data) if matches!(self.format, KpiFormat::Csv) => print!("{}", to_csv(data)),
                        Ok(data) => print_table(data),
                        Err(message) => println!("❌ {}", message),
                    }
                    if let Some(r) = panel.correlation() {
                        println!("{}", format_correlation(r));
                    }
                }
            }
            KpiFormat::Json => {
                let report: Vec<serde_json::Value> = panels
                    .iter()
                    .map(|panel| match &panel.result {
                        Ok(data) => json!({
                            "kpi": panel.kpi.number(),
                            "title": panel.kpi.title(),
                            "rows": data,
                            "correlation": panel.correlation().filter(|r| r.is_finite()),
                        }),
                        Err(message) => json!({
                            "kpi": panel.kpi.number(),
                            "title": panel.kpi.title(),
                            "error": message,
                        }),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }

        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct ImportCommand {
    /// CSV file to import
    #[arg(short, long)]
    pub file: PathBuf,

    /// Which schema the file follows
    #[arg(short, long, value_enum)]
    pub kind: DatasetKindArg,

    /// What to do when the table already exists
    #[arg(long, value_enum, default_value = "replace")]
    pub if_exists: IfExistsArg,
}

impl ImportCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let mut session = Session::start(config)?;
        let summary = upload_file(&mut session, self.kind.into(), &self.file, self.if_exists.into()).await?;

        println!("✅ Imported {} into '{}' ({:?})", self.file.display(), summary.table, self.if_exists);
        println!("  📈 Rows: {}", summary.rows);
        println!("  📋 Columns ({}): {}", summary.file.column_count, summary.file.columns.join(", "));
        println!("  🔤 Encoding: {}", summary.encoding);
        println!("  🧹 Duplicates removed: {}", summary.duplicates_removed);
        if session.store().path() == crate::db::IN_MEMORY {
            println!("\n💡 Tip: the store is in-memory; use --db <file> to keep imported tables");
        }

        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct TablesCommand {}

impl TablesCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let session = Session::start(config)?;
        let store = session.store();
        let tables = store.list_tables()?;

        println!("\n🗄️  Tables in {}:", store.path());
        println!("{:-<60}", "");
        if tables.is_empty() {
            println!("  (none)");
        }
        for name in &tables {
            let info = store.describe_table(name)?;
            println!("  • {} ({} rows, {} columns)", info.name, info.row_count, info.column_count());
        }

        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct DescribeCommand {
    pub table: String,

    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl DescribeCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let session = Session::start(config)?;
        let info = session.store().describe_table(&self.table)?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            OutputFormat::Csv => {
                println!("column,type");
                for column in &info.columns {
                    println!("{},{}", csv_field(&column.name), column.data_type);
                }
            }
            OutputFormat::Table => {
                println!("\n📋 {} ({} rows)", info.name, info.row_count);
                println!("{:-<60}", "");
                for column in &info.columns {
                    println!("  {:<32} {}", column.name, column.data_type);
                }
            }
        }

        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct QueryCommand {
    /// SQL to run against the store
    pub sql: String,

    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl QueryCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let session = Session::start(config)?;
        let result = session.store().query(&self.sql)?;
        print_dataset(&result, &self.format)?;
        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct SelectCommand {
    pub table: String,

    /// COLUMN=VALUE, COLUMN=LO..HI or COLUMN=A|B (repeatable)
    #[arg(long = "filter", value_name = "FILTER")]
    pub filters: Vec<String>,

    #[arg(short, long)]
    pub limit: Option<usize>,

    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl SelectCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let mut filters = FilterSpec::new();
        for text in &self.filters {
            let (column, value) = parse_filter(text)?;
            filters.insert(column, value);
        }

        let session = Session::start(config)?;
        let result = select_rows(session.store(), &self.table, &filters, self.limit)?;
        print_dataset(&result, &self.format)?;
        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct DropCommand {
    pub table: String,
}

impl DropCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let session = Session::start(config)?;
        if !session.store().table_exists(&self.table) {
            println!("⚠️  No table named '{}'", self.table);
        } else {
            session.store().drop_table(&self.table)?;
            println!("🗑️  Dropped '{}'", self.table);
        }
        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct OptionsCommand {
    pub table: String,
    pub column: String,

    /// Print the numeric min/max instead of distinct values
    #[arg(long)]
    pub range: bool,
}

impl OptionsCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        let session = Session::start(config)?;
        let engine = FilterEngine::new(session.store());

        if self.range {
            let (min, max) = engine.column_range(&self.table, &self.column)?;
            println!("{}.{}: {} to {}", self.table, self.column, min, max);
        } else {
            let values = engine.filter_options(&self.table, &self.column)?;
            println!("{}.{} ({} distinct values):", self.table, self.column, values.len());
            for value in values {
                println!("  • {}", value);
            }
        }

        session.end()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct MergeCommand {
    pub left: String,
    pub right: String,

    /// Join column present in both tables
    #[arg(long)]
    pub on: String,

    /// Name of the merged table
    #[arg(long)]
    pub into: String,
}

impl MergeCommand {
    pub async fn execute(self, config: AppConfig) -> Result<()> {
        if self.into == self.left || self.into == self.right {
            bail!("output table must differ from the merged tables");
        }
        let session = Session::start(config)?;
        session.store().merge(&self.left, &self.right, &self.on, &self.into)?;

        let info = session.store().describe_table(&self.into)?;
        println!(
            "🔗 Merged '{}' and '{}' into '{}' ({} rows, {} columns)",
            self.left,
            self.right,
            info.name,
            info.row_count,
            info.column_count()
        );

        session.end()?;
        Ok(())
    }
}
