use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

mod cli;
mod config;
mod dataset;
mod db;
mod error;
mod filter;
mod ingest;
mod kpi;
mod plotting;
mod session;

use cli::commands::{
    DashboardCommand, DescribeCommand, DropCommand, ImportCommand, KpiCommand, MergeCommand, OptionsCommand,
    QueryCommand, SelectCommand, TablesCommand,
};
use config::AppConfig;

/// Log file used while the dashboard owns the terminal
const DASHBOARD_LOG: &str = "student_analyzer_dashboard.log";

#[derive(Parser)]
#[command(name = "student-analyzer")]
#[command(about = "Student performance KPI dashboard backed by an embedded DuckDB store")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store path (`:memory:` or a DuckDB file); overrides config and environment
    #[arg(long, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal dashboard with the four KPIs
    Dashboard(DashboardCommand),
    /// Compute and print all four KPIs
    Kpi(KpiCommand),
    /// Import a CSV file into the store
    Import(ImportCommand),
    /// List tables with row counts
    Tables(TablesCommand),
    /// Show a table's row count and column types
    Describe(DescribeCommand),
    /// Run an ad-hoc SQL query
    Query(QueryCommand),
    /// Rows of a table narrowed by --filter expressions
    Select(SelectCommand),
    /// Delete a table from the store
    Drop(DropCommand),
    /// Distinct values (or numeric range) of a column
    Options(OptionsCommand),
    /// Full outer join of two tables into a new table
    Merge(MergeCommand),
}

fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let base_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::new(format!(
        "student_analyzer={}",
        if verbose { "debug" } else { "info" }
    ));

    if to_file {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(DASHBOARD_LOG)
            .with_context(|| format!("failed to open {}", DASHBOARD_LOG))?;
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep polars from grabbing every core for CSV parsing
    let max_polars_threads = std::cmp::min(4, num_cpus::get());
    std::env::set_var("POLARS_MAX_THREADS", max_polars_threads.to_string());

    init_logging(cli.verbose, matches!(cli.command, Commands::Dashboard(_)))?;
    debug!("🧵 Limited Polars to {} threads", max_polars_threads);
    info!("Starting student-analyzer v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(cli.config.as_deref())?.with_db_path(cli.db);

    match cli.command {
        Commands::Dashboard(cmd) => cmd.execute(config).await,
        Commands::Kpi(cmd) => cmd.execute(config).await,
        Commands::Import(cmd) => cmd.execute(config).await,
        Commands::Tables(cmd) => cmd.execute(config).await,
        Commands::Describe(cmd) => cmd.execute(config).await,
        Commands::Query(cmd) => cmd.execute(config).await,
        Commands::Select(cmd) => cmd.execute(config).await,
        Commands::Drop(cmd) => cmd.execute(config).await,
        Commands::Options(cmd) => cmd.execute(config).await,
        Commands::Merge(cmd) => cmd.execute(config).await,
    }
}
