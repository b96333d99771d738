//! Command line surface over the warehouse engine.
//!
//! Argument parsing and configuration assembly live here so they can be
//! tested without a database; `main.rs` only installs logging and runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retaildwh_core::{CleanedBatch, QualifiedName};
use retaildwh_engine::config::{parse_years, DATABASE_URL_VAR};
use retaildwh_engine::{Warehouse, WarehouseConfig};
use retaildwh_postgres::{connect, fetch_cleaned_batch, PgSession};
use serde::Serialize;
use tracing::{info, warn};

/// Schema assumed for a staging table given without one.
pub const DEFAULT_STAGING_SCHEMA: &str = "public";

#[derive(Parser, Debug)]
#[command(name = "retaildwh", author, version, about = "Retail warehouse load and metadata tools")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for values otherwise read from the environment.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// PostgreSQL connection string
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Pool size
    #[arg(long, global = true)]
    pub max_connections: Option<u32>,

    /// Seconds to wait for a pooled connection
    #[arg(long, global = true)]
    pub acquire_timeout_secs: Option<u64>,

    /// Fact rows per commit
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Comma separated years to declare month partitions for
    #[arg(long, global = true)]
    pub years: Option<String>,

    /// Source name recorded in run names and lineage
    #[arg(long, global = true)]
    pub source_table: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create schemas, partitions and indexes and populate the catalog
    Setup,
    /// Load one cleaned batch into the warehouse
    Load(LoadArgs),
    /// Show a catalog object with its columns, lineage and quality metrics
    Describe(DescribeArgs),
    /// Mark runs stuck in RUNNING as FAILED
    ReapStaleRuns(ReapArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// JSON file holding an array of cleaned rows
    #[arg(long, conflicts_with = "staging_table", required_unless_present = "staging_table")]
    pub batch: Option<PathBuf>,

    /// Already cleaned staging table, as `table` or `schema.table`
    #[arg(long)]
    pub staging_table: Option<String>,
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    pub schema: String,
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ReapArgs {
    /// Only runs started longer ago than this are reaped
    #[arg(long, default_value_t = 24 * 60 * 60)]
    pub older_than_secs: u64,
}

/// Environment configuration with the flags in `args` applied on top.
pub fn build_config(args: &ConnectionArgs, base: WarehouseConfig) -> Result<WarehouseConfig> {
    let mut config = base;
    if let Some(url) = &args.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(secs) = args.acquire_timeout_secs {
        config.acquire_timeout = Duration::from_secs(secs);
    }
    if let Some(size) = args.batch_size {
        config.fact_batch_size = size;
    }
    if let Some(years) = &args.years {
        config.partition_years = parse_years(years)?;
    }
    if let Some(source) = &args.source_table {
        config.source_table = source.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Read a batch file: a JSON array of rows with the eight contract columns.
pub fn read_batch_file(path: &Path) -> Result<CleanedBatch> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("unable to read batch file {}", path.display()))?;
    let batch: CleanedBatch = serde_json::from_str(&raw)
        .with_context(|| format!("invalid batch file {}", path.display()))?;
    info!(path = %path.display(), rows = batch.len(), "Read cleaned batch file");
    Ok(batch)
}

/// Parse `table` or `schema.table`.
pub fn parse_staging_table(raw: &str) -> Result<QualifiedName> {
    let (schema, table) = match raw.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (DEFAULT_STAGING_SCHEMA, raw),
    };
    if table.contains('.') {
        bail!("staging table {raw:?} has more than one schema qualifier");
    }
    Ok(QualifiedName::parse(schema, table)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Execute the parsed command. Returns whether it succeeded; a load that
/// ran but ended FAILED is reported, not raised.
pub async fn run(cli: Cli) -> Result<bool> {
    let config = build_config(&cli.connection, WarehouseConfig::from_env()?)?;
    let database_url = config
        .require_database_url()
        .with_context(|| format!("pass --database-url or set {DATABASE_URL_VAR}"))?
        .to_string();

    // The batch file is read before connecting so a bad file fails fast.
    let batch_file = match &cli.command {
        Commands::Load(LoadArgs { batch: Some(path), .. }) => Some(read_batch_file(path)?),
        _ => None,
    };

    let pool = connect(&database_url, config.max_connections, config.acquire_timeout).await?;
    let mut session = PgSession::acquire(&pool).await?;
    let warehouse = Warehouse::new(config)?;

    match cli.command {
        Commands::Setup => {
            let report = warehouse.setup(&mut session).await?;
            print_json(&report)?;
            Ok(true)
        }
        Commands::Load(args) => {
            let batch = match (batch_file, args.staging_table) {
                (Some(batch), _) => batch,
                (None, Some(raw)) => {
                    let table = parse_staging_table(&raw)?;
                    fetch_cleaned_batch(&mut session, &table).await?
                }
                (None, None) => bail!("pass --batch or --staging-table"),
            };
            let report = warehouse.load(&mut session, &batch).await;
            print_json(&report)?;
            if !report.succeeded() {
                warn!(run_id = ?report.run_id, "Load did not succeed");
            }
            Ok(report.succeeded())
        }
        Commands::Describe(args) => {
            match warehouse.describe(&mut session, &args.schema, &args.name).await? {
                Some(description) => {
                    print_json(&description)?;
                    Ok(true)
                }
                None => {
                    warn!(schema = %args.schema, name = %args.name, "Object is not registered");
                    Ok(false)
                }
            }
        }
        Commands::ReapStaleRuns(args) => {
            let older_than = Duration::from_secs(args.older_than_secs);
            let reaped = warehouse.reap_stale_runs(&mut session, older_than).await?;
            print_json(&serde_json::json!({ "reaped": reaped }))?;
            Ok(true)
        }
    }
}
