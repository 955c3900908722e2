//! AlphaLab CLI: collect, verify and inspect stored OHLCV data.
//!
//! Commands:
//! - `collect`: fetch the universe, write per-field Parquet files, verify, write the manifest
//! - `verify`: check stored files without fetching
//! - `status`: report storage layout, file counts and the last manifest
//! - `symbols`: print the discovered spot universe

mod obs;

use alphalab_core::data::provider::{OhlcvSource, SourceMode, StdoutProgress};
use alphalab_core::data::{FieldStore, RunManifest, StorageError, Universe, Validator};
use alphalab_core::domain::{Field, Interval, Symbol};
use alphalab_core::{CollectorConfig, Pipeline, RunReport};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "alphalab",
    version,
    about = "AlphaLab crypto OHLCV collector"
)]
struct Cli {
    /// Log filter used when ALPHALAB_LOG is unset (e.g. info, alphalab_core=debug).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the deterministic mock source.
    #[arg(long, conflicts_with = "live")]
    mock: bool,

    /// Use the live exchange API.
    #[arg(long)]
    live: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, store and verify OHLCV data for the configured universe.
    Collect {
        #[command(flatten)]
        source: SourceArgs,

        /// Symbols to collect (e.g. BTCUSDT ETHUSDT). Overrides the config universe.
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD), exclusive. Defaults to today (UTC).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Candle interval: 1m, 5m, 15m, 1h, 4h, 1d or 1w.
        #[arg(long)]
        interval: Option<Interval>,

        /// Storage root. Defaults to storage/ohlcv.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Fields to store (open, high, low, close, volume).
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        fields: Vec<Field>,
    },
    /// Verify stored files without fetching anything.
    Verify {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Symbols to verify. Defaults to the config universe.
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        symbols: Vec<String>,

        /// Fields to verify.
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        fields: Vec<Field>,

        /// Storage root.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Report storage layout, file counts and the last run manifest.
    Status {
        /// Storage root. Defaults to storage/ohlcv.
        #[arg(long, default_value = "storage/ohlcv")]
        root: PathBuf,
    },
    /// Print the spot universe discovered from the exchange listing.
    Symbols {
        #[command(flatten)]
        source: SourceArgs,

        /// Maximum number of symbols.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    obs::init_tracing(&cli.log_level, &cli.log_format).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Collect {
            source,
            symbols,
            start,
            end,
            interval,
            root,
            fields,
        } => {
            let mut config = load_config(source.config.as_deref())?;
            apply_source_mode(&mut config, &source);
            if !symbols.is_empty() {
                config.universe.symbols = symbols;
                config.universe.discover = false;
            }
            if let Some(start) = start {
                config.range.start = start;
            }
            if end.is_some() {
                config.range.end = end;
            }
            if let Some(interval) = interval {
                config.range.interval = interval;
            }
            apply_storage(&mut config, root, fields);
            run_collect(&config)
        }
        Commands::Verify {
            config,
            symbols,
            fields,
            root,
        } => {
            let mut config = load_config(config.as_deref())?;
            if !symbols.is_empty() {
                config.universe.symbols = symbols;
                config.universe.discover = false;
            }
            apply_storage(&mut config, root, fields);
            run_verify(&config)
        }
        Commands::Status { root } => run_status(&root),
        Commands::Symbols { source, limit } => {
            let mut config = load_config(source.config.as_deref())?;
            apply_source_mode(&mut config, &source);
            if let Some(limit) = limit {
                config.universe.limit = limit;
            }
            run_symbols(&config)
        }
    }
}

/// Parse the config file (or defaults). Validation happens after CLI overrides.
fn load_config(path: Option<&Path>) -> Result<CollectorConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(CollectorConfig::from_toml(&content)?)
        }
        None => Ok(CollectorConfig::default()),
    }
}

fn apply_source_mode(config: &mut CollectorConfig, args: &SourceArgs) {
    if args.live {
        config.source.mode = SourceMode::Live;
    } else if args.mock {
        config.source.mode = SourceMode::Mock;
    }
}

fn apply_storage(config: &mut CollectorConfig, root: Option<PathBuf>, fields: Vec<Field>) {
    if let Some(root) = root {
        config.storage.root = root;
    }
    if !fields.is_empty() {
        config.storage.fields = fields;
    }
}

fn run_collect(config: &CollectorConfig) -> Result<()> {
    config.validate()?;
    let source = config.build_source()?;
    let universe = config
        .resolve_universe(source.as_ref())
        .context("resolving symbol universe")?;
    if universe.is_empty() {
        bail!("symbol universe is empty");
    }

    let range = config.time_range();
    println!(
        "Collecting {} symbol(s) from {} ({} {}) into {}",
        universe.len(),
        source.name(),
        range,
        config.range.interval,
        config.storage.root.display()
    );

    let report = Pipeline::from_config(config, source.as_ref()).run(&universe, &StdoutProgress);
    print_summary(&report, &config.storage.fields);

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Validate the merged config and pick the symbols to check.
/// With discovery on, that is every symbol stored for the first field.
fn verify_targets(config: &CollectorConfig) -> Result<(FieldStore, Vec<Symbol>)> {
    config.validate()?;
    let store = FieldStore::new(&config.storage.root);
    let symbols = match (config.universe.discover, config.storage.fields.first()) {
        (true, Some(&field)) => store.list_symbols(field)?,
        _ => config.universe.symbols.clone(),
    };
    Ok((store, symbols))
}

fn run_verify(config: &CollectorConfig) -> Result<()> {
    let (store, symbols) = verify_targets(config)?;
    let discrepancies = Validator::new(&store).verify(&symbols, &config.storage.fields);
    println!(
        "Verified {} symbol(s) x {} field(s) under {}",
        symbols.len(),
        config.storage.fields.len(),
        store.root().display()
    );

    if discrepancies.is_empty() {
        println!("No discrepancies.");
        return Ok(());
    }
    println!("{} discrepancy(ies):", discrepancies.len());
    for d in &discrepancies {
        println!("  {d}");
    }
    std::process::exit(1);
}

fn run_status(root: &Path) -> Result<()> {
    if !root.exists() {
        println!("Storage root does not exist: {}", root.display());
        return Ok(());
    }

    let store = FieldStore::new(root);
    println!("Storage: {}", root.display());
    println!();
    println!("{:<8} {:>8} {:>10}", "Field", "Files", "Size");
    println!("{}", "-".repeat(28));

    let mut total_size = 0u64;
    for field in Field::ALL {
        let dir = store.field_dir(field);
        let files = store.list_symbols(field)?.len();
        let size = dir_size(&dir);
        total_size += size;
        println!("{:<8} {:>8} {:>10}", field, files, format_size(size));
    }
    println!("Total size: {}", format_size(total_size));
    println!();

    match RunManifest::load(root) {
        Ok(manifest) => print_manifest(&manifest),
        Err(StorageError::NotFound { .. }) => println!("No run manifest yet."),
        Err(e) => println!("WARNING: {e}"),
    }
    Ok(())
}

fn run_symbols(config: &CollectorConfig) -> Result<()> {
    let source = config.build_source()?;
    let universe = Universe::discover(
        source.as_ref(),
        &config.universe.quote_priority,
        config.universe.limit,
    )
    .context("discovering symbols")?;

    println!(
        "Top {} spot symbol(s) from {}:",
        universe.len(),
        source.name()
    );
    for (i, symbol) in universe.symbols().iter().enumerate() {
        println!("{:>3}. {symbol}", i + 1);
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_summary(report: &RunReport, fields: &[Field]) {
    let field_names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
    println!();
    println!("=== Collection Summary ===");
    println!("Fields:         {}", field_names.join(", "));
    println!("Succeeded:      {}", report.succeeded.len());
    if !report.from_store.is_empty() {
        println!("From store:     {}", report.from_store.len());
    }
    println!("Failed:         {}", report.failures.len());
    println!("Files written:  {}", report.files_written);
    if let Some(path) = &report.manifest_path {
        println!("Manifest:       {}", path.display());
    }

    if !report.from_store.is_empty() {
        println!();
        println!("--- Served from stored files ---");
        for f in &report.from_store {
            println!("{:<12} fetch failed: {}", f.symbol, f.error);
        }
    }
    if !report.failures.is_empty() {
        println!();
        println!("--- Fetch failures ---");
        for f in &report.failures {
            println!("{:<12} after {} attempt(s): {}", f.symbol, f.attempts, f.error);
        }
    }
    if !report.storage_errors.is_empty() {
        println!();
        println!("--- Storage errors ---");
        for e in &report.storage_errors {
            println!("{}/{}: {}", e.field, e.symbol, e.error);
        }
    }
    if let Some(e) = &report.manifest_error {
        println!("WARNING: manifest not written: {e}");
    }
    if !report.discrepancies.is_empty() {
        println!();
        println!("--- Discrepancies ---");
        for d in &report.discrepancies {
            println!("{d}");
        }
    }
    println!();
}

fn print_manifest(manifest: &RunManifest) {
    println!("=== Last Run ===");
    println!("At:       {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Source:   {} ({})", manifest.source, manifest.interval);
    println!(
        "Range:    {} to {}",
        manifest.range_start.date_naive(),
        manifest.range_end.date_naive()
    );
    println!();
    println!(
        "{:<12} {:>7} {:<12} {:<12} {:<16}",
        "Symbol", "Rows", "First", "Last", "Hash"
    );
    println!("{}", "-".repeat(64));
    for entry in &manifest.symbols {
        let day = |t: Option<chrono::DateTime<chrono::Utc>>| {
            t.map(|t| t.date_naive().to_string()).unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<12} {:>7} {:<12} {:<12} {:<16}{}",
            entry.symbol,
            entry.rows,
            day(entry.first_timestamp),
            day(entry.last_timestamp),
            &entry.data_hash[..entry.data_hash.len().min(16)],
            if entry.from_store { " (stored)" } else { "" }
        );
    }
    for failure in &manifest.failures {
        println!("FAILED {:<12} ({} attempts): {}", failure.symbol, failure.attempts, failure.error);
    }
}
