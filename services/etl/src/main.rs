//! ETL CLI
//!
//! Usage:
//!   # Country coverage report (no writes):
//!   cargo run --bin etl -- --descriptor services/etl/sources/employment_by_education.json
//!
//!   # Full load:
//!   cargo run --bin etl -- --descriptor services/etl/sources/avg_monthly_earnings.json --mode load
//!
//!   # Load into an in-memory store seeded with the database's countries and cities:
//!   cargo run --bin etl -- --descriptor ... --mode load --dry-run

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use etl::storage::Storage;
use etl::{MemoryStorage, Orchestrator, PgStorage, RunMode, RunOutcome, Settings, SourceDescriptor};

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Loads indicator extracts into the metric fact store")]
struct Args {
    /// Path to the source descriptor (JSON)
    #[arg(long)]
    descriptor: PathBuf,

    /// check: country coverage report; load: full ingestion
    #[arg(long, value_enum, default_value = "check")]
    mode: Mode,

    /// Source file, overriding the descriptor's path
    #[arg(long)]
    file: Option<PathBuf>,

    /// Dry run - load into memory, don't write to the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Check,
    Load,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Check => RunMode::Check,
            Mode::Load => RunMode::Load,
        }
    }
}

async fn execute<S: Storage + 'static>(
    descriptor: SourceDescriptor,
    storage: Arc<S>,
    settings: Settings,
    file: Option<PathBuf>,
    mode: RunMode,
) -> Result<RunOutcome> {
    let mut orchestrator = Orchestrator::new(descriptor, storage, settings);
    if let Some(file) = file {
        orchestrator = orchestrator.with_source_path(file);
    }
    println!("Source file: {}", orchestrator.source_path().display());
    println!("Run ID: {}", orchestrator.run_id());

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            stop.cancel();
        }
    });

    orchestrator.run(mode).await.context("Run failed")
}

fn print_summary(outcome: &RunOutcome) {
    let stats = &outcome.stats;
    println!("\n=== {} ===", if stats.stopped { "Run Stopped" } else { "Run Complete" });
    println!("Elapsed: {:.1}s", stats.elapsed().num_milliseconds() as f64 / 1000.0);
    println!("Rows read: {} of {}", stats.rows_read, stats.total_rows);

    if let Some((report, files)) = &outcome.report {
        println!("Source countries: {}", report.source_values());
        println!("  Found:      {}", report.found.len());
        println!("  Via alias:  {}", report.via_alias.len());
        println!("  Not found:  {}", report.not_found.len());
        println!("Storage countries unused: {}", report.unused.len());
        println!("Missing list: {}", files.missing.display());
        println!("Unused list:  {}", files.unused.display());
        return;
    }

    println!("Rows parsed: {} (dropped {}, invalid {})", stats.rows_parsed, stats.rows_dropped, stats.rows_invalid);
    println!("Facts inserted: {}", stats.facts_inserted);
    println!("Duplicates suppressed: {}", stats.duplicates);
    println!("Records skipped: {} (countries not found: {})", stats.records_skipped, stats.skipped_countries.len());
    println!("Batches: {} (retries {})", stats.batches, stats.retries);
    println!("\nCaches:");
    for cache in &stats.caches {
        println!(
            "  {:<16} hit rate {:>5.1}%  size {}/{}  evictions {}",
            cache.name,
            cache.stats.hit_rate(),
            cache.stats.size,
            cache.stats.capacity,
            cache.stats.evictions
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::from_env();
    let descriptor = SourceDescriptor::load(&args.descriptor)
        .with_context(|| format!("Failed to load descriptor {}", args.descriptor.display()))?;
    let mode = RunMode::from(args.mode);

    println!("=== ETL: {} ===", descriptor.name);
    println!("Metric: {}", descriptor.metric.slug);
    println!(
        "Mode: {}{}",
        mode.as_str(),
        if args.dry_run { " (dry-run)" } else { "" }
    );

    let db_url = settings.require_db_url()?.to_string();
    let pg = PgStorage::connect(&db_url, settings.max_connections)
        .await
        .context("Failed to connect to database")?;

    let outcome = if args.dry_run {
        let memory = MemoryStorage::seeded_from(&pg, &descriptor)
            .await
            .context("Failed to copy locations")?;
        println!(
            "Dry run - {} countries and {} cities copied into memory, nothing will be written",
            memory.country_count(),
            memory.city_count()
        );
        execute(descriptor, Arc::new(memory), settings, args.file, mode).await?
    } else {
        execute(descriptor, Arc::new(pg), settings, args.file, mode).await?
    };

    print_summary(&outcome);
    Ok(())
}
