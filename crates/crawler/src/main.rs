//! Crawler launcher
//!
//! Wires the SQLite stores to the ingestion, propagation and migration
//! commands.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crawler::legacy::LegacyMigration;
use crawler::priority::PriorityPipeline;
use crawler::reclassify;
use crawler::storage::{
    PlateTracking, SqliteCherrypickLog, SqlitePlateTracking, SqliteSampleStore, SqliteWarehouse,
};
use crawler::{run_centres, CrawlerConfig};
use crawler_db::CrawlerDb;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "crawler", about = "Lab result ingestion and propagation")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (default: $CRAWLER_HOME/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the command's report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process every configured centre's download directory
    Run {
        /// Only process this centre
        #[arg(long)]
        centre: Option<String>,
    },

    /// Push unprocessed priority samples downstream
    Priority {
        /// Only push to the warehouse
        #[arg(long)]
        skip_plate_tracking: bool,
    },

    /// Classify samples that have no filtered positive fields
    Classify,

    /// Backfill filtered positive versions for historical samples (run once)
    MigrateLegacy,

    /// Upsert samples created in a window into the warehouse
    BackfillWarehouse {
        /// Window start, yymmdd_HHMM
        #[arg(long)]
        start: String,

        /// Window end, yymmdd_HHMM
        #[arg(long)]
        end: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<CrawlerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => crawler_logging::crawler_home()?.join("config.toml"),
    };
    if !path.exists() {
        warn!(path = %path.display(), "No configuration file, using defaults");
        return Ok(CrawlerConfig::default());
    }
    CrawlerConfig::load(&path).with_context(|| format!("Failed to load config: {}", path.display()))
}

async fn open(path: &Path) -> Result<CrawlerDb> {
    CrawlerDb::open(path)
        .await
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

/// Print `value` when JSON output was requested, otherwise `text`.
fn emit(json: bool, value: serde_json::Value, text: String) {
    if json {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let now = Utc::now();

    match cli.command {
        Commands::Run { centre } => {
            if let Some(name) = centre.as_deref() {
                if config.centre(name).is_none() {
                    bail!("No centre configured with name '{name}'");
                }
            }
            let centres = config.compile_centres()?;
            let selected = centres
                .iter()
                .filter(|c| centre.as_deref().map_or(true, |name| c.config.name == name))
                .count();
            let store = SqliteSampleStore::new(open(&config.samples_db).await?);

            let summaries = run_centres(&centres, &config.download_dir, &store, centre.as_deref(), now).await;
            for summary in &summaries {
                emit(
                    cli.json,
                    serde_json::json!({
                        "centre": summary.centre,
                        "files_discovered": summary.files_discovered,
                        "blacklisted": summary.blacklisted,
                        "processed_with_error": summary.processed_with_error,
                        "processed_with_success": summary.processed_with_success,
                        "not_yet_processed": summary.not_yet_processed,
                        "failed": summary.failed,
                        "documents_inserted": summary.documents_inserted,
                        "duration_ms": summary.duration_ms,
                    }),
                    format!(
                        "{}: {} files, {} new, {} inserted, {} failed",
                        summary.centre,
                        summary.files_discovered,
                        summary.not_yet_processed,
                        summary.documents_inserted,
                        summary.failed
                    ),
                );
            }
            if summaries.len() < selected {
                bail!("One or more centres failed, see the log");
            }
        }

        Commands::Priority { skip_plate_tracking } => {
            let store = SqliteSampleStore::new(open(&config.samples_db).await?);
            let warehouse = SqliteWarehouse::new(open(&config.warehouse_db).await?, config.warehouse_batch_size);
            let plate_tracking = if skip_plate_tracking {
                None
            } else {
                Some(SqlitePlateTracking::new(open(&config.plate_tracking_db).await?))
            };

            let pipeline = PriorityPipeline::new(
                &store,
                &warehouse,
                plate_tracking.as_ref().map(|p| p as &dyn PlateTracking),
                &config.centres,
            );
            let report = pipeline.run().await.context("Priority run failed")?;
            for line in report.errors.summary() {
                error!("{line}");
            }
            emit(
                cli.json,
                serde_json::json!({
                    "fetched": report.fetched,
                    "warehouse_ok": report.warehouse_ok,
                    "plate_tracking_ok": report.plate_tracking_ok,
                    "committed_plates": report.committed_plates,
                    "marked_processed": report.marked_processed,
                    "errors": report.errors.summary(),
                }),
                format!(
                    "{} fetched, {} marked processed, {} plates committed",
                    report.fetched,
                    report.marked_processed,
                    report.committed_plates.len()
                ),
            );
            if !report.succeeded() {
                bail!("Priority run did not complete; it is safe to run again");
            }
        }

        Commands::Classify => {
            let store = SqliteSampleStore::new(open(&config.samples_db).await?);
            let warehouse = SqliteWarehouse::new(open(&config.warehouse_db).await?, config.warehouse_batch_size);
            let counts = reclassify::classify_unclassified(&store, &warehouse, now).await?;
            emit(
                cli.json,
                serde_json::json!({
                    "version": counts.version,
                    "samples": counts.samples,
                    "positive": counts.positive,
                    "warehouse_updated": counts.warehouse_updated,
                }),
                format!("{} samples classified, {} positive", counts.samples, counts.positive),
            );
        }

        Commands::MigrateLegacy => {
            let store = SqliteSampleStore::new(open(&config.samples_db).await?);
            let warehouse = SqliteWarehouse::new(open(&config.warehouse_db).await?, config.warehouse_batch_size);
            let events = SqliteCherrypickLog::new(open(&config.events_db).await?);

            let report = LegacyMigration::new(&store, &warehouse, &events, &config.legacy)
                .run(now)
                .await?;
            for counts in &report.versions {
                emit(
                    cli.json,
                    serde_json::json!({
                        "version": counts.version,
                        "samples": counts.samples,
                        "positive": counts.positive,
                        "warehouse_updated": counts.warehouse_updated,
                    }),
                    format!("{}: {} samples, {} positive", counts.version, counts.samples, counts.positive),
                );
            }
        }

        Commands::BackfillWarehouse { start, end } => {
            let start = reclassify::parse_window_bound(&start)?;
            let end = reclassify::parse_window_bound(&end)?;
            let store = SqliteSampleStore::new(open(&config.samples_db).await?);
            let warehouse = SqliteWarehouse::new(open(&config.warehouse_db).await?, config.warehouse_batch_size);

            let written = reclassify::backfill_warehouse(&store, &warehouse, start, end).await?;
            emit(
                cli.json,
                serde_json::json!({ "written": written }),
                format!("{written} warehouse rows written"),
            );
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match crawler_logging::init_logging(crawler_logging::LogConfig {
        app_name: "crawler",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialise logging: {err}");
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return ExitCode::from(1);
        }
    };

    info!(command = ?cli.command, "Starting");
    match runtime.block_on(run_command(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("{err:?}");
            ExitCode::from(1)
        }
    }
}
