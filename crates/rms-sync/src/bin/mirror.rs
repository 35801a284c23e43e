//! # rms-mirror
//!
//! Command-line driver for the offline mirror.
//!
//! ```text
//! rms-mirror sync                 full reconciliation pass
//! rms-mirror step [--count N]     N incremental chunks
//! rms-mirror direct [--append]    bulk category download
//! rms-mirror status               local mirror summary
//! rms-mirror search <query>       offline lookup by registration / chassis
//! rms-mirror config [--write]     print (or save) the effective config
//! ```
//!
//! The bearer token is read from `RMS_API_TOKEN`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rms_db::{Database, DbConfig};
use rms_sync::{
    DirectMode, MirrorConfig, MirrorEngine, ProgressReporter, StaticCredential, SyncPhase,
};

#[derive(Debug, Parser)]
#[command(name = "rms-mirror", version, about = "Offline mirror of the vehicle catalog")]
struct Cli {
    /// Path to mirror.toml (defaults to the platform config dir).
    #[arg(long, env = "RMS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full mirror pass, deletions included.
    Sync,
    /// Download a few chunks of the first incomplete sources.
    Step {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Download every category by skip/limit.
    Direct {
        /// Only upsert; never delete local records.
        #[arg(long)]
        append: bool,
    },
    /// Show what the local mirror holds.
    Status,
    /// Look up vehicles offline.
    Search {
        query: String,
        /// Match a chassis fragment instead of a registration suffix.
        #[arg(long)]
        chassis: bool,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the effective configuration.
    Config {
        /// Save it to the config path.
        #[arg(long)]
        write: bool,
    },
}

/// Logs progress events from the engine.
struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report_progress(&self, phase: SyncPhase, percent: u8, message: &str) {
        info!(?phase, percent, "{}", message);
    }

    fn report_error(&self, message: &str, retryable: bool) {
        warn!(retryable, "{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = MirrorConfig::load(cli.config.clone())?;
    if let Command::Config { write } = cli.command {
        if write {
            config.save(cli.config)?;
        }
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(db_path)).await?;

    let credentials = Arc::new(StaticCredential::from_env("RMS_API_TOKEN"));
    let engine = MirrorEngine::from_config(&config, db.clone(), credentials)?
        .with_progress_reporter(Arc::new(LogReporter));

    let result = run(&engine, &db, cli.command).await;
    db.close().await;

    if let Err(err) = &result {
        error!(error = %err, "rms-mirror failed");
    }
    result
}

async fn run(
    engine: &MirrorEngine,
    db: &Database,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Sync => {
            let report = engine.smart_sync().await?;
            println!(
                "listed {} · downloaded {} · removed {} · demoted {} · +{} / -{} records",
                report.sources_listed,
                report.sources_downloaded,
                report.sources_removed,
                report.sources_demoted,
                report.records_inserted,
                report.records_deleted,
            );
            for name in &report.failed_sources {
                println!("failed: {name}");
            }
        }
        Command::Step { count } => {
            for _ in 0..count.max(1) {
                let step = engine.sync_one_step().await?;
                let Some(name) = step.source_name else {
                    println!("all sources complete");
                    break;
                };
                if let Some(chunk) = step.chunk {
                    let total = chunk.total.map_or("?".to_string(), |t| t.to_string());
                    println!(
                        "{name}: {}/{} ({} remaining sources)",
                        chunk.downloaded, total, step.remaining_incomplete
                    );
                }
            }
        }
        Command::Direct { append } => {
            let mode = if append {
                DirectMode::Append
            } else {
                DirectMode::Mirror
            };
            let report = engine.direct_chunked_sync(mode).await?;
            println!(
                "{} records stored, {} deleted",
                report.records_upserted, report.records_deleted
            );
            for category in &report.failed_categories {
                println!("failed: {category}");
            }
        }
        Command::Status => {
            let status = engine.status().await?;
            println!(
                "{} records · {}/{} sources complete",
                status.local_records, status.completed_sources, status.total_sources
            );
            if let Some(at) = status.last_download {
                println!("last download: {}", at.to_rfc3339());
            }
            for name in &status.incomplete_sources {
                println!("incomplete: {name}");
            }
        }
        Command::Search {
            query,
            chassis,
            limit,
        } => {
            let hits = if chassis {
                db.vehicles().search_by_chassis(&query, limit).await?
            } else {
                db.vehicles()
                    .search_by_registration_suffix(&query, limit)
                    .await?
            };
            for v in hits {
                println!(
                    "{:<14} {:<20} {:<12} {} ({})",
                    v.registration_number, v.chassis_number, v.bank_name, v.customer_name, v.make
                );
            }
        }
        Command::Config { .. } => {}
    }

    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=rms_sync=trace` - Trace the engine only
/// - Default: INFO, with debug for the rms crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rms=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
