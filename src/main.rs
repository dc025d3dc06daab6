//! Canline Binary Entry Point
//!
//! Operator CLI over the record store: ingest JSON documents and print the
//! dashboard queries. Core functionality is provided by the `canline` library.

use std::path::PathBuf;

use canline::{
    StorageBuilder, StorageHandles,
    config::{AppConfig, parse_duration},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Canline - production line record store
#[derive(Parser, Debug)]
#[command(name = "canline", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "CANLINE_CONFIG"
    )]
    config: PathBuf,

    /// Database URL (overrides config file)
    #[arg(long, env = "CANLINE_DB_URL")]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest newline-delimited JSON documents from a file or stdin
    Ingest {
        /// Input file; reads stdin when omitted
        file: Option<PathBuf>,
    },
    /// Most recent production events
    Recent {
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Daily production summary
    Summary,
    /// Cycle time and fill level statistics
    Stats,
    /// Fault frequency by type and severity
    Faults,
    /// Faults that have not been cleared
    OpenFaults,
    /// Failed cans by reject reason
    Rejects,
    /// Newest system health snapshot
    LatestMetric,
    /// Delete old events and metrics (retention from config unless given)
    Trim {
        #[arg(long, value_parser = parse_duration)]
        events_older_than: Option<std::time::Duration>,
        #[arg(long, value_parser = parse_duration)]
        metrics_older_than: Option<std::time::Duration>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,canline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // A missing config file is fine; every setting has a default.
    let mut config = if cli.config.exists() {
        tracing::info!("Loading configuration from: {}", cli.config.display());
        AppConfig::load(&cli.config)?
    } else {
        tracing::debug!("No config at {}, using defaults", cli.config.display());
        AppConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(url) = cli.db_url {
        config.database.path = url;
    }

    let db_url = config.database.connection_url();
    tracing::info!("Initializing storage at: {}", db_url);

    let handles = StorageBuilder::new(&db_url)
        .pool_size(config.database.pool_size)
        .channel_capacity(config.database.channel_capacity)
        .checkpoint_interval(config.database.checkpoint_interval())
        .sync_mode(config.database.sync_mode)
        .busy_timeout(config.database.busy_timeout)
        .build()
        .await?;

    let result = run(cli.command, &config, &handles).await;

    tracing::info!("Shutting down storage...");
    if let Err(e) = handles.shutdown().await {
        tracing::error!("Failed to shutdown storage: {}", e);
    }

    result
}

async fn run(
    command: Command,
    config: &AppConfig,
    handles: &StorageHandles,
) -> Result<(), Box<dyn std::error::Error>> {
    let query = &handles.query;
    match command {
        Command::Ingest { file } => match file {
            Some(path) => {
                let file = tokio::fs::File::open(&path).await?;
                ingest(BufReader::new(file), handles).await?;
            }
            None => ingest(BufReader::new(tokio::io::stdin()), handles).await?,
        },
        Command::Recent { limit } => print_json(&query.get_recent_events(limit).await?)?,
        Command::Summary => print_json(&query.get_summary().await?)?,
        Command::Stats => print_json(&query.get_performance_stats().await?)?,
        Command::Faults => print_json(&query.get_fault_analysis().await?)?,
        Command::OpenFaults => print_json(&query.get_open_faults().await?)?,
        Command::Rejects => print_json(&query.get_reject_breakdown().await?)?,
        Command::LatestMetric => print_json(&query.get_latest_metric().await?)?,
        Command::Trim {
            events_older_than,
            metrics_older_than,
        } => {
            let now = Utc::now();
            let mut report = serde_json::Map::new();

            if let Some(age) = events_older_than.or(config.retention.events) {
                let cutoff = cutoff_before(now, age)?;
                let deleted = handles.admin.trim_events_before(cutoff).await?;
                report.insert("events_deleted".into(), deleted.into());
            }
            if let Some(age) = metrics_older_than.or(config.retention.metrics) {
                let cutoff = cutoff_before(now, age)?;
                let deleted = handles.admin.trim_metrics_before(cutoff).await?;
                report.insert("metrics_deleted".into(), deleted.into());
            }
            if report.is_empty() {
                tracing::warn!("No retention window configured, nothing trimmed");
            } else {
                handles.admin.checkpoint().await?;
            }
            print_json(&report)?;
        }
    }
    Ok(())
}

/// Ingest one JSON document per line until EOF or Ctrl+C.
///
/// Rejected documents, including lines that are not UTF-8, are reported and
/// skipped; backend failures abort.
async fn ingest<R>(mut reader: R, handles: &StorageHandles) -> Result<(), Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let (mut accepted, mut rejected) = (0u64, 0u64);

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal, stopping ingest");
                break;
            }
        };
        if read == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                rejected += 1;
                tracing::warn!(error = %e, "Rejected document");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        match handles.writer.ingest_json(line).await {
            Ok(outcome) => {
                accepted += 1;
                println!("{}", serde_json::to_string(&outcome)?);
            }
            Err(e) if e.is_rejection() => {
                rejected += 1;
                tracing::warn!(error = %e, "Rejected document");
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(accepted, rejected, "Ingest complete");
    Ok(())
}

/// Start of a retention window ending at `now`.
fn cutoff_before(
    now: DateTime<Utc>,
    age: std::time::Duration,
) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    let age = chrono::Duration::from_std(age)?;
    now.checked_sub_signed(age).ok_or_else(|| {
        format!("retention window {age} reaches before the earliest supported date").into()
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
