//! pleiades - Ingest a Server-Sent Events feed into files or Kafka
//!
//! Connects to an SSE endpoint, resumes from the newest event already
//! persisted, and keeps publishing until interrupted.

mod config;
mod metrics_server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pleiades_core::Metrics;
use pleiades_ingest::Coordinator;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::metrics_server::MetricsServer;

#[derive(Parser)]
#[command(name = "pleiades")]
#[command(author, version, about = "Server-Sent Events ingestion")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "PLEIADES_CONFIG")]
    config: Option<PathBuf>,

    /// Log format
    #[arg(long, global = true, value_enum, default_value = "text", env = "PLEIADES_LOG_FORMAT")]
    log_format: LogFormat,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the stream and persist every event
    Ingest(IngestArgs),

    /// Print version information
    Version,
}

/// Flags of the `ingest` command; unset values fall back to the config file
#[derive(Args, Debug, Clone)]
struct IngestArgs {
    /// SSE endpoint to consume
    #[arg(long, env = "PLEIADES_URI")]
    uri: Option<String>,

    /// Start from the live edge instead of the last persisted event
    #[arg(long, env = "PLEIADES_NO_RESUME")]
    no_resume: bool,

    /// Write one file per event
    #[arg(long, env = "PLEIADES_FILE_ENABLE")]
    file_enable: bool,

    /// Directory receiving the event files [default: ./events]
    #[arg(long, env = "PLEIADES_FILE_PUBLISH_DIR")]
    file_publish_dir: Option<PathBuf>,

    /// Publish events to a Kafka topic
    #[arg(long, env = "PLEIADES_KAFKA_ENABLE")]
    kafka_enable: bool,

    /// Kafka bootstrap broker, repeatable or comma separated [default: localhost:9092]
    #[arg(long, env = "PLEIADES_KAFKA_BROKER", value_delimiter = ',')]
    kafka_broker: Vec<String>,

    /// Kafka topic [default: pleiades-events]
    #[arg(long, env = "PLEIADES_KAFKA_TOPIC")]
    kafka_topic: Option<String>,

    /// Port of the Prometheus endpoint, 0 disables it [default: 9000]
    #[arg(long, env = "PLEIADES_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Pause between stream reconnects in milliseconds [default: 0]
    #[arg(long, env = "PLEIADES_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// Events buffered between the stream and the sink [default: 32]
    #[arg(long, env = "PLEIADES_CHANNEL_CAPACITY")]
    channel_capacity: Option<usize>,

    /// Hide the terminal spinner
    #[arg(long, env = "PLEIADES_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.log_format);

    match cli.command {
        Commands::Ingest(args) => ingest(cli.config.as_deref(), &args).await,
        Commands::Version => {
            println!("pleiades {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn default_filter(verbose: bool, quiet: bool) -> String {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    ["pleiades", "pleiades_core", "pleiades_ingest", "pleiades_sse", "pleiades_sink"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn init_tracing(verbose: bool, quiet: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(verbose, quiet).into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn ingest(config_path: Option<&std::path::Path>, args: &IngestArgs) -> Result<()> {
    let file_config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let merged = file_config.merge_with_args(args)?;

    let metrics = Metrics::new().context("Failed to register metrics")?;
    let server = if merged.metrics_port == 0 {
        None
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], merged.metrics_port));
        Some(MetricsServer::start(addr, metrics.clone()).await?)
    };

    tracing::info!(uri = %merged.options.uri, "Starting pleiades ingest");

    let coordinator = Coordinator::new(merged.options, metrics);
    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                stop.stop();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let result = coordinator.run().await;

    if let Some(server) = server {
        server.shutdown().await;
    }

    let last_id = result.context("Ingest failed")?;
    tracing::info!(last_id = %last_id, "Ingest shutdown complete");
    Ok(())
}
