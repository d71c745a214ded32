//! CXR CLI - batch-rotation training for chest X-ray classifiers
//!
//! The `cxr` binary drives a rotation run from one TOML configuration file
//! and offers a few read-only views of the data and run state.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use cxr_core::FailurePolicy;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use commands::{init, labels, plan, run, status};

/// CXR - train a multi-label X-ray classifier over rotating archive batches
#[derive(Parser, Debug)]
#[command(
    name = "cxr",
    author,
    version,
    about = "Batch-rotation training over remote image archives",
    long_about = "cxr downloads image archives in groups, trains one model increment per group\nand deletes each group's files before fetching the next."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: metadata, rotation, export
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "cxr.toml")]
        config: PathBuf,

        /// Metadata CSV (overrides data.metadata_path)
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Skip batches completed by an earlier run of the same plan
        #[arg(long)]
        resume: bool,

        /// Failure policy (fail-fast, skip-batch)
        #[arg(long)]
        policy: Option<FailurePolicy>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the batch plan without touching the network
    Plan {
        /// Configuration file
        #[arg(short, long, default_value = "cxr.toml")]
        config: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Print the frequency-ranked label vocabulary of a metadata table
    Labels {
        /// Metadata CSV
        #[arg(long)]
        metadata: PathBuf,

        /// Raw label meaning "no finding"
        #[arg(long, default_value = "No Finding")]
        no_finding: String,

        #[arg(long)]
        json: bool,
    },

    /// Show checkpoint, progress ledger and export state
    Status {
        /// Configuration file
        #[arg(short, long, default_value = "cxr.toml")]
        config: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    match args.command {
        Command::Run { config, metadata, resume, policy, json } => {
            run::execute(run::RunArgs { config, metadata, resume, policy, json }).await
        }
        Command::Plan { config, json } => plan::execute(&config, json),
        Command::Labels { metadata, no_finding, json } => labels::execute(&metadata, &no_finding, json),
        Command::Status { config, json } => status::execute(&config, json),
        Command::InitConfig { path, force } => init::execute(&path, force),
    }
}
