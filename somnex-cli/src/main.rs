//! somnex CLI: frequency-band importance and evaluation for sleep-stage classifier folds.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// somnex: which EEG frequency bands does a sleep-stage classifier rely on?
#[derive(Parser, Debug)]
#[command(name = "somnex", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Compute band importance for every fold checkpoint
    Explain {
        /// Band as name:low:high in Hz (repeatable); defaults to the configured bands
        #[arg(short, long = "band")]
        bands: Vec<somnex_core::BandSpec>,

        /// Only process these folds (repeatable)
        #[arg(short, long = "fold")]
        folds: Vec<u32>,

        /// Maximum number of folds processed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Box plot of true-label importance per fold
        #[arg(long)]
        plot_true: bool,

        /// Box plot of predicted-label importance per fold
        #[arg(long)]
        plot_pred: bool,

        /// Do not write importance tables or run records
        #[arg(long)]
        no_csv: bool,

        /// Data split to explain (train, valid, test)
        #[arg(long)]
        split: Option<somnex_core::DataSplit>,
    },
    /// Classification metrics of every fold checkpoint
    Evaluate {
        /// Only process these folds (repeatable)
        #[arg(short, long = "fold")]
        folds: Vec<u32>,

        /// Maximum number of folds processed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Data split to evaluate (train, valid, test)
        #[arg(long)]
        split: Option<somnex_core::DataSplit>,
    },
    /// List the fold checkpoints found in the checkpoint directory
    Checkpoints,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "somnex", "somnex")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "somnex.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref(), cli.quiet).await
}
