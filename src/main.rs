//! Binary entry point for stowage.
//!
//! Renders files as prompt attachments through the attachment cache and
//! shows the effective storage configuration.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stowage::observability::{self, LogFormat, LoggingConfig, MetricsConfig};
use stowage::{AttachmentRequest, StorageConfig, Stores};

/// Stowage - storage and caching adapters for agent runtimes.
#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print files wrapped as attachments.
    Attach {
        /// Files to attach.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directory that attachment paths are shown relative to.
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format.into());
    }
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = observability::install_prometheus(&MetricsConfig::from_env()) {
        eprintln!("Failed to install metrics: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Attach { paths, root } => {
            cmd_attach(&config, &paths, root.as_deref(), cli.verbose).await
        },
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StorageConfig> {
    let config = match path {
        Some(path) => StorageConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => StorageConfig::load_default(),
    };
    config.validate()?;
    Ok(config)
}

/// Attach command.
async fn cmd_attach(
    config: &StorageConfig,
    paths: &[PathBuf],
    root: Option<&Path>,
    verbose: bool,
) -> anyhow::Result<()> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let requests: Vec<AttachmentRequest> = paths
        .iter()
        .map(|path| {
            let shown = path.strip_prefix(&root).unwrap_or(path);
            AttachmentRequest::new(root.join(path), shown.display().to_string())
        })
        .collect();

    let stores = Stores::from_config(config)?;
    for attachment in stores.attachments().read_attachments(&requests).await {
        println!("{attachment}");
    }

    if verbose {
        let stats = stores.attachments().cache_stats();
        eprintln!(
            "cache: {} entries, {} / {} bytes",
            stats.entries, stats.total_bytes, stats.max_bytes
        );
    }
    Ok(())
}

/// Config command.
fn cmd_config(config: &StorageConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
