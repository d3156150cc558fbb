//! bisync CLI - Command-line interface for bidirectional reconciliation
//!
//! Provides commands for:
//! - Reconciling two directory trees (`sync`)
//! - Checking that the committed listings still agree (`check`)
//! - Inspecting and validating the configuration file
//! - Generating shell completions

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bisync_core::config::Config;
use bisync_sync::BisyncError;

mod commands;
mod output;

use commands::{
    check::CheckCommand, completions::CompletionsCommand, config::ConfigCommand,
    sync::SyncCommand,
};
use output::{get_formatter, OutputFormat};

#[derive(Debug, Parser)]
#[command(
    name = "bisync",
    version,
    about = "Bidirectional synchronization between two directory trees"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile two directory trees
    Sync(SyncCommand),
    /// Verify the prior listings of a pair agree without changing anything
    Check(CheckCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Where the configuration comes from for this invocation
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Set when `--config` named the file explicitly
    pub explicit: bool,
}

impl ConfigSource {
    fn from_cli(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self {
                path,
                explicit: true,
            },
            None => Self {
                path: Config::default_path(),
                explicit: false,
            },
        }
    }

    /// Loads the file; a missing default file falls back to defaults, an
    /// explicit one must exist and parse.
    pub fn load(&self) -> Result<Config> {
        if self.explicit {
            Config::load(&self.path)
                .with_context(|| format!("cannot load config {}", self.path.display()))
        } else {
            Ok(Config::load_or_default(&self.path))
        }
    }
}

fn log_filter(verbose: u8, quiet: bool, config_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (verbose, quiet) {
        (0, true) => "warn",
        (0, false) => config_level,
        (1, _) => "debug",
        _ => "trace",
    };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let source = ConfigSource::from_cli(cli.config.clone());

    let config_level = Config::load(&source.path)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, cli.quiet, &config_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let result = match cli.command {
        Commands::Sync(cmd) => cmd.execute(format, &source).await,
        Commands::Check(cmd) => cmd.execute(format, &source).await,
        Commands::Config(cmd) => cmd.execute(format, &source).await,
        Commands::Completions(cmd) => cmd.execute(format).await,
    };

    if let Err(e) = result {
        get_formatter(cli.json).error(&format!("{e:#}"));
        std::process::exit(exit_code(&e));
    }
}

/// Exit status for a failed command: 2 for critical aborts, 1 otherwise
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BisyncError>())
        .map(BisyncError::exit_code)
        .unwrap_or(1)
}
