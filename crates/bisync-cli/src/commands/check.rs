//! Check command - Compare the committed listings of a pair
//!
//! `bisync check <path1> <path2>` runs the engine in check-only mode: the
//! prior listings of the session are loaded and compared, nothing is
//! transferred. A mismatch marks the listings failed unless `--resilient`
//! is given, in which case they are left as they are.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use bisync_core::config::{CheckSync, Config, Options};

use crate::commands::sync::run;
use crate::output::{get_formatter, OutputFormat};
use crate::ConfigSource;

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// First directory
    pub path1: PathBuf,

    /// Second directory
    pub path2: PathBuf,

    /// Leave the listings usable if they disagree
    #[arg(long)]
    pub resilient: bool,

    /// Directory holding listings and the lock file
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,
}

impl CheckCommand {
    pub fn options(&self, config: &Config) -> Options {
        let mut opts = Options::from(config);
        opts.check_sync = CheckSync::Only;
        opts.resilient |= self.resilient;
        if let Some(dir) = &self.workdir {
            opts.workdir = dir.clone();
        }
        opts
    }

    pub async fn execute(&self, format: OutputFormat, source: &ConfigSource) -> Result<()> {
        let formatter = get_formatter(format.is_json());
        let opts = self.options(&source.load()?);

        info!(
            path1 = %self.path1.display(),
            path2 = %self.path2.display(),
            "Checking listings"
        );
        let summary = run(&self.path1, &self.path2, &opts).await?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "in_sync": true,
                "session": summary.session,
                "duration_ms": summary.duration_ms,
            }));
        } else {
            formatter.success("Path1 and Path2 listings are in sync");
            formatter.info(&format!("Session: {}", summary.session));
        }
        Ok(())
    }
}
