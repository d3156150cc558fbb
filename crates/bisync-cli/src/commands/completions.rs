//! Completions command - Generate shell completion scripts

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsCommand {
    pub async fn execute(&self, _format: OutputFormat) -> Result<()> {
        clap_complete::generate(
            self.shell,
            &mut crate::Cli::command(),
            "bisync",
            &mut std::io::stdout(),
        );
        Ok(())
    }
}
