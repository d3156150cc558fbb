//! Config command - View and validate bisync configuration
//!
//! Provides the `bisync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Prints the configuration file location
//! 3. Validates the configuration file and reports every error

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use bisync_core::config::Config;

use crate::output::{get_formatter, plural, OutputFormat};
use crate::ConfigSource;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, format: OutputFormat, source: &ConfigSource) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(format, source),
            ConfigCommand::Path => execute_path(format, source),
            ConfigCommand::Validate => execute_validate(format, source),
        }
    }
}

fn execute_show(format: OutputFormat, source: &ConfigSource) -> Result<()> {
    let formatter = get_formatter(format.is_json());
    let config = source.load()?;

    info!(config_path = %source.path.display(), "Showing configuration");

    if format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", source.path.display()));
    if !source.path.exists() {
        formatter.info("(file not found, showing defaults)");
    }
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_path(format: OutputFormat, source: &ConfigSource) -> Result<()> {
    if format.is_json() {
        get_formatter(true).print_json(&serde_json::json!({
            "config_path": source.path.display().to_string(),
            "exists": source.path.exists(),
        }));
    } else {
        println!("{}", source.path.display());
    }
    Ok(())
}

/// Outcome of validating one file
#[derive(Debug, PartialEq)]
enum Validation {
    Missing,
    Unreadable(String),
    Checked(Vec<String>),
}

fn validate_file(source: &ConfigSource) -> Validation {
    if !source.path.exists() {
        return Validation::Missing;
    }
    match Config::load(&source.path) {
        Ok(config) => Validation::Checked(
            config
                .validate()
                .iter()
                .map(|e| format!("{} - {}", e.field, e.message))
                .collect(),
        ),
        Err(e) => Validation::Unreadable(format!("{e:#}")),
    }
}

fn execute_validate(format: OutputFormat, source: &ConfigSource) -> Result<()> {
    let formatter = get_formatter(format.is_json());
    let path = source.path.display().to_string();

    info!(config_path = %path, "Validating configuration");

    let outcome = validate_file(source);
    if format.is_json() {
        let (valid, errors) = match &outcome {
            Validation::Missing => (true, vec![]),
            Validation::Unreadable(e) => (false, vec![format!("Failed to parse configuration: {e}")]),
            Validation::Checked(errors) => (errors.is_empty(), errors.clone()),
        };
        formatter.print_json(&serde_json::json!({
            "valid": valid,
            "config_path": path,
            "exists": outcome != Validation::Missing,
            "errors": errors,
        }));
    } else {
        match &outcome {
            Validation::Missing => {
                formatter.info(&format!("Configuration file not found at {path}"));
                formatter.info("Defaults are in effect.");
            }
            Validation::Unreadable(e) => {
                formatter.error(&format!("Failed to parse configuration: {e}"));
                formatter.info(&format!("File: {path}"));
            }
            Validation::Checked(errors) if errors.is_empty() => {
                formatter.success("Configuration is valid");
                formatter.info(&format!("File: {path}"));
            }
            Validation::Checked(errors) => {
                formatter.error(&format!("Configuration has {}:", plural(errors.len(), "error")));
                formatter.info(&format!("File: {path}"));
                formatter.info("");
                for error in errors {
                    formatter.info(&format!("  {error}"));
                }
            }
        }
    }

    match outcome {
        Validation::Missing => Ok(()),
        Validation::Checked(errors) if errors.is_empty() => Ok(()),
        _ => anyhow::bail!("invalid configuration: {path}"),
    }
}
