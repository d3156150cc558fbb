//! Configuration module for bisync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! [`Options`] is the flattened per-run view handed to the engine; the CLI
//! derives it from a [`Config`] and then applies its own flag overrides.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, UpdateDeleteRule};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for bisync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub safety: SafetyConfig,
    pub transfers: TransfersConfig,
    pub conflicts: ConflictsConfig,
    pub filters: FiltersConfig,
    pub logging: LoggingConfig,
}

/// Whether committed listings are cross-checked after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSync {
    /// Verify the two committed listings agree after every normal run.
    #[default]
    Enabled,
    /// Skip the post-run verification.
    Disabled,
    /// Only compare the prior listings; never mutate anything.
    Only,
}

impl fmt::Display for CheckSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckSync::Enabled => "enabled",
            CheckSync::Disabled => "disabled",
            CheckSync::Only => "only",
        };
        f.write_str(s)
    }
}

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding listings and lock files.
    pub workdir: PathBuf,
    /// Base name of the access-check files.
    pub check_filename: String,
    /// Require matching check files on both sides before mutating anything.
    pub check_access: bool,
    /// Post-run listing verification mode.
    pub check_sync: CheckSync,
    /// Propagate empty directories.
    pub create_empty_src_dirs: bool,
    /// Remove empty directories on both sides after a run.
    pub remove_empty_dirs: bool,
    /// Keep listings after a retryable critical error.
    pub resilient: bool,
    /// Record and compare content hashes.
    pub checksum: bool,
    /// Keep `-new` intermediate listings after a run.
    pub no_cleanup: bool,
}

/// Safety thresholds evaluated before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Abort when more than this percentage of a side's prior listing was deleted.
    pub max_delete_percent: u8,
    /// Abort when more than this many files were deleted on one side.
    pub max_delete_count: Option<usize>,
}

/// Transfer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    /// Maximum number of operations in flight at once.
    pub concurrency: usize,
}

/// Conflict handling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Suffix tag for the Path1 copy of a conflicting file (`file..<tag>`).
    pub path1_tag: String,
    /// Suffix tag for the Path2 copy of a conflicting file.
    pub path2_tag: String,
    /// Tie-break when one side updates and the other deletes.
    pub update_delete: UpdateDeleteRule,
}

/// Path filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    /// Glob patterns matched against side-relative paths.
    pub exclude: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/bisync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("bisync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default location of the work directory (`$XDG_CACHE_HOME/bisync`).
pub fn default_workdir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join("bisync")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            check_filename: "BISYNC_CHECK".to_string(),
            check_access: false,
            check_sync: CheckSync::Enabled,
            create_empty_src_dirs: false,
            remove_empty_dirs: false,
            resilient: false,
            checksum: false,
            no_cleanup: false,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_delete_percent: 50,
            max_delete_count: None,
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            path1_tag: "path1".to_string(),
            path2_tag: "path2".to_string(),
            update_delete: UpdateDeleteRule::UpdateWins,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"safety.max_delete_percent"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `transfers.concurrency`.
const MAX_CONCURRENCY: usize = 64;

fn validate_tag(field: &str, tag: &str, errors: &mut Vec<ValidationError>) {
    if tag.is_empty() {
        errors.push(ValidationError {
            field: field.into(),
            message: "must not be empty".into(),
        });
    } else if tag.contains('/') || tag.contains('\0') {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("invalid character in tag '{tag}'"),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.check_filename.is_empty() || self.sync.check_filename.contains('/') {
            errors.push(ValidationError {
                field: "sync.check_filename".into(),
                message: "must be a plain file name".into(),
            });
        }
        if self.sync.remove_empty_dirs && self.sync.create_empty_src_dirs {
            errors.push(ValidationError {
                field: "sync.remove_empty_dirs".into(),
                message: "cannot be combined with sync.create_empty_src_dirs".into(),
            });
        }

        // --- safety ---
        if self.safety.max_delete_percent > 100 {
            errors.push(ValidationError {
                field: "safety.max_delete_percent".into(),
                message: "must be in range 0..=100".into(),
            });
        }

        // --- transfers ---
        if self.transfers.concurrency == 0 || self.transfers.concurrency > MAX_CONCURRENCY {
            errors.push(ValidationError {
                field: "transfers.concurrency".into(),
                message: format!("must be in range 1..={MAX_CONCURRENCY}"),
            });
        }

        // --- conflicts ---
        validate_tag("conflicts.path1_tag", &self.conflicts.path1_tag, &mut errors);
        validate_tag("conflicts.path2_tag", &self.conflicts.path2_tag, &mut errors);
        if !self.conflicts.path1_tag.is_empty()
            && self.conflicts.path1_tag == self.conflicts.path2_tag
        {
            errors.push(ValidationError {
                field: "conflicts.path2_tag".into(),
                message: "must differ from conflicts.path1_tag".into(),
            });
        }

        // --- filters ---
        for pattern in &self.filters.exclude {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(ValidationError {
                    field: "filters.exclude".into(),
                    message: format!("invalid glob '{pattern}': {e}"),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use bisync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .workdir(PathBuf::from("/var/lib/bisync"))
///     .max_delete_percent(25)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn workdir(mut self, workdir: PathBuf) -> Self {
        self.config.sync.workdir = workdir;
        self
    }

    pub fn check_filename(mut self, name: impl Into<String>) -> Self {
        self.config.sync.check_filename = name.into();
        self
    }

    pub fn check_access(mut self, enabled: bool) -> Self {
        self.config.sync.check_access = enabled;
        self
    }

    pub fn check_sync(mut self, mode: CheckSync) -> Self {
        self.config.sync.check_sync = mode;
        self
    }

    pub fn create_empty_src_dirs(mut self, enabled: bool) -> Self {
        self.config.sync.create_empty_src_dirs = enabled;
        self
    }

    pub fn remove_empty_dirs(mut self, enabled: bool) -> Self {
        self.config.sync.remove_empty_dirs = enabled;
        self
    }

    pub fn resilient(mut self, enabled: bool) -> Self {
        self.config.sync.resilient = enabled;
        self
    }

    pub fn checksum(mut self, enabled: bool) -> Self {
        self.config.sync.checksum = enabled;
        self
    }

    pub fn no_cleanup(mut self, enabled: bool) -> Self {
        self.config.sync.no_cleanup = enabled;
        self
    }

    // --- safety ---

    pub fn max_delete_percent(mut self, percent: u8) -> Self {
        self.config.safety.max_delete_percent = percent;
        self
    }

    pub fn max_delete_count(mut self, count: usize) -> Self {
        self.config.safety.max_delete_count = Some(count);
        self
    }

    // --- transfers ---

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.transfers.concurrency = n;
        self
    }

    // --- conflicts ---

    pub fn conflict_tags(mut self, path1: impl Into<String>, path2: impl Into<String>) -> Self {
        self.config.conflicts.path1_tag = path1.into();
        self.config.conflicts.path2_tag = path2.into();
        self
    }

    pub fn update_delete(mut self, rule: UpdateDeleteRule) -> Self {
        self.config.conflicts.update_delete = rule;
        self
    }

    // --- filters ---

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.config.filters.exclude.push(pattern.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the [`Config`] without validation.
    pub fn build(self) -> Config {
        self.config
    }

    /// Consume the builder, validate, and return the [`Config`] or all errors.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Per-run options
// ---------------------------------------------------------------------------

/// Flattened options for a single reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub workdir: PathBuf,
    /// Rebuild both listings from scratch.
    pub resync: bool,
    /// Plan every operation but mutate nothing.
    pub dry_run: bool,
    /// Bypass the delete and all-changed guards and the modtime check.
    pub force: bool,
    pub check_access: bool,
    pub check_filename: String,
    pub check_sync: CheckSync,
    pub max_delete_percent: u8,
    pub max_delete_count: Option<usize>,
    pub create_empty_src_dirs: bool,
    pub remove_empty_dirs: bool,
    pub resilient: bool,
    pub checksum: bool,
    pub no_cleanup: bool,
    pub excludes: Vec<String>,
    pub transfers: usize,
    pub path1_tag: String,
    pub path2_tag: String,
    pub update_delete: UpdateDeleteRule,
}

impl Default for Options {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Self {
            workdir: config.sync.workdir.clone(),
            resync: false,
            dry_run: false,
            force: false,
            check_access: config.sync.check_access,
            check_filename: config.sync.check_filename.clone(),
            check_sync: config.sync.check_sync,
            max_delete_percent: config.safety.max_delete_percent,
            max_delete_count: config.safety.max_delete_count,
            create_empty_src_dirs: config.sync.create_empty_src_dirs,
            remove_empty_dirs: config.sync.remove_empty_dirs,
            resilient: config.sync.resilient,
            checksum: config.sync.checksum,
            no_cleanup: config.sync.no_cleanup,
            excludes: config.filters.exclude.clone(),
            transfers: config.transfers.concurrency,
            path1_tag: config.conflicts.path1_tag.clone(),
            path2_tag: config.conflicts.path2_tag.clone(),
            update_delete: config.conflicts.update_delete,
        }
    }
}

impl Options {
    /// Options with every default and the given work directory.
    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }

    /// Rejects option combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.transfers == 0 {
            return Err(DomainError::ValidationFailed(
                "transfers must be greater than 0".into(),
            ));
        }
        if self.max_delete_percent > 100 {
            return Err(DomainError::ValidationFailed(
                "max delete percent must be in range 0..=100".into(),
            ));
        }
        if self.remove_empty_dirs && self.create_empty_src_dirs {
            return Err(DomainError::ValidationFailed(
                "remove-empty-dirs cannot be combined with create-empty-src-dirs".into(),
            ));
        }
        if self.path1_tag.is_empty() || self.path2_tag.is_empty() || self.path1_tag == self.path2_tag
        {
            return Err(DomainError::ValidationFailed(
                "conflict tags must be non-empty and distinct".into(),
            ));
        }
        if self.resync && self.check_sync == CheckSync::Only {
            return Err(DomainError::ValidationFailed(
                "resync cannot be combined with check-sync only".into(),
            ));
        }
        for pattern in &self.excludes {
            glob::Pattern::new(pattern).map_err(|e| {
                DomainError::ValidationFailed(format!("invalid exclude glob '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}
