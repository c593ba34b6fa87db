//! Configuration for the instrumentation engine
//!
//! Options are grouped the way they appear in `cronista.toml`:
//!
//! ```toml
//! enabled = true
//! output_on_exit = true
//! debug = false
//!
//! [local]
//! enabled = true          # local-only: never try the remote table
//! data_dir = "./perf_data"
//! format = "json"
//! max_records = 1000
//!
//! [aws]
//! table_name = "cronista-data"
//! region = "us-east-1"
//!
//! [upload]
//! strategy = "on_exit"
//! timeout = 30.0
//!
//! [py_perf]
//! min_execution_time = 0.001
//! max_tracked_calls = 10000
//! exception_show_globals = true
//!
//! [filters]
//! include_functions = ["^calc_"]
//! track_arguments = false
//! ```
//!
//! Invalid values never abort start-up. [`Config::sanitized`] logs every
//! issue and falls back to the default for the offending option.

use crate::error::{CronistaError, Result};
use crate::render::RenderBudget;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names probed by [`Config::discover`], in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["cronista.toml", ".cronista.toml"];

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false every wrapped call runs un-instrumented
    pub enabled: bool,
    /// Flush the aggregate to storage when the process exits
    pub output_on_exit: bool,
    /// Verbose logging of engine internals
    pub debug: bool,
    pub local: LocalConfig,
    pub aws: AwsConfig,
    pub upload: UploadConfig,
    #[serde(rename = "py_perf", alias = "tracking")]
    pub tracking: TrackingConfig,
    pub filters: FilterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            output_on_exit: true,
            debug: false,
            local: LocalConfig::default(),
            aws: AwsConfig::default(),
            upload: UploadConfig::default(),
            tracking: TrackingConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

/// Local file storage options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Local-only mode: skip the remote table entirely
    pub enabled: bool,
    pub data_dir: PathBuf,
    /// Requested document format; only `json` is implemented
    pub format: String,
    /// Retention cap on persisted files
    pub max_records: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: PathBuf::from("./perf_data"),
            format: "json".to_string(),
            max_records: 1000,
        }
    }
}

/// Remote table options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub table_name: String,
    pub region: String,
    pub profile: Option<String>,
    pub auto_create_table: bool,
    pub read_capacity: u32,
    pub write_capacity: u32,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            table_name: "cronista-data".to_string(),
            region: "us-east-1".to_string(),
            profile: None,
            auto_create_table: true,
            read_capacity: 5,
            write_capacity: 5,
        }
    }
}

/// When aggregated results are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Once, at normal process exit
    OnExit,
    /// Only when `Engine::flush` is called
    Manual,
}

/// Upload options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub strategy: UploadStrategy,
    /// Remote persist timeout in seconds
    pub timeout: f64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            strategy: UploadStrategy::OnExit,
            timeout: 30.0,
        }
    }
}

/// Timing thresholds, capacities and diagnostic options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Calls faster than this (seconds) are not recorded
    pub min_execution_time: f64,
    /// ResultStore capacity; calls beyond it are dropped
    pub max_tracked_calls: usize,
    /// Include module globals in frame snapshots
    pub exception_show_globals: bool,
    /// FailureRegistry capacity; oldest reports are evicted beyond it
    pub failure_registry_size: usize,
    pub render: RenderBudget,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_execution_time: 0.001,
            max_tracked_calls: 10_000,
            exception_show_globals: true,
            failure_registry_size: 100,
            render: RenderBudget::default(),
        }
    }
}

/// Which calls are instrumented
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub include_modules: Vec<String>,
    pub exclude_modules: Vec<String>,
    /// Regex patterns matched from the start of the function name
    pub include_functions: Vec<String>,
    pub exclude_functions: Vec<String>,
    /// Capture arguments at call sites that do not decide for themselves
    pub track_arguments: bool,
}

/// Concrete on-disk format for local documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Json,
}

impl StorageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
        }
    }

    /// Resolve a requested format name, recording any substitution
    pub fn resolve(requested: &str) -> FormatResolution {
        match requested.trim().to_ascii_lowercase().as_str() {
            "json" => FormatResolution {
                format: StorageFormat::Json,
                substituted_from: None,
            },
            _ => FormatResolution {
                format: StorageFormat::Json,
                substituted_from: Some(requested.to_string()),
            },
        }
    }
}

/// Outcome of [`StorageFormat::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResolution {
    pub format: StorageFormat,
    /// The unsupported format that was replaced, if any
    pub substituted_from: Option<String>,
}

/// A single invalid option found by [`Config::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl From<ConfigIssue> for CronistaError {
    fn from(issue: ConfigIssue) -> Self {
        CronistaError::Configuration(issue.to_string())
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Look for a config file in the working directory, then `$HOME`
    ///
    /// Missing or unreadable files fall back to defaults. Environment
    /// overrides are applied and the result is sanitized.
    pub fn discover() -> Self {
        let mut candidates: Vec<PathBuf> = CONFIG_FILE_NAMES.iter().map(PathBuf::from).collect();
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(Path::new(&home).join(".cronista.toml"));
        }

        let mut config = Self::default();
        for path in candidates.iter().filter(|p| p.is_file()) {
            match Self::load(path) {
                Ok(loaded) => {
                    tracing::debug!("loaded configuration from {}", path.display());
                    config = loaded;
                    break;
                }
                Err(e) => {
                    tracing::warn!("ignoring config file {}: {}", path.display(), e);
                }
            }
        }

        config.apply_env();
        config.sanitized()
    }

    /// Apply `CRONISTA_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(v) = env_flag("CRONISTA_ENABLED") {
            self.enabled = v;
        }
        if let Some(v) = env_flag("CRONISTA_LOCAL_ONLY") {
            self.local.enabled = v;
        }
        if let Some(v) = env_flag("CRONISTA_DEBUG") {
            self.debug = v;
        }
        if let Some(dir) = std::env::var_os("CRONISTA_DATA_DIR") {
            self.local.data_dir = PathBuf::from(dir);
        }
    }

    /// Check every option, returning all problems found
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut issue = |field: &'static str, message: String| {
            issues.push(ConfigIssue { field, message });
        };

        let min = self.tracking.min_execution_time;
        if !min.is_finite() || min < 0.0 {
            issue(
                "py_perf.min_execution_time",
                format!("must be a non-negative number of seconds, got {min}"),
            );
        }
        if self.tracking.max_tracked_calls == 0 {
            issue("py_perf.max_tracked_calls", "must be at least 1".to_string());
        }
        if self.tracking.failure_registry_size == 0 {
            issue("py_perf.failure_registry_size", "must be at least 1".to_string());
        }
        if self.local.max_records == 0 {
            issue("local.max_records", "must be at least 1".to_string());
        }
        let timeout = self.upload.timeout;
        if !timeout.is_finite() || timeout <= 0.0 {
            issue(
                "upload.timeout",
                format!("must be a positive number of seconds, got {timeout}"),
            );
        }
        if self.aws.table_name.trim().is_empty() {
            issue("aws.table_name", "must not be empty".to_string());
        }
        if self.aws.read_capacity == 0 || self.aws.write_capacity == 0 {
            issue(
                "aws.read_capacity",
                "read and write capacity must be at least 1".to_string(),
            );
        }
        for pattern in &self.filters.include_functions {
            if let Err(e) = Regex::new(pattern) {
                issue("filters.include_functions", format!("invalid pattern '{pattern}': {e}"));
            }
        }
        for pattern in &self.filters.exclude_functions {
            if let Err(e) = Regex::new(pattern) {
                issue("filters.exclude_functions", format!("invalid pattern '{pattern}': {e}"));
            }
        }

        issues
    }

    /// Replace every invalid option with its default, logging each issue
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        for issue in self.validate() {
            let field = issue.field;
            tracing::warn!("{}; using default", CronistaError::from(issue));
            match field {
                "py_perf.min_execution_time" => {
                    self.tracking.min_execution_time = defaults.tracking.min_execution_time;
                }
                "py_perf.max_tracked_calls" => {
                    self.tracking.max_tracked_calls = defaults.tracking.max_tracked_calls;
                }
                "py_perf.failure_registry_size" => {
                    self.tracking.failure_registry_size = defaults.tracking.failure_registry_size;
                }
                "local.max_records" => self.local.max_records = defaults.local.max_records,
                "upload.timeout" => self.upload.timeout = defaults.upload.timeout,
                "aws.table_name" => self.aws.table_name = defaults.aws.table_name.clone(),
                "aws.read_capacity" => {
                    self.aws.read_capacity = defaults.aws.read_capacity;
                    self.aws.write_capacity = defaults.aws.write_capacity;
                }
                "filters.include_functions" => {
                    self.filters.include_functions.retain(|p| Regex::new(p).is_ok());
                }
                "filters.exclude_functions" => {
                    self.filters.exclude_functions.retain(|p| Regex::new(p).is_ok());
                }
                _ => {}
            }
        }
        self
    }

    pub fn min_execution_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.tracking.min_execution_time).unwrap_or_default()
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.upload.timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn is_local_only(&self) -> bool {
        self.local.enabled
    }

    pub fn flush_on_exit(&self) -> bool {
        self.output_on_exit && self.upload.strategy == UploadStrategy::OnExit
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!("ignoring {}={}: expected a boolean", name, other);
            None
        }
    }
}
