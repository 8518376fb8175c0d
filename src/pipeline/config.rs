//! Pipeline configuration.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables. Environment values win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::concurrency::DEFAULT_MAX_CONCURRENCY;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES};
use crate::workspace::WorkspaceConfig;

/// Default preview budget handed to deep analysis (3000 tokens at ~2 chars each).
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 6000;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file is not valid YAML for this schema.
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retry budget applied to every collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryConfig {
    /// Builds a retry policy labelled with `context`.
    pub fn policy(&self, context: impl Into<String>) -> RetryPolicy {
        RetryPolicy::new(context)
            .with_max_retries(self.max_retries)
            .with_base_delay(self.base_delay)
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items analyzed concurrently.
    pub max_concurrency: usize,
    /// Preview budget per deep analysis.
    pub max_content_bytes: usize,
    /// History file used by the JSON snapshot store.
    pub snapshot_path: PathBuf,
    /// Directory the JSON sink writes aggregates into.
    pub output_dir: PathBuf,

    /// Workspace quotas and location.
    pub workspace: WorkspaceConfig,
    /// Result cache settings.
    pub cache: CacheConfig,
    /// Retry budget.
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            snapshot_path: PathBuf::from("data/history.json"),
            output_dir: PathBuf::from("output"),
            workspace: WorkspaceConfig::default(),
            cache: CacheConfig::new(500)
                .with_ttl(Duration::from_secs(30 * 60))
                .with_persistence("data/cache"),
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults, overlays `file` if given, then the environment, and validates.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            PipelineFileConfig::from_path(path)?.apply(&mut config);
        }
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WORKSPACE_ROOT`: parent directory of workspaces
    /// - `WORKSPACE_MAX_SIZE_MB`: size quota (default: 50)
    /// - `WORKSPACE_MAX_FILE_COUNT`: candidate file cap (default: 500)
    /// - `WORKSPACE_MAX_FILE_BYTES`: per-file size ceiling (default: 102400)
    /// - `WORKSPACE_CLONE_TIMEOUT_MS`: materialize timeout (default: 60000)
    /// - `WORKSPACE_STALE_HOURS`: sweep threshold (default: 1)
    /// - `WORKSPACE_PREVIEW_CHARS`: per-file preview length (default: 500)
    /// - `PIPELINE_MAX_CONCURRENCY`: items in flight (default: 3)
    /// - `PIPELINE_MAX_CONTENT_BYTES`: preview budget (default: 6000)
    /// - `PIPELINE_SNAPSHOT_PATH`: history file (default: data/history.json)
    /// - `PIPELINE_OUTPUT_DIR`: aggregate output directory (default: output)
    /// - `RETRY_MAX_RETRIES`: retries per call (default: 3)
    /// - `RETRY_BASE_DELAY_MS`: first backoff (default: 1000)
    /// - `CACHE_TTL_SECS`: entry lifetime (default: 1800)
    /// - `CACHE_MAX_SIZE`: entry capacity (default: 500)
    /// - `CACHE_PERSIST`: mirror entries to disk (default: true)
    /// - `CACHE_DIR`: persisted entry directory (default: data/cache)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays values provided by `lookup`, keyed by environment variable name.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Workspace settings
        if let Some(val) = lookup("WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(val);
        }
        if let Some(val) = lookup("WORKSPACE_MAX_SIZE_MB") {
            self.workspace.max_size_mb = parse_env_value(&val, "WORKSPACE_MAX_SIZE_MB")?;
        }
        if let Some(val) = lookup("WORKSPACE_MAX_FILE_COUNT") {
            self.workspace.max_file_count = parse_env_value(&val, "WORKSPACE_MAX_FILE_COUNT")?;
        }
        if let Some(val) = lookup("WORKSPACE_MAX_FILE_BYTES") {
            self.workspace.max_file_bytes = parse_env_value(&val, "WORKSPACE_MAX_FILE_BYTES")?;
        }
        if let Some(val) = lookup("WORKSPACE_CLONE_TIMEOUT_MS") {
            let ms: u64 = parse_env_value(&val, "WORKSPACE_CLONE_TIMEOUT_MS")?;
            self.workspace.clone_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("WORKSPACE_STALE_HOURS") {
            let hours: u64 = parse_env_value(&val, "WORKSPACE_STALE_HOURS")?;
            self.workspace.stale_after = Duration::from_secs(hours * 3600);
        }
        if let Some(val) = lookup("WORKSPACE_PREVIEW_CHARS") {
            self.workspace.preview_chars = parse_env_value(&val, "WORKSPACE_PREVIEW_CHARS")?;
        }

        // Pipeline settings
        if let Some(val) = lookup("PIPELINE_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env_value(&val, "PIPELINE_MAX_CONCURRENCY")?;
        }
        if let Some(val) = lookup("PIPELINE_MAX_CONTENT_BYTES") {
            self.max_content_bytes = parse_env_value(&val, "PIPELINE_MAX_CONTENT_BYTES")?;
        }
        if let Some(val) = lookup("PIPELINE_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("PIPELINE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }

        // Retry settings
        if let Some(val) = lookup("RETRY_MAX_RETRIES") {
            self.retry.max_retries = parse_env_value(&val, "RETRY_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("RETRY_BASE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "RETRY_BASE_DELAY_MS")?;
            self.retry.base_delay = Duration::from_millis(ms);
        }

        // Cache settings
        if let Some(val) = lookup("CACHE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "CACHE_TTL_SECS")?;
            self.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("CACHE_MAX_SIZE") {
            self.cache.max_size = parse_env_value(&val, "CACHE_MAX_SIZE")?;
        }
        if let Some(val) = lookup("CACHE_PERSIST") {
            self.cache.persist = parse_env_bool(&val, "CACHE_PERSIST")?;
        }
        if let Some(val) = lookup("CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_content_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_content_bytes must be greater than 0".to_string(),
            ));
        }
        if self.workspace.max_size_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "workspace.max_size_mb must be greater than 0".to_string(),
            ));
        }
        if self.workspace.max_file_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "workspace.max_file_count must be greater than 0".to_string(),
            ));
        }
        if self.workspace.max_file_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "workspace.max_file_bytes must be greater than 0".to_string(),
            ));
        }
        if self.workspace.clone_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "workspace.clone_timeout must be greater than 0".to_string(),
            ));
        }
        if self.workspace.preview_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "workspace.preview_chars must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "cache.max_size must be greater than 0".to_string(),
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cache.ttl must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to set concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Builder method to set the preview budget.
    pub fn with_max_content_bytes(mut self, bytes: usize) -> Self {
        self.max_content_bytes = bytes;
        self
    }

    /// Builder method to set the snapshot path.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the workspace configuration.
    pub fn with_workspace(mut self, workspace: WorkspaceConfig) -> Self {
        self.workspace = workspace;
        self
    }

    /// Builder method to set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Builder method to set the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Optional YAML overlay; every field left out keeps its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineFileConfig {
    pub max_concurrency: Option<usize>,
    pub max_content_bytes: Option<usize>,
    pub snapshot_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub workspace: WorkspaceFileConfig,
    pub cache: CacheFileConfig,
    pub retry: RetryFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceFileConfig {
    pub root: Option<PathBuf>,
    pub max_size_mb: Option<u64>,
    pub max_file_count: Option<usize>,
    pub max_file_bytes: Option<u64>,
    pub clone_timeout_ms: Option<u64>,
    pub stale_hours: Option<u64>,
    pub preview_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheFileConfig {
    pub ttl_secs: Option<u64>,
    pub max_size: Option<usize>,
    pub persist: Option<bool>,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryFileConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

impl PipelineFileConfig {
    /// Reads and parses a YAML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_yaml(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }

    /// Writes every provided value into `config`.
    pub fn apply(self, config: &mut PipelineConfig) {
        if let Some(v) = self.max_concurrency {
            config.max_concurrency = v;
        }
        if let Some(v) = self.max_content_bytes {
            config.max_content_bytes = v;
        }
        if let Some(v) = self.snapshot_path {
            config.snapshot_path = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }

        let ws = self.workspace;
        if let Some(v) = ws.root {
            config.workspace.root = v;
        }
        if let Some(v) = ws.max_size_mb {
            config.workspace.max_size_mb = v;
        }
        if let Some(v) = ws.max_file_count {
            config.workspace.max_file_count = v;
        }
        if let Some(v) = ws.max_file_bytes {
            config.workspace.max_file_bytes = v;
        }
        if let Some(v) = ws.clone_timeout_ms {
            config.workspace.clone_timeout = Duration::from_millis(v);
        }
        if let Some(v) = ws.stale_hours {
            config.workspace.stale_after = Duration::from_secs(v * 3600);
        }
        if let Some(v) = ws.preview_chars {
            config.workspace.preview_chars = v;
        }

        if let Some(v) = self.cache.ttl_secs {
            config.cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.cache.max_size {
            config.cache.max_size = v;
        }
        if let Some(v) = self.cache.persist {
            config.cache.persist = v;
        }
        if let Some(v) = self.cache.dir {
            config.cache.cache_dir = v;
        }

        if let Some(v) = self.retry.max_retries {
            config.retry.max_retries = v;
        }
        if let Some(v) = self.retry.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(v);
        }
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
