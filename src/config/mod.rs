//! Configuration management for repo-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Repository providers, in evaluation order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Reconciliation settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Batch fan-out settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Recurring run settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Outbound HTTP configuration shared by providers
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix REPO_SYNC_
    ///
    /// `REPO_SYNC_PROVIDERS` is a comma-separated list of provider ids, in order.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(providers) = std::env::var("REPO_SYNC_PROVIDERS") {
            config.providers = providers
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ProviderConfig::new)
                .collect();
        }

        if let Ok(path) = std::env::var("REPO_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(dry_run) = std::env::var("REPO_SYNC_DRY_RUN") {
            config.sync.dry_run = dry_run.parse().unwrap_or(false);
        }
        if let Ok(timeout) = std::env::var("REPO_SYNC_FETCH_TIMEOUT_SECS") {
            config.sync.fetch_timeout_secs = timeout
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid fetch timeout".to_string()))?;
        }

        if let Ok(max) = std::env::var("REPO_SYNC_BATCH_MAX_CONCURRENT") {
            config.batch.max_concurrent = max
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid batch concurrency".to_string()))?;
        }

        if let Ok(token) = std::env::var("REPO_SYNC_GITHUB_TOKEN") {
            if let Some(github) = config.providers.iter_mut().find(|p| p.id == "github") {
                github.options.insert("token".to_string(), token);
            }
        }

        if let Ok(level) = std::env::var("REPO_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Ids of enabled providers, in configured order
    pub fn enabled_provider_ids(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.id.as_str())
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "batch.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.sync.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(empty) = self.providers.iter().find(|p| p.id.trim().is_empty()) {
            return Err(ConfigError::MissingRequired(format!(
                "provider id (options: {:?})",
                empty.options
            )));
        }
        Ok(())
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider identifier (`github`, `yml_remote`)
    pub id: String,

    /// Whether this provider is enabled
    #[serde(default = "default_provider_enabled")]
    pub enabled: bool,

    /// Provider-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ProviderConfig {
    /// Enabled provider with no options
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            options: HashMap::new(),
        }
    }

    /// Add an option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

fn default_provider_enabled() -> bool {
    true
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Compute changes without writing or notifying
    #[serde(default)]
    pub dry_run: bool,

    /// Upper bound for a single provider fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Lifetime of a cached aggregate; unset means until invalidated
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Fetch each URL during validation to confirm it exists and is unclaimed
    #[serde(default = "default_validate_fetch")]
    pub validate_fetch: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            fetch_timeout_secs: default_fetch_timeout(),
            cache_ttl_secs: None,
            validate_fetch: default_validate_fetch(),
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_validate_fetch() -> bool {
    true
}

/// Batch fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of owners reconciled at once
    #[serde(default = "default_batch_concurrency")]
    pub max_concurrent: usize,

    /// Upper bound for one owner's reconciliation
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_batch_concurrency(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_task_timeout() -> u64 {
    600
}

/// Recurring run settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Whether `run` schedules recurring batches
    #[serde(default)]
    pub enabled: bool,

    /// Interval between runs over all active owners
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Delay before the first run
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Maximum random jitter added to each interval
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_jitter_secs(),
        }
    }
}

fn default_interval() -> u64 {
    3600 // 1 hour
}

fn default_initial_delay() -> u64 {
    5
}

fn default_jitter_secs() -> u64 {
    60
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_user_agent() -> String {
    format!("repo-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

/// Retry configuration for external API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Rate limiting configuration for HTTP clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum interval between requests to one host in milliseconds
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wait time when rate limited (in seconds)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
            max_concurrent: default_max_concurrent(),
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_min_interval() -> u64 {
    250
}

fn default_max_concurrent() -> usize {
    4
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache backend: `memory` or `filesystem`
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Filesystem cache configuration
    #[serde(default)]
    pub filesystem: FilesystemCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            filesystem: FilesystemCacheConfig::default(),
        }
    }
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

/// Filesystem cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemCacheConfig {
    /// Base path for cache storage
    #[serde(default = "default_cache_base_path")]
    pub base_path: String,
}

impl Default for FilesystemCacheConfig {
    fn default() -> Self {
        Self {
            base_path: default_cache_base_path(),
        }
    }
}

fn default_cache_base_path() -> String {
    "data/cache".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/repo-sync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `text`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax; unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
