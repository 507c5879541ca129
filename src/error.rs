//! Application error types for repo-sync
//!
//! Each domain has its own `thiserror` enum; `AppError` aggregates them for
//! the binary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::models::OwnerId;

/// Provider plugin errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PluginError {
    /// No provider registered under this id
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// A provider with the same id is already registered
    #[error("Plugin already registered: {0}")]
    Duplicate(String),

    /// Plugin initialization failed
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    /// Plugin configuration invalid
    #[error("Invalid plugin configuration: {0}")]
    InvalidConfig(String),
}

/// Cache-related errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error during cache operation
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection-level failure reported by the background database thread
    #[error("Database connection error: {0}")]
    Connection(tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, message))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::ConstraintViolation(message.unwrap_or_else(|| code.to_string()))
            }
            tokio_rusqlite::Error::Rusqlite(inner) => DbError::Sqlite(inner),
            other => DbError::Connection(other),
        }
    }
}

/// Provider fetch errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Unauthorized
    #[error("Unauthorized")]
    Unauthorized,

    /// Fetch did not complete within the configured bound
    #[error("Fetch timed out after {0} seconds")]
    TimedOut(u64),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Problems found while validating URLs submitted for an owner
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("There are no enabled repository plugins")]
    NoEnabledProviders,

    #[error("The repository url {0} is not valid.")]
    NotValid(String),

    #[error("The repository url {0} was not found.")]
    NotFound(String),

    #[error("The repository url {0} could not be retrieved: {1}")]
    Unreachable(String, FetchError),

    #[error("The repository url {0} has been added by another user.")]
    Claimed(String),
}

/// Errors surfaced by the reconciliation service
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No providers are enabled in configuration
    #[error("There are no enabled repository plugins")]
    NoEnabledProviders,

    /// Owner does not exist in the entity store
    #[error("Owner not found: {0}")]
    OwnerNotFound(OwnerId),

    /// Submitted URLs failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Entity store failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),
}

/// Application-level error type
///
/// Aggregates all domain-specific error types for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Plugin error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Reconciliation error
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error while preparing the data directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            FetchError::NetworkTimeout => true,
            FetchError::ConnectionRefused => true,
            FetchError::RateLimited(_) => true,
            FetchError::ServerError(code) if *code >= 500 => true,
            FetchError::Network(_) => true,

            // Non-retryable errors
            FetchError::InvalidData(_) => false,
            FetchError::NotFound => false,
            FetchError::Unauthorized => false,
            FetchError::TimedOut(_) => false,
            FetchError::ServerError(_) => false, // 4xx errors
        }
    }
}
