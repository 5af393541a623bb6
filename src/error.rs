//! Error types for the limiter.

use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A rate, task cost or limiter definition that can never be satisfied
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A storage backend read or write failed
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Releasing a storage resource failed
    #[error("Teardown failed: {0}")]
    TeardownFailure(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::BackendUnavailable(format!("redis: {}", err))
    }
}

impl From<sqlx::Error> for LimiterError {
    fn from(err: sqlx::Error) -> Self {
        LimiterError::BackendUnavailable(format!("sqlite: {}", err))
    }
}

impl From<::config::ConfigError> for LimiterError {
    fn from(err: ::config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
