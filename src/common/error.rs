//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Correlation store errors.
///
/// Only the durable backend produces these; the in-memory store is infallible.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store task failed: {message}")]
    Task { message: String },

    #[error("Corrupt record: {message}")]
    Corrupt { message: String },
}

/// Errors reported by an outbound platform adapter.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The target message (or chat) no longer exists on the platform.
    #[error("Target not found: {message}")]
    NotFound { message: String },

    /// The platform refused the request.
    #[error("Platform rejected request: {message}")]
    Rejected { message: String },

    /// The request never reached the platform.
    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl DispatchError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Whether the error means the target is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

/// Result type alias using AppError.
#[allow(dead_code)]
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for outbound platform operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
