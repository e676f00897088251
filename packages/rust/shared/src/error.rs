//! Error types for catalogsync.
//!
//! Library crates use [`CatalogSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all catalogsync operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport error talking to the catalog API.
    #[error("network error: {0}")]
    Network(String),

    /// A response body that could not be decoded into a category record.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache sink error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record is missing data required to normalize it (e.g. a name for
    /// url key derivation).
    #[error("data integrity error for category {id}: {message}")]
    DataIntegrity { id: String, message: String },

    /// Downstream cache-invalidation call failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input that is not tied to a single record.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CatalogSyncError>;

impl CatalogSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a data integrity error for the record identified by `id`.
    pub fn data_integrity(id: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::DataIntegrity {
            id: id.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error concerns the record itself rather than the transport.
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::DataIntegrity { .. })
    }
}
