//! Error types module
//!
//! `AppError` is the error returned by the repository layer. The `Database` variant
//! wraps `sqlx::Error` when the `sqlx` feature is enabled and a plain message
//! otherwise, so the in-memory repositories can build without a database driver.
//!
//! `ConfigError` is raised while loading or validating configuration. It is kept
//! separate so callers can tell a misconfiguration apart from a runtime failure.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

/// Configuration errors. Always raised before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_variable() {
        assert_eq!(
            ConfigError::Missing("S3_BUCKET").to_string(),
            "S3_BUCKET must be set"
        );
        let err = ConfigError::Invalid {
            key: "MIGRATION_CONCURRENCY",
            reason: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("MIGRATION_CONCURRENCY"));
    }

    #[test]
    fn anyhow_errors_keep_their_message() {
        let err: AppError = anyhow::anyhow!("broken row").into();
        assert!(matches!(err, AppError::InternalWithSource { ref message, .. } if message == "broken row"));
    }
}
