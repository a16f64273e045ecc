use crate::report::MigrationReport;
use stowage_core::{AppError, ConfigError};
use stowage_storage::StorageError;
use thiserror::Error;

/// Why a migration run did not complete.
///
/// Configuration problems are raised before any I/O. The run-level variants carry the
/// partial report so the operator can see how far the run got.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] AppError),

    #[error("{} upload(s) failed", .report.uploads.failed)]
    UploadsFailed { report: Box<MigrationReport> },

    #[error("Migration cancelled")]
    Cancelled { report: Box<MigrationReport> },

    #[error("Migration incomplete: verification found residual work")]
    Incomplete { report: Box<MigrationReport> },
}

impl MigrationError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MigrationError::Configuration(_)
                | MigrationError::Storage(StorageError::ConfigError(_))
        )
    }

    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            MigrationError::UploadsFailed { report }
            | MigrationError::Cancelled { report }
            | MigrationError::Incomplete { report } => Some(&**report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_distinguished() {
        let err: MigrationError = ConfigError::Missing("S3_BUCKET").into();
        assert!(err.is_configuration());
        assert!(err.report().is_none());

        let err: MigrationError =
            StorageError::ConfigError("S3_REGION or AWS_REGION must be set".into()).into();
        assert!(err.is_configuration());

        let mut report = MigrationReport::new(false);
        report.uploads.failed = 2;
        let err = MigrationError::UploadsFailed {
            report: Box::new(report),
        };
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "2 upload(s) failed");
        assert_eq!(err.report().map(|r| r.uploads.failed), Some(2));
    }
}
