use crate::state::MigrationState;
use crate::upload::UploadFailure;
use crate::verify::VerificationReport;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSummary {
    /// Local files found during inventory.
    pub inspected: usize,
    /// Files already in the bucket with the same size.
    pub skipped: usize,
    pub uploaded: usize,
    /// Dry runs only: files a real run would upload.
    pub would_upload: usize,
    pub failed: usize,
    /// Files left untouched because the run was cancelled.
    pub not_attempted: usize,
    pub failures: Vec<UploadFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RewriteSummary {
    pub uploads_remapped: u64,
    pub uploads_failed: u64,
    pub documents_rewritten: u64,
    pub documents_failed: u64,
    pub documents_flagged: u64,
    pub optimized_pruned: u64,
}

/// Completion report handed to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub state: MigrationState,
    pub local_files: usize,
    pub remote_objects: usize,
    pub uploads: UploadSummary,
    pub rewrite: RewriteSummary,
    pub verification: Option<VerificationReport>,
}

impl MigrationReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            state: MigrationState::Idle,
            local_files: 0,
            remote_objects: 0,
            uploads: UploadSummary::default(),
            rewrite: RewriteSummary::default(),
            verification: None,
        }
    }
}
