//! Local to object store migration
//!
//! [`MigrationEngine::run`] moves every locally stored upload into the bucket and
//! points every persisted reference at its new location, in four phases:
//!
//! 1. **Inventory**: walk the local uploads root and list the bucket.
//! 2. **Upload**: push files missing remotely (or with a different size) through a
//!    bounded worker pool.
//! 3. **Rewrite**: update upload records and document sources, flag stale renders.
//! 4. **Verify**: recount residual work from the database alone.
//!
//! Re-running after a partial failure is safe: already synced files are skipped and
//! rewritten references no longer match any rule.

pub mod engine;
pub mod error;
pub mod inventory;
pub mod report;
pub mod rewrite;
pub mod state;
pub mod upload;
pub mod verify;

pub use engine::MigrationEngine;
pub use error::MigrationError;
pub use inventory::{Inventory, UploadPlan};
pub use report::{MigrationReport, RewriteSummary, UploadSummary};
pub use rewrite::{KeyFilter, RewriteRule, RewriteRules};
pub use state::MigrationState;
pub use upload::{UploadFailure, UploadOutcome, UploadPool};
pub use verify::{VerificationReport, Verifier};
