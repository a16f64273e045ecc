//! Shared constants.

/// Database (site) name used when none is configured.
pub const DEFAULT_DB_NAME: &str = "default";

/// Render version stamped on a document once its cached render is current.
/// Documents with a lower or missing version are waiting for a re-render.
pub const CURRENT_RENDER_VERSION: i32 = 2;

/// Lifetime of a signed URL handed out for a secure upload.
pub const SECURE_URL_TTL_SECS: u64 = 300;

/// Default number of upload workers used by the migration engine.
pub const DEFAULT_MIGRATION_CONCURRENCY: usize = 20;

/// Default page size for repository scans.
pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// Documents still waiting for a re-render that verification tolerates, since the
/// background render job clears them.
pub const DEFAULT_RERENDER_BACKLOG_THRESHOLD: u64 = 100;
