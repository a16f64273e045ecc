//! Storage abstraction trait
//!
//! This module defines the [`FileStore`] contract every upload backend implements.
//! Callers that persist a user file or render a link to one depend only on this
//! trait, never on which backend is active.

use crate::tombstone::PurgeOutcome;
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use stowage_core::models::StoredFile;
use stowage_core::ConfigError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::ConfigError(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Optional metadata attached to a stored file.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Name the user uploaded the file under. Non-image files are served as
    /// attachments with this name.
    pub filename: Option<String>,
    /// Declared MIME type; guessed from the filename or path when absent.
    pub content_type: Option<String>,
    /// Content checksum recorded alongside the object.
    pub checksum: Option<String>,
    /// Access-controlled file, only reachable through [`FileStore::download_url`].
    pub secure: bool,
}

/// Upload storage contract
///
/// `path` arguments are relative, content-addressed paths such as
/// `original/1X/{sha1}.png`. URLs are whatever the backend hands back from
/// [`FileStore::store`].
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `data` at `path` and return the URL callers should use from now on.
    ///
    /// Errors propagate to the caller. Nothing is retried and nothing falls back to
    /// another backend.
    async fn store(&self, data: Bytes, path: &str, options: &StoreOptions)
        -> StorageResult<String>;

    /// Soft-delete the file behind `url` by moving it into the tombstone.
    ///
    /// URLs this backend does not own are ignored. Failures are logged and returned;
    /// callers treat them as non-fatal since a later purge copes with a missed move.
    async fn remove(&self, url: &str) -> StorageResult<()>;

    /// Whether `url` belongs to this backend (and, for local storage, is on disk).
    async fn exists(&self, url: &str) -> bool;

    /// Prefix check only, no I/O.
    fn owns_url(&self, url: &str) -> bool;

    /// Absolute URL for a stored file.
    fn resolve_public_url(&self, file: &StoredFile) -> String;

    /// Swap the backend's origin for the configured CDN origin, if any.
    fn resolve_cdn_url(&self, url: &str) -> String;

    /// URL a client is sent to for `file`.
    ///
    /// Public files go through the CDN. Secure files never do: an object store hands
    /// out a short-lived signed URL, local storage keeps them on the site origin.
    async fn download_url(&self, file: &StoredFile) -> StorageResult<String>;

    /// Delete tombstoned files older than the grace period.
    async fn purge_tombstone(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
