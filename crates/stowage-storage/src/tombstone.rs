//! Soft deletion.
//!
//! Removing an upload never destroys bytes immediately. The file is moved into a
//! tombstone area and only purged once it has sat there longer than a grace period, so
//! an accidental removal can be undone by moving the file back.

use crate::traits::{StorageError, StorageResult};
use async_trait::async_trait;

#[cfg(feature = "storage-local")]
use std::path::{Path, PathBuf};
#[cfg(feature = "storage-local")]
use std::time::{Duration, SystemTime};
#[cfg(feature = "storage-local")]
use tokio::fs;

#[cfg(feature = "storage-s3")]
use crate::lifecycle::LifecyclePolicy;
#[cfg(feature = "storage-s3")]
use object_store::path::Path as ObjectPath;
#[cfg(feature = "storage-s3")]
use object_store::ObjectStoreExt;
#[cfg(feature = "storage-s3")]
use std::sync::Arc;

const SECONDS_PER_DAY: u64 = 86_400;

/// Result of a tombstone purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Files older than the grace period were deleted directly.
    Swept { removed: u64 },
    /// Expiry was handed to the provider's lifecycle machinery.
    Delegated,
}

#[async_trait]
pub trait Tombstone: Send + Sync {
    /// Move the object at relative `path` into the tombstone.
    async fn mark_removed(&self, path: &str) -> StorageResult<()>;

    /// Permanently delete tombstoned objects older than `grace_period_days`.
    async fn purge_older_than(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome>;
}

/// Filesystem tombstone: `{public}/uploads/tombstone/{db}` mirrors `{public}/uploads/{db}`.
#[cfg(feature = "storage-local")]
#[derive(Debug, Clone)]
pub struct LocalTombstone {
    uploads_root: PathBuf,
    tombstone_root: PathBuf,
}

#[cfg(feature = "storage-local")]
impl LocalTombstone {
    pub fn new(uploads_root: impl Into<PathBuf>, tombstone_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            tombstone_root: tombstone_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.tombstone_root
    }

    async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::rename(from, to).await.is_err() {
            // Different filesystems: fall back to copy and delete.
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
        }
        Ok(())
    }

    /// The grace period counts from removal, not from the original upload.
    async fn touch(path: &Path) -> std::io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
            .await
            .map_err(std::io::Error::other)?
    }
}

#[cfg(feature = "storage-local")]
#[async_trait]
impl Tombstone for LocalTombstone {
    async fn mark_removed(&self, path: &str) -> StorageResult<()> {
        crate::keys::validate_key(path)?;
        let source = self.uploads_root.join(path);
        let target = self.tombstone_root.join(path);

        if !fs::try_exists(&source).await.unwrap_or(false) {
            tracing::debug!(path = %source.display(), "Nothing to tombstone");
            return Ok(());
        }

        Self::move_file(&source, &target).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to move {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;

        if let Err(e) = Self::touch(&target).await {
            tracing::warn!(
                error = %e,
                path = %target.display(),
                "Failed to refresh tombstone timestamp"
            );
        }

        tracing::info!(
            from = %source.display(),
            to = %target.display(),
            "Moved file to tombstone"
        );
        Ok(())
    }

    async fn purge_older_than(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(
                u64::from(grace_period_days) * SECONDS_PER_DAY,
            ))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let files = crate::walk::walk_files(&self.tombstone_root).await?;
        let mut removed = 0u64;

        for file in files {
            let modified = match file.metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(error = %e, path = %file.path.display(), "No mtime, skipping");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %file.path.display(),
                        "Failed to purge tombstoned file"
                    );
                }
            }
        }

        tracing::info!(
            root = %self.tombstone_root.display(),
            removed = removed,
            grace_period_days = grace_period_days,
            "Purged local tombstone"
        );
        Ok(PurgeOutcome::Swept { removed })
    }
}

/// Bucket tombstone: objects are copied under `tombstone_prefix` and expired by a
/// lifecycle rule on that prefix.
#[cfg(feature = "storage-s3")]
#[derive(Clone)]
pub struct BucketTombstone {
    store: Arc<dyn object_store::ObjectStore>,
    key_prefix: String,
    tombstone_prefix: String,
    lifecycle: Arc<dyn LifecyclePolicy>,
}

#[cfg(feature = "storage-s3")]
impl BucketTombstone {
    pub fn new(
        store: Arc<dyn object_store::ObjectStore>,
        key_prefix: impl Into<String>,
        tombstone_prefix: impl Into<String>,
        lifecycle: Arc<dyn LifecyclePolicy>,
    ) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            tombstone_prefix: tombstone_prefix.into(),
            lifecycle,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.tombstone_prefix
    }
}

#[cfg(feature = "storage-s3")]
#[async_trait]
impl Tombstone for BucketTombstone {
    async fn mark_removed(&self, path: &str) -> StorageResult<()> {
        crate::keys::validate_key(path)?;
        let from = ObjectPath::from(format!("{}{}", self.key_prefix, path));
        let to = ObjectPath::from(format!("{}{}", self.tombstone_prefix, path));

        self.store.copy(&from, &to).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(from.to_string()),
            other => StorageError::DeleteFailed(format!(
                "Failed to copy {} to {}: {}",
                from, to, other
            )),
        })?;

        self.store.delete(&from).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete {}: {}", from, e))
        })?;

        tracing::info!(from = %from, to = %to, "Moved object to tombstone");
        Ok(())
    }

    async fn purge_older_than(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome> {
        self.lifecycle
            .expire_prefix(&self.tombstone_prefix, grace_period_days)
            .await?;
        Ok(PurgeOutcome::Delegated)
    }
}
