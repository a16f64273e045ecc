#[cfg(feature = "storage-local")]
use crate::LocalStore;
#[cfg(feature = "storage-s3")]
use crate::S3Store;
use crate::{FileStore, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use stowage_core::StorageConfig;

/// Create the storage backend new uploads go to, based on configuration
///
/// `tenant_scoped` only matters for S3: keys are stored under `uploads/{db}/` so several
/// sites can share one bucket.
pub async fn create_file_store(
    config: &StorageConfig,
    tenant_scoped: bool,
) -> StorageResult<Arc<dyn FileStore>> {
    config.validate()?;

    match config.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let s3 = config.require_s3()?;
            let storage = S3Store::new(s3, &config.db_name, tenant_scoped).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => {
            let _ = tenant_scoped;
            Err(StorageError::ConfigError(
                "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
            ))
        }

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage = LocalStore::from_config(config).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(public_dir: PathBuf) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::Local,
            public_dir,
            base_url: "https://forum.example.com".to_string(),
            cdn_url: None,
            db_name: "default".to_string(),
            s3: None,
        }
    }

    #[tokio::test]
    async fn local_backend_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_file_store(&config(dir.path().to_path_buf()), false)
            .await
            .unwrap();
        assert_eq!(store.backend_type(), StorageBackend::Local);
        assert!(store.owns_url("/uploads/default/original/1X/a.png"));
        assert!(dir.path().join("uploads/default").is_dir());
    }

    #[tokio::test]
    async fn s3_backend_without_bucket_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.backend = StorageBackend::S3;
        let err = create_file_store(&cfg, false).await.err().unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }
}
