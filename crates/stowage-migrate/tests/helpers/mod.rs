//! Test helpers: a site with local uploads, an in-memory bucket and in-memory
//! repositories.
//!
//! Run from workspace root: `cargo test -p stowage-migrate`.

#![allow(dead_code)]

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStoreExt, PutPayload};
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::constants::CURRENT_RENDER_VERSION;
use stowage_core::models::{Document, OptimizedImage, StoredFile};
use stowage_core::{AppError, MigrationConfig, S3Config};
use stowage_db::{MemoryDocumentRepository, MemoryUploadRepository, UploadRepository};
use stowage_migrate::MigrationEngine;
use stowage_storage::{LifecyclePolicy, LocalStore, S3Location, S3Store, StorageResult};
use tempfile::TempDir;

pub const SHA_A: &str = "0a0b0c0d0e0f101112131415161718191a1b1c1d";
pub const SHA_B: &str = "b0b1b2b3b4b5b6b7b8b9c0c1c2c3c4c5c6c7c8c9";
pub const SHA_C: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

pub const SITE: &str = "https://forum.example.com";
pub const SITE_CDN: &str = "https://cdn.example.com";
pub const BUCKET_URL: &str = "https://forum-uploads.s3.us-east-1.amazonaws.com";

/// Lifecycle rules are irrelevant here.
pub struct NoopLifecycle;

#[async_trait]
impl LifecyclePolicy for NoopLifecycle {
    async fn expire_prefix(&self, _prefix: &str, _days: u32) -> StorageResult<()> {
        Ok(())
    }
}

pub fn original(sha: &str, ext: &str) -> String {
    format!("original/1X/{}.{}", sha, ext)
}

pub fn local_url(path: &str) -> String {
    format!("/uploads/default/{}", path)
}

pub fn s3_config() -> S3Config {
    S3Config {
        bucket: "forum-uploads".to_string(),
        region: "us-east-1".to_string(),
        endpoint: None,
        access_key_id: Some("key".to_string()),
        secret_access_key: Some("secret".to_string()),
        use_iam_profile: false,
        cdn_url: None,
    }
}

pub struct TestSite {
    pub _temp_dir: TempDir,
    pub local: Arc<LocalStore>,
    pub bucket: Arc<InMemory>,
    pub remote: Arc<S3Store>,
    pub uploads: Arc<MemoryUploadRepository>,
    pub documents: Arc<MemoryDocumentRepository>,
}

impl TestSite {
    pub async fn new() -> Self {
        Self::with_scope(false).await
    }

    pub async fn with_scope(tenant_scoped: bool) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let local = LocalStore::new(temp_dir.path(), "default", SITE, Some(SITE_CDN))
            .await
            .expect("Failed to create local store");

        let bucket = Arc::new(InMemory::new());
        let remote = S3Store::with_object_store(
            bucket.clone(),
            None,
            S3Location::from_config(&s3_config(), "default", tenant_scoped),
            Arc::new(NoopLifecycle),
        );

        Self {
            _temp_dir: temp_dir,
            local: Arc::new(local),
            bucket,
            remote: Arc::new(remote),
            uploads: Arc::new(MemoryUploadRepository::new()),
            documents: Arc::new(MemoryDocumentRepository::new()),
        }
    }

    pub fn engine(&self, config: MigrationConfig) -> MigrationEngine {
        self.engine_with_uploads(config, self.uploads.clone())
    }

    pub fn engine_with_uploads(
        &self,
        config: MigrationConfig,
        uploads: Arc<dyn UploadRepository>,
    ) -> MigrationEngine {
        MigrationEngine::new(
            config,
            self.local.clone(),
            self.remote.clone(),
            uploads,
            self.documents.clone(),
        )
        .expect("Failed to create engine")
    }

    /// The site's upload records, with `hook` firing when `path` is looked up.
    pub fn uploads_with_hook(&self, path: &str, hook: LookupHook) -> Arc<HookedUploads> {
        Arc::new(HookedUploads {
            inner: self.uploads.clone(),
            url: local_url(path),
            hook,
        })
    }

    pub async fn write_local(&self, path: &str, size: usize) {
        let target = self.local.upload_root().join(path);
        tokio::fs::create_dir_all(target.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&target, vec![b'x'; size]).await.unwrap();
    }

    pub fn local_exists(&self, path: &str) -> bool {
        self.local.upload_root().join(path).exists()
    }

    pub async fn put_remote(&self, path: &str, size: usize) {
        let key = Path::from(self.remote.location().object_key(path));
        self.bucket
            .put(&key, PutPayload::from(vec![b'y'; size]))
            .await
            .unwrap();
    }

    pub async fn remote_size(&self, path: &str) -> Option<u64> {
        let key = Path::from(self.remote.location().object_key(path));
        self.bucket.head(&key).await.ok().map(|meta| meta.size as u64)
    }

    /// Objects under the site's key prefix, tombstones excluded.
    pub async fn bucket_object_count(&self) -> usize {
        self.remote.inventory().await.unwrap().len()
    }

    pub fn bucket_url(&self, path: &str) -> String {
        self.remote.location().url_for_path(path)
    }

    /// Upload record for a local original, addressed by its relative URL.
    pub async fn add_upload(&self, id: i64, sha: &str, ext: &str, size: i64) {
        self.uploads
            .insert_upload(StoredFile {
                id,
                sha1: sha.to_string(),
                original_filename: format!("file-{}.{}", id, ext),
                filesize: size,
                extension: Some(ext.to_string()),
                url: local_url(&original(sha, ext)),
                secure: false,
            })
            .await;
    }

    pub async fn add_optimized(&self, id: i64, upload_id: i64, path: &str) {
        self.uploads
            .insert_optimized_image(OptimizedImage {
                id,
                upload_id,
                url: local_url(path),
                width: 100,
                height: 100,
            })
            .await;
    }

    /// Document with a current render produced from `raw` by the toy renderer.
    pub async fn add_document(&self, id: i64, raw: &str) {
        self.documents
            .insert(Document {
                id,
                raw: raw.to_string(),
                cooked: render(raw),
                render_version: Some(CURRENT_RENDER_VERSION),
            })
            .await;
    }

    pub async fn upload_url(&self, id: i64) -> String {
        self.uploads
            .uploads()
            .await
            .into_iter()
            .find(|u| u.id == id)
            .map(|u| u.url)
            .unwrap()
    }
}

/// What happens when the upload phase looks up a hooked record.
pub enum LookupHook {
    /// Delete the local file, as if another process removed it mid-run.
    RemoveFile(PathBuf),
    Panic,
}

/// Upload records that misbehave for one URL and delegate everything else.
pub struct HookedUploads {
    inner: Arc<MemoryUploadRepository>,
    url: String,
    hook: LookupHook,
}

#[async_trait]
impl UploadRepository for HookedUploads {
    async fn uploads_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredFile>, AppError> {
        self.inner.uploads_with_url_prefix(prefix, after_id, limit).await
    }

    async fn count_with_url_prefix(&self, prefix: &str) -> Result<u64, AppError> {
        self.inner.count_with_url_prefix(prefix).await
    }

    async fn get_upload(&self, id: i64) -> Result<Option<StoredFile>, AppError> {
        self.inner.get_upload(id).await
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredFile>, AppError> {
        if url == self.url {
            match &self.hook {
                LookupHook::RemoveFile(path) => {
                    let _ = tokio::fs::remove_file(path).await;
                }
                LookupHook::Panic => panic!("record lookup for {} blew up", url),
            }
        }
        self.inner.find_by_url(url).await
    }

    async fn update_url(&self, id: i64, url: &str) -> Result<(), AppError> {
        self.inner.update_url(id, url).await
    }

    async fn optimized_images_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<OptimizedImage>, AppError> {
        self.inner
            .optimized_images_with_url_prefix(prefix, after_id, limit)
            .await
    }

    async fn delete_optimized_image(&self, id: i64) -> Result<(), AppError> {
        self.inner.delete_optimized_image(id).await
    }
}

/// Stand-in renderer: wraps the source in a paragraph.
pub fn render(raw: &str) -> String {
    format!("<p>{}</p>", raw)
}
