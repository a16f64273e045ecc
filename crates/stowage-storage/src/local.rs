use crate::keys::{local_url_prefix, strip_query, validate_key, OPTIMIZED_DIR, ORIGINAL_DIR};
use crate::tombstone::{LocalTombstone, PurgeOutcome, Tombstone};
use crate::traits::{FileStore, StorageError, StorageResult, StoreOptions};
use crate::walk::{relative_key, walk_files};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use stowage_core::models::StoredFile;
use stowage_core::StorageConfig;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A file found on local disk during inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObject {
    /// Path relative to the uploads root, `/`-separated.
    pub path: String,
    pub absolute: PathBuf,
    pub size: u64,
}

/// Local filesystem storage implementation
///
/// Files live under `{public_dir}/uploads/{db}` and are served by the web server as
/// `/uploads/{db}/...`, so the URL of a stored file is relative.
#[derive(Debug, Clone)]
pub struct LocalStore {
    upload_root: PathBuf,
    db_name: String,
    url_prefix: String,
    base_url: String,
    cdn_url: Option<String>,
    tombstone: LocalTombstone,
}

fn strip_scheme(origin: &str) -> &str {
    origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
}

impl LocalStore {
    /// Create a new LocalStore instance
    ///
    /// # Arguments
    /// * `public_dir` - Public web root (e.g., "/var/www/forum/public")
    /// * `db_name` - Site database name, one upload directory per site
    /// * `base_url` - Origin the site is served from (e.g., "https://forum.example.com")
    /// * `cdn_url` - Optional CDN origin in front of the site
    pub async fn new(
        public_dir: impl Into<PathBuf>,
        db_name: &str,
        base_url: &str,
        cdn_url: Option<&str>,
    ) -> StorageResult<Self> {
        let public_dir = public_dir.into();
        let upload_root = public_dir.join("uploads").join(db_name);
        let tombstone_root = public_dir.join("uploads").join("tombstone").join(db_name);

        fs::create_dir_all(&upload_root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                upload_root.display(),
                e
            ))
        })?;

        Ok(LocalStore {
            tombstone: LocalTombstone::new(&upload_root, tombstone_root),
            upload_root,
            db_name: db_name.to_string(),
            url_prefix: local_url_prefix(db_name),
            base_url: base_url.trim_end_matches('/').to_string(),
            cdn_url: cdn_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        Self::new(
            &config.public_dir,
            &config.db_name,
            &config.base_url,
            config.cdn_url.as_deref(),
        )
        .await
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cdn_url(&self) -> Option<&str> {
        self.cdn_url.as_deref()
    }

    /// `/uploads/{db}/`
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// `/uploads/{db}/original/`
    pub fn original_url_prefix(&self) -> String {
        format!("{}{}/", self.url_prefix, ORIGINAL_DIR)
    }

    /// `/uploads/{db}/optimized/`
    pub fn optimized_url_prefix(&self) -> String {
        format!("{}{}/", self.url_prefix, OPTIMIZED_DIR)
    }

    pub fn tombstone(&self) -> &LocalTombstone {
        &self.tombstone
    }

    fn origins(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.base_url.as_str()).chain(self.cdn_url.as_deref())
    }

    /// Relative storage path for a URL this store serves.
    ///
    /// Accepts the relative form, the absolute form on the base or CDN origin, and
    /// scheme-relative variants of both.
    pub fn relative_path_from_url(&self, url: &str) -> Option<String> {
        let url = strip_query(url);
        let path = if let Some(host_path) = url.strip_prefix("//") {
            self.origins()
                .find_map(|origin| host_path.strip_prefix(strip_scheme(origin)))?
        } else if url.starts_with('/') {
            url
        } else {
            self.origins().find_map(|origin| url.strip_prefix(origin))?
        };

        let relative = path.strip_prefix(self.url_prefix.as_str())?;
        validate_key(relative).ok()?;
        Some(relative.to_string())
    }

    fn path_for(&self, relative: &str) -> StorageResult<PathBuf> {
        validate_key(relative)?;
        Ok(self.upload_root.join(relative))
    }

    /// Every file under the uploads root.
    pub async fn inventory(&self) -> StorageResult<Vec<LocalObject>> {
        let start = std::time::Instant::now();
        let entries = walk_files(&self.upload_root).await?;

        let objects: Vec<LocalObject> = entries
            .into_iter()
            .filter_map(|entry| {
                let path = relative_key(&self.upload_root, &entry.path)?;
                Some(LocalObject {
                    path,
                    size: entry.metadata.len(),
                    absolute: entry.path,
                })
            })
            .collect();

        tracing::info!(
            root = %self.upload_root.display(),
            files = objects.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local inventory complete"
        );
        Ok(objects)
    }

    pub async fn read(&self, relative: &str) -> StorageResult<Bytes> {
        let path = self.path_for(relative)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl FileStore for LocalStore {
    async fn store(
        &self,
        data: Bytes,
        path: &str,
        _options: &StoreOptions,
    ) -> StorageResult<String> {
        let target = self.path_for(path)?;
        let size = data.len();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&target).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                target.display(),
                e
            ))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", target.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", target.display(), e))
        })?;

        tracing::info!(
            path = %target.display(),
            key = %path,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(format!("{}{}", self.url_prefix, path))
    }

    async fn remove(&self, url: &str) -> StorageResult<()> {
        let Some(relative) = self.relative_path_from_url(url) else {
            return Ok(());
        };

        self.tombstone.mark_removed(&relative).await.map_err(|e| {
            tracing::warn!(error = %e, url = %url, "Local storage remove failed");
            e
        })
    }

    async fn exists(&self, url: &str) -> bool {
        match self.relative_path_from_url(url) {
            Some(relative) => fs::try_exists(self.upload_root.join(relative))
                .await
                .unwrap_or(false),
            None => false,
        }
    }

    fn owns_url(&self, url: &str) -> bool {
        self.relative_path_from_url(url).is_some()
    }

    fn resolve_public_url(&self, file: &StoredFile) -> String {
        if file.url.starts_with('/') && !file.url.starts_with("//") {
            format!("{}{}", self.base_url, file.url)
        } else {
            file.url.clone()
        }
    }

    fn resolve_cdn_url(&self, url: &str) -> String {
        let Some(ref cdn) = self.cdn_url else {
            return url.to_string();
        };
        if url.starts_with('/') && !url.starts_with("//") {
            return format!("{}{}", cdn, url);
        }
        match url.strip_prefix(self.base_url.as_str()) {
            Some(rest) if rest.starts_with('/') => format!("{}{}", cdn, rest),
            _ => url.to_string(),
        }
    }

    async fn download_url(&self, file: &StoredFile) -> StorageResult<String> {
        let url = self.resolve_public_url(file);
        if file.secure {
            return Ok(url);
        }
        Ok(self.resolve_cdn_url(&url))
    }

    async fn purge_tombstone(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome> {
        self.tombstone.purge_older_than(grace_period_days).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    async fn store_in(dir: &Path) -> LocalStore {
        LocalStore::new(
            dir,
            "default",
            "https://forum.example.com/",
            Some("https://cdn.example.com"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn store_returns_relative_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let path = format!("original/1X/{}.png", SHA);

        let url = store
            .store(Bytes::from_static(b"0123456789"), &path, &StoreOptions::default())
            .await
            .unwrap();

        assert_eq!(url, format!("/uploads/default/{}", path));
        assert!(store.exists(&url).await);
        let on_disk = dir.path().join("uploads/default").join(&path);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn url_forms_resolve_to_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let expected = Some("original/1X/a.png".to_string());

        for url in [
            "/uploads/default/original/1X/a.png",
            "/uploads/default/original/1X/a.png?dl=1",
            "https://forum.example.com/uploads/default/original/1X/a.png",
            "//forum.example.com/uploads/default/original/1X/a.png",
            "https://cdn.example.com/uploads/default/original/1X/a.png",
        ] {
            assert_eq!(store.relative_path_from_url(url), expected, "{}", url);
        }

        assert_eq!(
            store.relative_path_from_url("/uploads/other/original/1X/a.png"),
            None
        );
        assert_eq!(
            store.relative_path_from_url("https://bucket.s3.amazonaws.com/original/1X/a.png"),
            None
        );
        assert_eq!(
            store.relative_path_from_url("/uploads/default/../../etc/passwd"),
            None
        );
    }

    #[tokio::test]
    async fn remove_moves_into_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let url = store
            .store(
                Bytes::from_static(b"abc"),
                "original/1X/b.txt",
                &StoreOptions::default(),
            )
            .await
            .unwrap();

        store.remove(&url).await.unwrap();

        assert!(!store.exists(&url).await);
        let tombstoned = dir
            .path()
            .join("uploads/tombstone/default/original/1X/b.txt");
        assert_eq!(std::fs::read(tombstoned).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn remove_ignores_foreign_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        store
            .remove("https://bucket.s3.us-east-1.amazonaws.com/original/1X/c.png")
            .await
            .unwrap();
        assert!(!store.owns_url("https://bucket.s3.us-east-1.amazonaws.com/original/1X/c.png"));
    }

    #[tokio::test]
    async fn traversal_is_rejected_on_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let err = store
            .store(Bytes::from_static(b"x"), "../escape", &StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn public_and_cdn_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let file = StoredFile {
            id: 1,
            sha1: SHA.to_string(),
            original_filename: "a.png".to_string(),
            filesize: 3,
            extension: Some("png".to_string()),
            url: "/uploads/default/original/1X/a.png".to_string(),
            secure: false,
        };

        assert_eq!(
            store.resolve_public_url(&file),
            "https://forum.example.com/uploads/default/original/1X/a.png"
        );
        assert_eq!(
            store.resolve_cdn_url(&file.url),
            "https://cdn.example.com/uploads/default/original/1X/a.png"
        );
        assert_eq!(
            store.resolve_cdn_url("https://forum.example.com/uploads/default/x.png"),
            "https://cdn.example.com/uploads/default/x.png"
        );
        assert_eq!(
            store.resolve_cdn_url("https://elsewhere.example.org/x.png"),
            "https://elsewhere.example.org/x.png"
        );
    }

    #[tokio::test]
    async fn secure_files_skip_the_cdn() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        let mut file = StoredFile {
            id: 1,
            sha1: SHA.to_string(),
            original_filename: "a.pdf".to_string(),
            filesize: 3,
            extension: Some("pdf".to_string()),
            url: "/uploads/default/original/1X/a.pdf".to_string(),
            secure: false,
        };

        assert_eq!(
            store.download_url(&file).await.unwrap(),
            "https://cdn.example.com/uploads/default/original/1X/a.pdf"
        );
        file.secure = true;
        assert_eq!(
            store.download_url(&file).await.unwrap(),
            "https://forum.example.com/uploads/default/original/1X/a.pdf"
        );
    }

    #[tokio::test]
    async fn inventory_lists_relative_paths_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        for (path, body) in [
            ("original/1X/a.png", &b"0123456789"[..]),
            ("original/2X/f/b.pdf", &b"01234567890123456789"[..]),
        ] {
            store
                .store(Bytes::copy_from_slice(body), path, &StoreOptions::default())
                .await
                .unwrap();
        }

        let inventory = store.inventory().await.unwrap();
        let summary: Vec<(&str, u64)> = inventory
            .iter()
            .map(|o| (o.path.as_str(), o.size))
            .collect();
        assert_eq!(
            summary,
            vec![("original/1X/a.png", 10), ("original/2X/f/b.pdf", 20)]
        );
    }
}
