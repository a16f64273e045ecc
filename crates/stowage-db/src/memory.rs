//! In-memory repositories.
//!
//! Behave like the PostgreSQL implementations for everything the migration engine
//! relies on. Used by tests and by dry runs against fixtures.

use crate::repository::{DocumentRepository, UploadRepository};
use std::collections::{BTreeMap, HashSet};
use stowage_core::constants::CURRENT_RENDER_VERSION;
use stowage_core::models::{Document, OptimizedImage, StoredFile};
use stowage_core::AppError;
use tokio::sync::RwLock;

fn page<T: Clone>(
    rows: &BTreeMap<i64, T>,
    after_id: i64,
    limit: i64,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    rows.range(after_id.saturating_add(1)..)
        .map(|(_, row)| row)
        .filter(|row| keep(row))
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct MemoryUploadRepository {
    uploads: RwLock<BTreeMap<i64, StoredFile>>,
    optimized: RwLock<BTreeMap<i64, OptimizedImage>>,
}

impl MemoryUploadRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_upload(&self, upload: StoredFile) {
        self.uploads.write().await.insert(upload.id, upload);
    }

    pub async fn insert_optimized_image(&self, image: OptimizedImage) {
        self.optimized.write().await.insert(image.id, image);
    }

    pub async fn uploads(&self) -> Vec<StoredFile> {
        self.uploads.read().await.values().cloned().collect()
    }

    pub async fn optimized_images(&self) -> Vec<OptimizedImage> {
        self.optimized.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl UploadRepository for MemoryUploadRepository {
    async fn uploads_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredFile>, AppError> {
        let uploads = self.uploads.read().await;
        Ok(page(&uploads, after_id, limit, |u| u.url.starts_with(prefix)))
    }

    async fn count_with_url_prefix(&self, prefix: &str) -> Result<u64, AppError> {
        let uploads = self.uploads.read().await;
        Ok(uploads.values().filter(|u| u.url.starts_with(prefix)).count() as u64)
    }

    async fn get_upload(&self, id: i64) -> Result<Option<StoredFile>, AppError> {
        Ok(self.uploads.read().await.get(&id).cloned())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredFile>, AppError> {
        let uploads = self.uploads.read().await;
        Ok(uploads.values().find(|u| u.url == url).cloned())
    }

    async fn update_url(&self, id: i64, url: &str) -> Result<(), AppError> {
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("upload {}", id)))?;
        upload.url = url.to_string();
        Ok(())
    }

    async fn optimized_images_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<OptimizedImage>, AppError> {
        let images = self.optimized.read().await;
        Ok(page(&images, after_id, limit, |i| i.url.starts_with(prefix)))
    }

    async fn delete_optimized_image(&self, id: i64) -> Result<(), AppError> {
        self.optimized.write().await.remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDocumentRepository {
    documents: RwLock<BTreeMap<i64, Document>>,
    read_only: RwLock<HashSet<i64>>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, document: Document) {
        self.documents.write().await.insert(document.id, document);
    }

    pub async fn get(&self, id: i64) -> Option<Document> {
        self.documents.read().await.get(&id).cloned()
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.documents.read().await.values().cloned().collect()
    }

    /// Make every write to `id` fail, the way a locked or constrained row would.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn reject_writes(&self, id: i64) {
        self.read_only.write().await.insert(id);
    }

    /// Stand-in for the external render job: re-render every flagged document.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn rerender_flagged(&self, render: impl Fn(&str) -> String) -> u64 {
        let mut documents = self.documents.write().await;
        let mut rendered = 0;
        for document in documents.values_mut().filter(|d| d.needs_rerender()) {
            document.cooked = render(&document.raw);
            document.render_version = Some(CURRENT_RENDER_VERSION);
            rendered += 1;
        }
        rendered
    }

    async fn check_writable(&self, id: i64) -> Result<(), AppError> {
        if self.read_only.read().await.contains(&id) {
            return Err(AppError::Internal(format!("document {} is read-only", id)));
        }
        Ok(())
    }
}

fn contains_any(text: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| text.contains(n.as_str()))
}

#[async_trait::async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn documents_containing(
        &self,
        needle: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Document>, AppError> {
        let documents = self.documents.read().await;
        Ok(page(&documents, after_id, limit, |d| d.raw.contains(needle)))
    }

    async fn update_raw(&self, id: i64, raw: &str) -> Result<(), AppError> {
        self.check_writable(id).await?;
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
        document.raw = raw.to_string();
        Ok(())
    }

    async fn flag_for_rerender(&self, id: i64) -> Result<(), AppError> {
        self.check_writable(id).await?;
        if let Some(document) = self.documents.write().await.get_mut(&id) {
            document.render_version = None;
        }
        Ok(())
    }

    async fn flag_cooked_containing(&self, needles: &[String]) -> Result<u64, AppError> {
        let read_only = self.read_only.read().await;
        let mut documents = self.documents.write().await;
        let mut flagged = 0;
        for document in documents.values_mut() {
            if document.render_version.is_some()
                && !read_only.contains(&document.id)
                && contains_any(&document.cooked, needles)
            {
                document.render_version = None;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn count_stale_renders(
        &self,
        needles: &[String],
        current_version: i32,
    ) -> Result<u64, AppError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .filter(|d| d.render_version == Some(current_version))
            .filter(|d| contains_any(&d.cooked, needles))
            .count() as u64)
    }

    async fn count_needing_rerender(&self, current_version: i32) -> Result<u64, AppError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .filter(|d| d.render_version != Some(current_version))
            .count() as u64)
    }
}
