//! Post-migration audit.
//!
//! Counts are derived from the database alone, so verification can run on its own
//! after a crash or long after the migration finished. It never writes.

use serde::Serialize;
use std::sync::Arc;
use stowage_core::constants::CURRENT_RENDER_VERSION;
use stowage_core::AppError;
use stowage_db::{DocumentRepository, UploadRepository};
use stowage_storage::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Upload records still pointing at local storage.
    pub uploads_pending: u64,
    /// Documents with a current render that still references local storage.
    pub stale_renders: u64,
    /// Documents waiting for the render job.
    pub rerender_backlog: u64,
    pub rerender_backlog_threshold: u64,
    pub passed: bool,
}

impl VerificationReport {
    fn new(
        uploads_pending: u64,
        stale_renders: u64,
        rerender_backlog: u64,
        rerender_backlog_threshold: u64,
    ) -> Self {
        Self {
            uploads_pending,
            stale_renders,
            rerender_backlog,
            rerender_backlog_threshold,
            passed: uploads_pending == 0
                && stale_renders == 0
                && rerender_backlog <= rerender_backlog_threshold,
        }
    }
}

/// URL prefixes of upload records stored locally: the relative form and the absolute
/// forms on the site and CDN origins.
pub fn local_upload_prefixes(local: &LocalStore) -> Vec<String> {
    let prefix = local.url_prefix();
    let mut prefixes = vec![prefix.to_string()];
    for origin in std::iter::once(local.base_url()).chain(local.cdn_url()) {
        prefixes.push(format!("{}{}", origin, prefix));
        if let Some((_, host)) = origin.split_once("://") {
            prefixes.push(format!("//{}{}", host, prefix));
        }
    }
    prefixes
}

/// Substrings marking a render that still links an original or a derived image on
/// local storage.
pub fn local_render_needles(local: &LocalStore) -> Vec<String> {
    let mut needles = Vec::new();
    for prefix in [local.original_url_prefix(), local.optimized_url_prefix()] {
        needles.push(format!("\"{}", prefix));
        needles.push(format!("'{}", prefix));
        for origin in std::iter::once(local.base_url()).chain(local.cdn_url()) {
            let host = origin
                .split_once("://")
                .map(|(_, host)| host)
                .unwrap_or(origin);
            // Matches the scheme-relative form and, as a substring, the absolute one.
            needles.push(format!("//{}{}", host, prefix));
        }
    }
    needles
}

pub struct Verifier {
    uploads: Arc<dyn UploadRepository>,
    documents: Arc<dyn DocumentRepository>,
    upload_prefixes: Vec<String>,
    render_needles: Vec<String>,
    rerender_backlog_threshold: u64,
}

impl Verifier {
    pub fn new(
        local: &LocalStore,
        uploads: Arc<dyn UploadRepository>,
        documents: Arc<dyn DocumentRepository>,
        rerender_backlog_threshold: u64,
    ) -> Self {
        Self {
            uploads,
            documents,
            upload_prefixes: local_upload_prefixes(local),
            render_needles: local_render_needles(local),
            rerender_backlog_threshold,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<VerificationReport, AppError> {
        let mut uploads_pending = 0;
        for prefix in &self.upload_prefixes {
            uploads_pending += self.uploads.count_with_url_prefix(prefix).await?;
        }

        let stale_renders = self
            .documents
            .count_stale_renders(&self.render_needles, CURRENT_RENDER_VERSION)
            .await?;

        let rerender_backlog = self
            .documents
            .count_needing_rerender(CURRENT_RENDER_VERSION)
            .await?;

        let report = VerificationReport::new(
            uploads_pending,
            stale_renders,
            rerender_backlog,
            self.rerender_backlog_threshold,
        );

        if report.passed {
            tracing::info!(
                rerender_backlog = rerender_backlog,
                "Verification passed"
            );
        } else {
            tracing::warn!(
                uploads_pending = uploads_pending,
                stale_renders = stale_renders,
                rerender_backlog = rerender_backlog,
                threshold = self.rerender_backlog_threshold,
                "Verification found residual work"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::models::{Document, StoredFile};
    use stowage_db::{MemoryDocumentRepository, MemoryUploadRepository};

    async fn local(dir: &std::path::Path) -> LocalStore {
        LocalStore::new(
            dir,
            "default",
            "https://forum.example.com",
            Some("https://cdn.example.com"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn prefixes_cover_every_local_form() {
        let dir = tempfile::tempdir().unwrap();
        let local = local(dir.path()).await;
        assert_eq!(
            local_upload_prefixes(&local),
            vec![
                "/uploads/default/",
                "https://forum.example.com/uploads/default/",
                "//forum.example.com/uploads/default/",
                "https://cdn.example.com/uploads/default/",
                "//cdn.example.com/uploads/default/",
            ]
        );
        assert_eq!(
            local_render_needles(&local),
            vec![
                "\"/uploads/default/original/",
                "'/uploads/default/original/",
                "//forum.example.com/uploads/default/original/",
                "//cdn.example.com/uploads/default/original/",
                "\"/uploads/default/optimized/",
                "'/uploads/default/optimized/",
                "//forum.example.com/uploads/default/optimized/",
                "//cdn.example.com/uploads/default/optimized/",
            ]
        );
    }

    #[tokio::test]
    async fn backlog_under_threshold_passes() {
        let dir = tempfile::tempdir().unwrap();
        let local = local(dir.path()).await;
        let uploads = Arc::new(MemoryUploadRepository::new());
        let documents = Arc::new(MemoryDocumentRepository::new());
        documents
            .insert(Document {
                id: 1,
                raw: "x".to_string(),
                cooked: "<img src=\"/uploads/default/original/1X/a.png\">".to_string(),
                render_version: None,
            })
            .await;

        let verifier = Verifier::new(&local, uploads.clone(), documents.clone(), 1);
        let report = verifier.run().await.unwrap();
        assert_eq!(report.stale_renders, 0);
        assert_eq!(report.rerender_backlog, 1);
        assert!(report.passed);

        let strict = Verifier::new(&local, uploads, documents, 0);
        assert!(!strict.run().await.unwrap().passed);
    }

    #[tokio::test]
    async fn local_records_and_renders_fail_verification() {
        let dir = tempfile::tempdir().unwrap();
        let local = local(dir.path()).await;
        let uploads = Arc::new(MemoryUploadRepository::new());
        let documents = Arc::new(MemoryDocumentRepository::new());
        uploads
            .insert_upload(StoredFile {
                id: 1,
                sha1: "a".repeat(40),
                original_filename: "a.png".to_string(),
                filesize: 1,
                extension: Some("png".to_string()),
                url: "https://forum.example.com/uploads/default/original/1X/a.png".to_string(),
                secure: false,
            })
            .await;
        documents
            .insert(Document {
                id: 1,
                raw: String::new(),
                cooked: "<a href=\"https://cdn.example.com/uploads/default/original/1X/a.png\">"
                    .to_string(),
                render_version: Some(CURRENT_RENDER_VERSION),
            })
            .await;

        let report = Verifier::new(&local, uploads, documents, 100)
            .run()
            .await
            .unwrap();
        assert_eq!(report.uploads_pending, 1);
        assert_eq!(report.stale_renders, 1);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn renders_linking_local_thumbnails_are_stale() {
        let dir = tempfile::tempdir().unwrap();
        let local = local(dir.path()).await;
        let documents = Arc::new(MemoryDocumentRepository::new());
        documents
            .insert(Document {
                id: 1,
                raw: String::new(),
                cooked: "<img src=\"/uploads/default/optimized/1X/a_2_100x100.png\">".to_string(),
                render_version: Some(CURRENT_RENDER_VERSION),
            })
            .await;

        let report = Verifier::new(&local, Arc::new(MemoryUploadRepository::new()), documents, 100)
            .run()
            .await
            .unwrap();
        assert_eq!(report.stale_renders, 1);
        assert!(!report.passed);
    }
}
