use crate::error::MigrationError;
use crate::inventory::Inventory;
use crate::report::{MigrationReport, RewriteSummary};
use crate::rewrite::{KeyFilter, RewriteRules};
use crate::state::{MigrationState, StateTracker};
use crate::upload::UploadPool;
use crate::verify::{local_render_needles, local_upload_prefixes, Verifier};
use std::collections::HashSet;
use std::sync::Arc;
use stowage_core::constants::CURRENT_RENDER_VERSION;
use stowage_core::models::StoredFile;
use stowage_core::MigrationConfig;
use stowage_db::{DocumentRepository, UploadRepository};
use stowage_storage::{FileStore, LocalStore, S3Store};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Moves local uploads into the bucket and repoints every reference to them.
pub struct MigrationEngine {
    config: MigrationConfig,
    local: Arc<LocalStore>,
    remote: Arc<S3Store>,
    uploads: Arc<dyn UploadRepository>,
    documents: Arc<dyn DocumentRepository>,
    state: StateTracker,
    cancel: std::sync::Mutex<CancellationToken>,
    running: Mutex<()>,
}

impl MigrationEngine {
    /// Configuration is validated here, before anything touches disk or network.
    pub fn new(
        config: MigrationConfig,
        local: Arc<LocalStore>,
        remote: Arc<S3Store>,
        uploads: Arc<dyn UploadRepository>,
        documents: Arc<dyn DocumentRepository>,
    ) -> Result<Self, MigrationError> {
        config.validate()?;
        Ok(Self {
            config,
            local,
            remote,
            uploads,
            documents,
            state: StateTracker::new(),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            running: Mutex::new(()),
        })
    }

    pub fn state(&self) -> MigrationState {
        self.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    /// Token that stops the run cooperatively. In-flight uploads finish; nothing new
    /// starts and the run ends as `Failed`.
    ///
    /// A cancelled token is replaced when the run ends. Take a new handle for the next run.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_handle().is_cancelled()
    }

    fn reset_cancel(&self) {
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = CancellationToken::new();
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(
            &self.local,
            self.uploads.clone(),
            self.documents.clone(),
            self.config.rerender_backlog_threshold,
        )
    }

    fn fail(&self, mut report: MigrationReport) -> Box<MigrationReport> {
        self.state.advance(MigrationState::Failed);
        report.state = MigrationState::Failed;
        Box::new(report)
    }

    fn fail_with<E: Into<MigrationError>>(&self, err: E) -> MigrationError {
        self.state.advance(MigrationState::Failed);
        err.into()
    }

    fn ensure_not_cancelled(&self, report: &MigrationReport) -> Result<(), MigrationError> {
        if self.is_cancelled() {
            tracing::warn!(state = %self.state(), "Migration cancelled");
            return Err(MigrationError::Cancelled {
                report: self.fail(report.clone()),
            });
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(dry_run = self.config.dry_run, tenant_scoped = self.config.tenant_scoped))]
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let _running = self.running.lock().await;
        let result = self.run_phases().await;
        if self.is_cancelled() {
            self.reset_cancel();
        }
        result
    }

    async fn run_phases(&self) -> Result<MigrationReport, MigrationError> {
        let dry_run = self.config.dry_run;
        let start = std::time::Instant::now();

        if self.state().is_terminal() {
            self.state.advance(MigrationState::Idle);
        }
        let mut report = MigrationReport::new(dry_run);

        // Phase 1
        self.state.advance(MigrationState::Inventorying);
        let inventory = Inventory::collect(&self.local, &self.remote)
            .await
            .map_err(|e| self.fail_with(e))?;
        let plan = inventory.classify();

        report.local_files = inventory.local.len();
        report.remote_objects = inventory.remote.len();
        report.uploads.inspected = inventory.local.len();
        report.uploads.skipped = plan.synced.len();

        let mut synced: HashSet<String> = plan.synced.into_iter().map(|o| o.path).collect();
        self.ensure_not_cancelled(&report)?;

        // Phase 2
        self.state.advance(MigrationState::Uploading);
        let pool = UploadPool::new(
            self.local.clone(),
            self.remote.clone(),
            self.uploads.clone(),
            self.config.concurrency,
            dry_run,
            self.cancel_handle(),
        );
        let outcome = pool.run(plan.to_upload).await;

        if dry_run {
            report.uploads.would_upload = outcome.uploaded.len();
        } else {
            report.uploads.uploaded = outcome.uploaded.len();
        }
        report.uploads.failed = outcome.failed.len();
        report.uploads.not_attempted = outcome.not_attempted;
        report.uploads.failures = outcome.failed;
        synced.extend(outcome.uploaded);

        if outcome.cancelled {
            self.ensure_not_cancelled(&report)?;
        }
        if !report.uploads.failures.is_empty() {
            tracing::error!(
                failed = report.uploads.failed,
                "Uploads failed, references left untouched"
            );
            return Err(MigrationError::UploadsFailed {
                report: self.fail(report),
            });
        }

        // Phase 3
        self.state.advance(MigrationState::Rewriting);
        let filter = KeyFilter::Only(synced);
        if let Err(e) = self.rewrite(&filter, &mut report.rewrite).await {
            if matches!(e, MigrationError::Cancelled { .. }) {
                return Err(MigrationError::Cancelled {
                    report: self.fail(report),
                });
            }
            return Err(self.fail_with(e));
        }
        self.ensure_not_cancelled(&report)?;

        // Phase 4
        self.state.advance(MigrationState::Verifying);
        let verification = self.verifier().run().await.map_err(|e| self.fail_with(e))?;
        report.verification = Some(verification);

        tracing::info!(
            inspected = report.uploads.inspected,
            skipped = report.uploads.skipped,
            uploaded = report.uploads.uploaded,
            would_upload = report.uploads.would_upload,
            documents_rewritten = report.rewrite.documents_rewritten,
            verification_passed = verification.passed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Migration finished"
        );

        if verification.passed || dry_run {
            self.state.advance(MigrationState::Complete);
            report.state = MigrationState::Complete;
            Ok(report)
        } else {
            Err(MigrationError::Incomplete {
                report: self.fail(report),
            })
        }
    }

    async fn rewrite(
        &self,
        filter: &KeyFilter,
        summary: &mut RewriteSummary,
    ) -> Result<(), MigrationError> {
        self.remap_uploads(filter, summary).await?;
        self.rewrite_documents(filter, summary).await?;

        let needles = local_render_needles(&self.local);
        summary.documents_flagged = if self.config.dry_run {
            self.documents
                .count_stale_renders(&needles, CURRENT_RENDER_VERSION)
                .await?
        } else {
            self.documents.flag_cooked_containing(&needles).await?
        };

        self.prune_optimized_images(filter, summary).await?;

        tracing::info!(
            uploads_remapped = summary.uploads_remapped,
            documents_rewritten = summary.documents_rewritten,
            documents_failed = summary.documents_failed,
            documents_flagged = summary.documents_flagged,
            optimized_pruned = summary.optimized_pruned,
            "References rewritten"
        );
        Ok(())
    }

    fn check_cancel(&self) -> Result<(), MigrationError> {
        if self.is_cancelled() {
            return Err(MigrationError::Cancelled {
                report: Box::new(MigrationReport::new(self.config.dry_run)),
            });
        }
        Ok(())
    }

    /// Point upload records at their bucket URL, only for files confirmed remotely.
    async fn remap_uploads(
        &self,
        filter: &KeyFilter,
        summary: &mut RewriteSummary,
    ) -> Result<(), MigrationError> {
        let location = self.remote.location();

        for prefix in local_upload_prefixes(&self.local) {
            let mut after_id = 0;
            loop {
                self.check_cancel()?;
                let page = self
                    .uploads
                    .uploads_with_url_prefix(&prefix, after_id, self.config.batch_size)
                    .await?;
                let Some(last) = page.last() else {
                    break;
                };
                after_id = last.id;
                let full_page = page.len() as i64 == self.config.batch_size;

                for upload in page {
                    let Some(path) = self.local.relative_path_from_url(&upload.url) else {
                        continue;
                    };
                    if !filter.allows(&path) {
                        tracing::debug!(upload_id = upload.id, path = %path, "Not in bucket, keeping local URL");
                        continue;
                    }
                    let url = location.url_for_path(&path);
                    if self.config.dry_run {
                        tracing::info!(upload_id = upload.id, from = %upload.url, to = %url, "Would remap upload");
                        summary.uploads_remapped += 1;
                        continue;
                    }
                    match self.uploads.update_url(upload.id, &url).await {
                        Ok(()) => summary.uploads_remapped += 1,
                        Err(e) => {
                            tracing::warn!(error = %e, upload_id = upload.id, "Failed to remap upload");
                            summary.uploads_failed += 1;
                        }
                    }
                }

                if !full_page {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn rewrite_documents(
        &self,
        filter: &KeyFilter,
        summary: &mut RewriteSummary,
    ) -> Result<(), MigrationError> {
        let rules = RewriteRules::new(&self.local, self.remote.location());
        let mut after_id = 0;

        loop {
            self.check_cancel()?;
            let page = self
                .documents
                .documents_containing(rules.needle(), after_id, self.config.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            let full_page = page.len() as i64 == self.config.batch_size;

            for document in page {
                let (raw, count) = rules.apply(&document.raw, filter);
                if count == 0 {
                    continue;
                }
                if self.config.dry_run {
                    tracing::info!(document_id = document.id, references = count, "Would rewrite document");
                    summary.documents_rewritten += 1;
                    continue;
                }

                let result = match self.documents.update_raw(document.id, &raw).await {
                    Ok(()) => self.documents.flag_for_rerender(document.id).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => summary.documents_rewritten += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, document_id = document.id, "Failed to rewrite document");
                        summary.documents_failed += 1;
                    }
                }
            }

            if !full_page {
                break;
            }
        }
        Ok(())
    }

    /// Drop records of derived images on local disk whose original now lives in the
    /// bucket. They are regenerated remotely on demand. The files stay on disk, like
    /// every migrated original, until the renders linking them are regenerated.
    async fn prune_optimized_images(
        &self,
        filter: &KeyFilter,
        summary: &mut RewriteSummary,
    ) -> Result<(), MigrationError> {
        let prefix = self.local.url_prefix().to_string();
        let mut after_id = 0;

        loop {
            self.check_cancel()?;
            let page = self
                .uploads
                .optimized_images_with_url_prefix(&prefix, after_id, self.config.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            let full_page = page.len() as i64 == self.config.batch_size;

            for image in page {
                let Some(parent) = self.uploads.get_upload(image.upload_id).await? else {
                    continue;
                };
                if !self.parent_is_remote(&parent, filter) {
                    continue;
                }
                if self.config.dry_run {
                    summary.optimized_pruned += 1;
                    continue;
                }
                if let Err(e) = self.uploads.delete_optimized_image(image.id).await {
                    tracing::warn!(error = %e, optimized_image_id = image.id, "Failed to delete optimized image");
                    continue;
                }
                summary.optimized_pruned += 1;
            }

            if !full_page {
                break;
            }
        }
        Ok(())
    }

    fn parent_is_remote(&self, parent: &StoredFile, filter: &KeyFilter) -> bool {
        if self.remote.owns_url(&parent.url) {
            return true;
        }
        // Dry runs never remap, so ask whether the remap would have happened.
        self.config.dry_run
            && self
                .local
                .relative_path_from_url(&parent.url)
                .map(|path| filter.allows(&path))
                .unwrap_or(false)
    }
}
