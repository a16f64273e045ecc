//! Upload phase worker pool.
//!
//! Pending files go on one bounded queue drained by a fixed number of workers. The
//! queue is closed once every file has been offered, and the pool returns only after
//! all workers have exited. Cancellation stops the producer and keeps workers from
//! taking new items; uploads already in flight run to completion.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use stowage_db::UploadRepository;
use stowage_storage::content::checksum;
use stowage_storage::{
    FileStore, LocalObject, LocalStore, S3Store, StorageError, StorageResult, StoreOptions,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A file that could not be uploaded, with the error verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    /// Paths uploaded and confirmed (or, in a dry run, that would have been).
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
    /// Paths never attempted because the run was cancelled.
    pub not_attempted: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct Results {
    uploaded: Vec<String>,
    failed: Vec<UploadFailure>,
    dropped: usize,
}

#[derive(Clone)]
struct Worker {
    local: Arc<LocalStore>,
    remote: Arc<S3Store>,
    uploads: Arc<dyn UploadRepository>,
    dry_run: bool,
}

pub struct UploadPool {
    worker: Worker,
    concurrency: usize,
    cancel: CancellationToken,
}

impl UploadPool {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<S3Store>,
        uploads: Arc<dyn UploadRepository>,
        concurrency: usize,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker: Worker {
                local,
                remote,
                uploads,
                dry_run,
            },
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub async fn run(&self, jobs: Vec<LocalObject>) -> UploadOutcome {
        let total = jobs.len();
        let start = std::time::Instant::now();
        tracing::info!(
            files = total,
            workers = self.concurrency,
            dry_run = self.worker.dry_run,
            "Starting uploads"
        );

        let (tx, rx) = mpsc::channel::<LocalObject>(self.concurrency * 2);
        let rx = Arc::new(Mutex::new(rx));
        let results = Arc::new(Mutex::new(Results::default()));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let worker = self.worker.clone();
            let rx = rx.clone();
            let results = results.clone();
            let cancel = self.cancel.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        results.lock().await.dropped += 1;
                        break;
                    }

                    // Own task per file: a panic fails this file, not the worker.
                    let attempt = {
                        let worker = worker.clone();
                        let job = job.clone();
                        tokio::spawn(async move { worker.upload(&job).await })
                    };
                    let error = match attempt.await {
                        Ok(Ok(())) => {
                            results.lock().await.uploaded.push(job.path);
                            continue;
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => format!("upload task panicked: {}", e),
                    };
                    tracing::error!(
                        error = %error,
                        worker_id = worker_id,
                        path = %job.path,
                        "Upload failed"
                    );
                    results.lock().await.failed.push(UploadFailure {
                        path: job.path,
                        error,
                    });
                }
            });
        }

        let mut offered = 0;
        for job in jobs {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = tx.send(job) => {
                    if sent.is_err() {
                        break;
                    }
                    offered += 1;
                }
            }
        }
        // Closing the queue lets idle workers exit.
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Upload worker exited abnormally");
            }
        }

        let mut left_in_queue = 0;
        {
            let mut rx = rx.lock().await;
            while rx.try_recv().is_ok() {
                left_in_queue += 1;
            }
        }

        let results = std::mem::take(&mut *results.lock().await);
        let cancelled = self.cancel.is_cancelled();
        let outcome = UploadOutcome {
            not_attempted: (total - offered) + left_in_queue + results.dropped,
            uploaded: results.uploaded,
            failed: results.failed,
            cancelled,
        };

        tracing::info!(
            uploaded = outcome.uploaded.len(),
            failed = outcome.failed.len(),
            not_attempted = outcome.not_attempted,
            cancelled = cancelled,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Uploads finished"
        );
        outcome
    }
}

impl Worker {
    async fn upload(&self, job: &LocalObject) -> StorageResult<()> {
        let key = self.remote.location().object_key(&job.path);

        let local_url = format!("{}{}", self.local.url_prefix(), job.path);
        let record = match self.uploads.find_by_url(&local_url).await {
            Ok(upload) => upload,
            Err(e) => {
                tracing::warn!(error = %e, url = %local_url, "Upload record lookup failed");
                None
            }
        };

        let data = tokio::fs::read(&job.absolute).await?;
        let options = StoreOptions {
            secure: record.as_ref().map(|u| u.secure).unwrap_or(false),
            filename: record.map(|u| u.original_filename),
            content_type: None,
            checksum: Some(checksum(&data)),
        };

        if self.dry_run {
            tracing::info!(
                path = %job.path,
                key = %key,
                size_bytes = job.size,
                "{} => {}",
                job.path,
                key
            );
            return Ok(());
        }

        self.remote.store(Bytes::from(data), &job.path, &options).await?;

        match self.remote.object_size(&job.path).await? {
            Some(size) if size == job.size => Ok(()),
            Some(size) => Err(StorageError::UploadFailed(format!(
                "{}: remote size {} does not match local size {}",
                key, size, job.size
            ))),
            None => Err(StorageError::UploadFailed(format!(
                "{}: object missing after upload",
                key
            ))),
        }
    }
}
