//! Bounded concurrent blob transfers.

use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;

use crate::archive::{ArchiveStore, NamespacePrefix};
use crate::blobstore::RegistryBlobStore;
use crate::digest::BlobDigest;
use crate::error::BackupResult;

/// Worker count used when none is given.
pub const DEFAULT_WORKERS: usize = 5;

/// How many per-blob errors a report carries.
pub const REPORTED_ERRORS: usize = 5;

/// One blob to move, with the context of its first reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// The blob digest.
    pub digest: BlobDigest,

    /// Path of the blob in registry storage, relative to the storage path.
    pub cas_path: Utf8PathBuf,

    /// Repository which first referenced the blob.
    pub repository: String,

    /// Manifest which first referenced the blob.
    pub manifest: BlobDigest,
}

impl TransferTask {
    /// A task for `digest`, first seen in `repository` under `manifest`.
    pub fn new(digest: BlobDigest, repository: String, manifest: BlobDigest) -> Self {
        Self {
            cas_path: digest.cas_path(),
            digest,
            repository,
            manifest,
        }
    }
}

/// Outcome of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// The blob digest.
    pub digest: BlobDigest,

    /// Whether the blob is now present at the destination.
    pub success: bool,

    /// Whether the transfer was skipped because the destination had it.
    pub skipped: bool,

    /// Failure description.
    pub error: Option<String>,

    /// Bytes moved.
    pub bytes: u64,
}

impl TransferResult {
    fn skipped(digest: BlobDigest) -> Self {
        Self {
            digest,
            success: true,
            skipped: true,
            error: None,
            bytes: 0,
        }
    }

    fn transferred(digest: BlobDigest, bytes: usize) -> Self {
        Self {
            digest,
            success: true,
            skipped: false,
            error: None,
            bytes: bytes as u64,
        }
    }

    fn failed(digest: BlobDigest, error: impl Into<String>) -> Self {
        Self {
            digest,
            success: false,
            skipped: false,
            error: Some(error.into()),
            bytes: 0,
        }
    }
}

/// A failed blob, as listed in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobFailure {
    /// The blob digest.
    pub blob_digest: BlobDigest,

    /// What went wrong.
    pub error: String,
}

/// Totals over every task submitted to the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Tasks submitted.
    pub total: usize,

    /// Blobs actually transferred.
    pub processed: usize,

    /// Blobs already present at the destination.
    pub skipped: usize,

    /// Blobs which failed.
    pub failed: usize,

    /// Bytes transferred.
    pub bytes: u64,

    /// Every failure, in completion order.
    pub errors: Vec<BlobFailure>,
}

impl PoolSummary {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, result: TransferResult) {
        match result {
            TransferResult { success: true, skipped: true, .. } => self.skipped += 1,
            TransferResult { success: true, bytes, .. } => {
                self.processed += 1;
                self.bytes += bytes;
            }
            TransferResult { digest, error, .. } => {
                self.failed += 1;
                self.errors.push(BlobFailure {
                    blob_digest: digest,
                    error: error.unwrap_or_else(|| "unknown error".into()),
                });
            }
        }
    }

    /// The failures a report shows: the first few only.
    pub fn reported_errors(&self) -> &[BlobFailure] {
        &self.errors[..self.errors.len().min(REPORTED_ERRORS)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Backup,
    Restore,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Backup => "Backing up",
            Direction::Restore => "Restoring",
        }
    }
}

/// A fixed-size pool moving blobs between registry storage and the archive.
///
/// A failing or panicking transfer is recorded in the summary and never
/// stops its siblings.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    blobs: RegistryBlobStore,
    archive: ArchiveStore,
    prefix: NamespacePrefix,
}

impl WorkerPool {
    /// A pool of `workers` concurrent transfers (at least one).
    pub fn new(
        blobs: RegistryBlobStore,
        archive: ArchiveStore,
        prefix: NamespacePrefix,
        workers: usize,
    ) -> Self {
        Self {
            workers: workers.max(1),
            blobs,
            archive,
            prefix,
        }
    }

    /// Number of concurrent transfers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Copy blobs from registry storage into the archive.
    ///
    /// Unless `force` is set, blobs already archived are skipped.
    #[tracing::instrument(skip(self, tasks), fields(namespace = %self.prefix, tasks = tasks.len()))]
    pub async fn backup(&self, tasks: Vec<TransferTask>, force: bool) -> PoolSummary {
        self.run(tasks, Direction::Backup, force).await
    }

    /// Copy blobs from the archive back into registry storage.
    ///
    /// Unless `force` is set, blobs the registry already holds are skipped.
    #[tracing::instrument(skip(self, tasks), fields(namespace = %self.prefix, tasks = tasks.len()))]
    pub async fn restore(&self, tasks: Vec<TransferTask>, force: bool) -> PoolSummary {
        self.run(tasks, Direction::Restore, force).await
    }

    async fn run(&self, tasks: Vec<TransferTask>, direction: Direction, force: bool) -> PoolSummary {
        let total = tasks.len();
        let mut summary = PoolSummary::new(total);
        if total == 0 {
            return summary;
        }

        tracing::info!("{} {total} blobs with {} workers", direction.verb(), self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(total);

        for task in tasks {
            let pool = self.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let digest = task.digest.clone();
            let handle = tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let result = pool.transfer(task, direction, force).await;
                    let _ = tx.send(result);
                }
                .instrument(tracing::debug_span!("blob", digest = %digest)),
            );
            handles.push((digest, handle));
        }
        drop(tx);

        let step = (total / 10).max(1);
        let mut done = 0;
        while let Some(result) = rx.recv().await {
            if let Some(error) = &result.error {
                tracing::warn!(digest = %result.digest, "{error}");
            }
            summary.record(result);
            done += 1;
            if done % step == 0 || done == total {
                tracing::info!(
                    "{}: {done}/{total} blobs ({}%)",
                    direction.verb(),
                    done * 100 / total
                );
            }
        }

        for (digest, handle) in handles {
            if let Err(error) = handle.await {
                tracing::error!(%digest, "transfer task did not complete: {error}");
                summary.record(TransferResult::failed(
                    digest,
                    format!("transfer task did not complete: {error}"),
                ));
            }
        }

        semaphore.close();
        summary
    }

    async fn transfer(&self, task: TransferTask, direction: Direction, force: bool) -> TransferResult {
        let outcome = match direction {
            Direction::Backup => self.backup_blob(&task, force).await,
            Direction::Restore => self.restore_blob(&task, force).await,
        };
        outcome.unwrap_or_else(|error| TransferResult::failed(task.digest, error.to_string()))
    }

    async fn backup_blob(&self, task: &TransferTask, force: bool) -> BackupResult<TransferResult> {
        if !force && self.archive.blob_exists(&self.prefix, &task.digest).await? {
            return Ok(TransferResult::skipped(task.digest.clone()));
        }

        let Some(data) = self.blobs.read(&task.digest).await? else {
            return Ok(TransferResult::failed(
                task.digest.clone(),
                format!("Failed to read blob from registry storage: {}", task.cas_path),
            ));
        };

        self.archive
            .upload_blob(&self.prefix, &task.digest, &data)
            .await?;
        Ok(TransferResult::transferred(task.digest.clone(), data.len()))
    }

    async fn restore_blob(&self, task: &TransferTask, force: bool) -> BackupResult<TransferResult> {
        if !force && self.blobs.exists(&task.digest).await? {
            return Ok(TransferResult::skipped(task.digest.clone()));
        }

        let Some(data) = self.archive.download_blob(&self.prefix, &task.digest).await? else {
            return Ok(TransferResult::failed(
                task.digest.clone(),
                format!("Blob {} not found in backup", task.digest),
            ));
        };

        if let Err(computed) = task.digest.verify(&data) {
            return Ok(TransferResult::failed(
                task.digest.clone(),
                format!("Checksum mismatch for blob {}: archive holds {computed}", task.digest),
            ));
        }

        self.blobs.write(&task.digest, &data).await?;
        Ok(TransferResult::transferred(task.digest.clone(), data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    fn pool(workers: usize) -> WorkerPool {
        let storage: storage::Storage = MemoryStorage::with_buckets(&["registry", "archive"]).into();
        WorkerPool::new(
            RegistryBlobStore::new(storage.bucket("registry"), None),
            ArchiveStore::new(storage.bucket("archive")),
            NamespacePrefix::new(1, "acme"),
            workers,
        )
    }

    fn task(digest: &str) -> TransferTask {
        TransferTask::new(BlobDigest::new(digest), "app".into(), BlobDigest::new("m1"))
    }

    #[test]
    fn worker_count_is_at_least_one() {
        assert_eq!(pool(0).workers(), 1);
        assert_eq!(pool(8).workers(), 8);
    }

    #[test]
    fn reported_errors_are_truncated() {
        let mut summary = PoolSummary::new(7);
        for n in 0..7 {
            summary.record(TransferResult::failed(BlobDigest::new(&format!("b{n}")), "boom"));
        }
        assert_eq!(summary.failed, 7);
        assert_eq!(summary.errors.len(), 7);
        assert_eq!(summary.reported_errors().len(), REPORTED_ERRORS);
    }

    #[tokio::test]
    async fn missing_source_fails_only_that_blob() {
        let pool = pool(2);
        pool.blobs.write(&BlobDigest::new("b1"), b"one").await.unwrap();
        pool.blobs.write(&BlobDigest::new("b3"), b"three!").await.unwrap();

        let summary = pool
            .backup(vec![task("b1"), task("b2"), task("b3")], false)
            .await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes, 9);
        assert_eq!(summary.errors[0].blob_digest, BlobDigest::new("b2"));
    }

    #[tokio::test]
    async fn skip_unless_forced() {
        let pool = pool(3);
        pool.blobs.write(&BlobDigest::new("b1"), b"one").await.unwrap();

        let first = pool.backup(vec![task("b1")], false).await;
        assert_eq!(first.processed, 1);

        let second = pool.backup(vec![task("b1")], false).await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.bytes, 0);

        let forced = pool.backup(vec![task("b1")], true).await;
        assert_eq!(forced.processed, 1);
        assert_eq!(forced.bytes, 3);
    }

    #[tokio::test]
    async fn empty_task_list() {
        let summary = pool(1).restore(Vec::new(), false).await;
        assert_eq!(summary, PoolSummary::default());
    }
}
