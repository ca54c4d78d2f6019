use serde::Serialize;

use super::{BackupOptions, Toolkit};
use crate::archive::{BackupNumber, NamespacePrefix};
use crate::error::{BackupError, BackupResult};
use crate::inventory::{Inventory, InventoryBuilder, Status, Summary};
use crate::pool::{BlobFailure, PoolSummary, WorkerPool};

/// Result of a backup run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupReport {
    operation: &'static str,

    /// Namespace name.
    pub namespace: String,

    /// Number the inventory was saved under.
    pub backup_number: BackupNumber,

    /// The summary persisted with the inventory.
    pub summary: Summary,

    /// The first few blob failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BlobFailure>,

    /// Full transfer totals.
    #[serde(skip)]
    pub transfers: PoolSummary,
}

impl BackupReport {
    /// Whether every blob was archived.
    pub fn succeeded(&self) -> bool {
        self.transfers.failed == 0
    }

    /// The error describing an unsuccessful run.
    pub fn failure(&self) -> Option<BackupError> {
        (!self.succeeded()).then(|| BackupError::PartialFailure {
            failed: self.transfers.failed,
            total: self.transfers.total,
        })
    }
}

impl Toolkit {
    /// Archive every blob referenced by a namespace and save a new inventory.
    ///
    /// The namespace lock is held for the whole run and released on every
    /// exit path. When both the run and the release fail, the run's error is
    /// returned.
    #[tracing::instrument(skip(self, options), fields(namespace = name))]
    pub async fn backup(&self, name: &str, options: BackupOptions) -> BackupResult<BackupReport> {
        tracing::info!("Starting backup for namespace: {name}");
        let namespace = self.namespace(name).await?;
        let prefix = NamespacePrefix::from(&namespace);

        self.archive.acquire_lock(&prefix).await?;
        let outcome = self.run_backup(&namespace, &prefix, options).await;
        let released = self.archive.release_lock(&prefix).await;

        match (outcome, released) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), Ok(())) => {
                tracing::error!("Backup failed: {error}");
                Err(error)
            }
            (Err(error), Err(release)) => {
                tracing::error!("Backup failed: {error}");
                tracing::error!("Failed to release backup lock: {release}");
                Err(error)
            }
        }
    }

    async fn run_backup(
        &self,
        namespace: &catalog::Namespace,
        prefix: &NamespacePrefix,
        options: BackupOptions,
    ) -> BackupResult<BackupReport> {
        let number = self.archive.next_backup_number(prefix).await?;
        tracing::info!(backup_number = number, "Backup number: {number}");

        let plan = InventoryBuilder::from_catalog(self.catalog.as_ref(), namespace).await?;
        tracing::info!("Found {} unique blobs to backup", plan.tasks.len());

        let repositories = plan.repository_count();
        let manifests = plan.manifest_count();

        let pool = WorkerPool::new(
            self.blobs.clone(),
            self.archive.clone(),
            prefix.clone(),
            options.workers,
        );
        let transfers = pool.backup(plan.tasks, options.force).await;

        let summary = Summary::new(
            Status::from_failures(transfers.failed),
            repositories,
            manifests,
            transfers.processed as u64,
            transfers.bytes,
        );
        let inventory = Inventory {
            user: namespace.name.clone(),
            id: namespace.id.to_string(),
            repositories: plan.repositories,
            summary: summary.clone(),
        };
        self.archive.save_inventory(prefix, number, &inventory).await?;

        tracing::info!(
            backup_number = number,
            "Backup completed: {} transferred, {} skipped, {} failed",
            transfers.processed,
            transfers.skipped,
            transfers.failed
        );

        Ok(BackupReport {
            operation: "Backup",
            namespace: namespace.name.clone(),
            backup_number: number,
            summary,
            errors: transfers.reported_errors().to_vec(),
            transfers,
        })
    }
}
