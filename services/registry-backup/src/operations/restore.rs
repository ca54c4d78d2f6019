use serde::Serialize;

use super::{RestoreOptions, Toolkit};
use crate::archive::{BackupNumber, NamespacePrefix};
use crate::error::{BackupError, BackupResult};
use crate::inventory::{BackupPlan, InventoryBuilder, Status, Summary};
use crate::pool::{BlobFailure, PoolSummary, WorkerPool};

/// Result of a restore which transferred blobs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestoreReport {
    operation: &'static str,

    /// Namespace name.
    pub namespace: String,

    /// Inventory the blobs came from.
    pub backup_number: BackupNumber,

    /// Restore totals.
    #[serde(rename = "Restore Summary")]
    pub restore_summary: Summary,

    /// The first few blob failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BlobFailure>,

    /// Full transfer totals.
    #[serde(skip)]
    pub transfers: PoolSummary,
}

/// Counts reported by a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DryRunSummary {
    /// Repositories in scope.
    pub repositories_to_restore: u64,
    /// Manifests in scope.
    pub manifests_to_restore: u64,
    /// Distinct blobs in scope.
    pub total_blobs: usize,
    /// Blobs the registry already holds.
    pub existing_blobs: usize,
    /// Blobs a real restore would fetch.
    pub blobs_to_download: usize,
}

/// Result of a dry-run restore.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DryRunReport {
    operation: &'static str,

    /// Namespace name.
    pub namespace: String,

    /// Inventory that was inspected.
    pub backup_number: BackupNumber,

    /// What a real run would do.
    pub summary: DryRunSummary,

    /// The same, in words.
    pub actions: Vec<String>,
}

/// Either kind of restore result.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RestoreOutcome {
    /// Blobs were transferred.
    Restored(RestoreReport),
    /// Nothing was transferred.
    DryRun(DryRunReport),
}

impl RestoreOutcome {
    /// Whether the restore (or the dry run) fully succeeded.
    pub fn succeeded(&self) -> bool {
        self.failure().is_none()
    }

    /// The error describing an unsuccessful restore.
    pub fn failure(&self) -> Option<BackupError> {
        match self {
            RestoreOutcome::Restored(report) if report.transfers.failed > 0 => {
                Some(BackupError::PartialFailure {
                    failed: report.transfers.failed,
                    total: report.transfers.total,
                })
            }
            _ => None,
        }
    }
}

impl Toolkit {
    /// Copy the blobs recorded in an inventory back into registry storage.
    ///
    /// Refuses to run while a backup holds the namespace lock, and refuses
    /// inventories whose backup failed.
    #[tracing::instrument(skip(self, options), fields(namespace = name, backup_number = ?options.backup_number))]
    pub async fn restore(&self, name: &str, options: RestoreOptions) -> BackupResult<RestoreOutcome> {
        tracing::info!("Starting restore for namespace: {name}");
        let namespace = self.namespace(name).await?;
        let prefix = NamespacePrefix::from(&namespace);

        if self.archive.lock_exists(&prefix).await? {
            return Err(BackupError::AlreadyLocked(namespace.name));
        }

        let (number, inventory) = self.archive.load_inventory(&prefix, options.backup_number).await?;
        match inventory.summary.status {
            Status::Success => {}
            Status::Failed => {
                return Err(BackupError::InvalidState {
                    number,
                    status: inventory.summary.status.to_string(),
                })
            }
            status => tracing::warn!("Restoring from backup with status: {status}"),
        }
        tracing::info!(backup_number = number, "Loaded inventory from backup {number}");

        let plan = InventoryBuilder::from_inventory(&inventory, options.repository.as_deref());
        tracing::info!("Found {} blobs to restore", plan.tasks.len());

        if options.dry_run {
            let report = self.dry_run(namespace.name, number, &plan).await?;
            return Ok(RestoreOutcome::DryRun(report));
        }

        let repositories = plan.repository_count();
        let manifests = plan.manifest_count();

        let pool = WorkerPool::new(self.blobs.clone(), self.archive.clone(), prefix, options.workers);
        let transfers = pool.restore(plan.tasks, options.force).await;

        tracing::info!(
            backup_number = number,
            "Restore completed: {} transferred, {} skipped, {} failed",
            transfers.processed,
            transfers.skipped,
            transfers.failed
        );

        Ok(RestoreOutcome::Restored(RestoreReport {
            operation: "Restore",
            namespace: namespace.name,
            backup_number: number,
            restore_summary: Summary::new(
                Status::from_failures(transfers.failed),
                repositories,
                manifests,
                transfers.processed as u64,
                transfers.bytes,
            ),
            errors: transfers.reported_errors().to_vec(),
            transfers,
        }))
    }

    async fn dry_run(
        &self,
        namespace: String,
        number: BackupNumber,
        plan: &BackupPlan,
    ) -> BackupResult<DryRunReport> {
        let mut existing = 0;
        for task in &plan.tasks {
            if self.blobs.exists(&task.digest).await? {
                existing += 1;
            }
        }
        let missing = plan.tasks.len() - existing;

        Ok(DryRunReport {
            operation: "Restore (Dry Run)",
            namespace,
            backup_number: number,
            summary: DryRunSummary {
                repositories_to_restore: plan.repository_count(),
                manifests_to_restore: plan.manifest_count(),
                total_blobs: plan.tasks.len(),
                existing_blobs: existing,
                blobs_to_download: missing,
            },
            actions: vec![
                format!("Would restore {missing} blobs from backup"),
                format!("Would skip {existing} existing blobs"),
                format!("Would process {} total blobs", plan.tasks.len()),
            ],
        })
    }
}
