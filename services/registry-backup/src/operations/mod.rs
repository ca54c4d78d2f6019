//! Backup, restore, verify and unlock.
//!
//! Each operation resolves the namespace through the catalog, works under the
//! namespace's archive prefix and returns a serializable report. Reports know
//! whether they describe a full success; the binary turns anything else into
//! a non-zero exit status.

use std::sync::Arc;

use catalog::{Catalog, Namespace, PgCatalog};

use crate::archive::ArchiveStore;
use crate::blobstore::RegistryBlobStore;
use crate::config::Settings;
use crate::error::{BackupError, BackupResult};
use crate::pool::DEFAULT_WORKERS;

mod backup;
mod restore;
mod unlock;
mod verify;

pub use backup::BackupReport;
pub use restore::{DryRunReport, DryRunSummary, RestoreOutcome, RestoreReport};
pub use unlock::UnlockReport;
pub use verify::{IncompleteDetails, VerifyData, VerifyReport, VerifyStatus, VerifySummary};

/// Options for [`Toolkit::backup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOptions {
    /// Upload blobs even when the archive already holds them.
    pub force: bool,
    /// Concurrent transfers.
    pub workers: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            force: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Options for [`Toolkit::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Inventory to restore from; the latest when unset.
    pub backup_number: Option<u64>,
    /// Only restore the repository with this name.
    pub repository: Option<String>,
    /// Report what would happen without transferring anything.
    pub dry_run: bool,
    /// Write blobs even when the registry already holds them.
    pub force: bool,
    /// Concurrent transfers.
    pub workers: usize,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            backup_number: None,
            repository: None,
            dry_run: false,
            force: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// The collaborators every operation needs, built once per process.
#[derive(Debug, Clone)]
pub struct Toolkit {
    catalog: Arc<dyn Catalog>,
    blobs: RegistryBlobStore,
    archive: ArchiveStore,
}

impl Toolkit {
    /// Assemble a toolkit from existing handles.
    pub fn new(catalog: Arc<dyn Catalog>, blobs: RegistryBlobStore, archive: ArchiveStore) -> Self {
        Self {
            catalog,
            blobs,
            archive,
        }
    }

    /// Connect to the registry database and storage described by `settings`,
    /// archiving into `bucket`.
    #[tracing::instrument(skip(settings))]
    pub async fn connect(settings: &Settings, bucket: &str) -> BackupResult<Self> {
        let catalog = PgCatalog::connect(&settings.database_url).await?;
        let blobs = settings.registry_storage.blob_store();
        let archive = ArchiveStore::new(settings.environment.archive_storage().build().bucket(bucket));
        Ok(Self::new(Arc::new(catalog), blobs, archive))
    }

    /// The registry blob store.
    pub fn blobs(&self) -> &RegistryBlobStore {
        &self.blobs
    }

    /// The archive store.
    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    async fn namespace(&self, name: &str) -> BackupResult<Namespace> {
        self.catalog
            .namespace(name)
            .await?
            .ok_or_else(|| BackupError::NamespaceNotFound(name.to_string()))
    }
}
