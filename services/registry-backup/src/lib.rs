//! # Registry namespace backups
//!
//! Backs up the blobs of a container registry namespace to an S3-compatible
//! archive, restores them, verifies an archived inventory against the live
//! catalog and clears stale backup locks.
//!
//! Archive layout, per namespace prefix `<id>-<name>`:
//!
//! ```text
//! <id>-<name>/backup/lock          present while a backup runs
//! <id>-<name>/backup/<N>.json      inventory of backup N
//! <id>-<name>/blob/<xx>/<digest>   archived blob
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use catalog::MemoryCatalog;
//! use registry_backup::{ArchiveStore, BackupOptions, RegistryBlobStore, Toolkit};
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), registry_backup::BackupError> {
//! let storage: storage::Storage = MemoryStorage::with_buckets(&["registry", "quaybackup"]).into();
//! let catalog = MemoryCatalog::new();
//! catalog.add_namespace("acme", true);
//!
//! let toolkit = Toolkit::new(
//!     Arc::new(catalog),
//!     RegistryBlobStore::new(storage.bucket("registry"), None),
//!     ArchiveStore::new(storage.bucket("quaybackup")),
//! );
//! let report = toolkit.backup("acme", BackupOptions::default()).await?;
//! assert!(report.succeeded());
//! # Ok(())
//! # }
//! ```

mod archive;
mod blobstore;
mod config;
mod digest;
mod error;
mod inventory;
mod operations;
mod pool;

pub use archive::{ArchiveStore, BackupNumber, NamespacePrefix};
pub use blobstore::RegistryBlobStore;
pub use config::{ConfigError, Environment, RegistryStorageConfig, Settings};
pub use digest::BlobDigest;
pub use error::{BackupError, BackupResult, ErrorKind};
pub use inventory::{BackupPlan, DataCounters, Inventory, InventoryBuilder, RepositoryBackup, Status, Summary};
pub use operations::{
    BackupOptions, BackupReport, DryRunReport, DryRunSummary, IncompleteDetails, RestoreOptions,
    RestoreOutcome, RestoreReport, Toolkit, UnlockReport, VerifyData, VerifyReport, VerifyStatus,
    VerifySummary,
};
pub use pool::{
    BlobFailure, PoolSummary, TransferResult, TransferTask, WorkerPool, DEFAULT_WORKERS,
    REPORTED_ERRORS,
};
