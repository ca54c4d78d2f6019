//! Error types for backup operations

use catalog::CatalogError;
use serde::Serialize;
use storage::StorageError;

use crate::config::ConfigError;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Coarse classification of a [`BackupError`], reported alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// A namespace, inventory or blob does not exist.
    NotFound,
    /// The namespace is locked by a backup in progress.
    AlreadyLocked,
    /// The selected inventory cannot be used for this operation.
    InvalidState,
    /// Some blob transfers failed.
    PartialFailure,
    /// The environment or registry configuration is unusable.
    Configuration,
    /// A storage, catalog or serialization fault.
    Backend,
}

/// Error types for backup operations
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Namespace not found in the catalog
    #[error("Namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// No inventory has ever been written for the namespace
    #[error("No backup inventory files found for namespace '{0}'")]
    NoBackups(String),

    /// The requested inventory number does not exist
    #[error("Backup inventory {number} not found for namespace '{namespace}'")]
    InventoryNotFound {
        /// Namespace name
        namespace: String,
        /// Requested backup number
        number: u64,
    },

    /// A backup holds the namespace lock
    #[error("Backup in progress for namespace {0}. Use 'unlock' command if backup is stuck.")]
    AlreadyLocked(String),

    /// The inventory status forbids the operation
    #[error("Cannot restore from a failed backup (inventory {number}, status {status})")]
    InvalidState {
        /// Inventory number
        number: u64,
        /// Recorded status
        status: String,
    },

    /// Some blob transfers failed
    #[error("{failed} of {total} blob transfers failed")]
    PartialFailure {
        /// Number of failed blobs
        failed: usize,
        /// Number of blobs attempted
        total: usize,
    },

    /// Verification found live blobs missing from the backup
    #[error("{missing} live blobs are missing from backup {number}")]
    Incomplete {
        /// Missing blob count
        missing: usize,
        /// Inventory number
        number: u64,
    },

    /// Configuration error
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Catalog error
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// An inventory could not be encoded or decoded
    #[error("invalid inventory {path}: {source}")]
    Inventory {
        /// Archive key of the inventory
        path: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// A report could not be rendered as JSON
    #[error("could not render report: {0}")]
    Report(#[source] serde_json::Error),
}

impl BackupError {
    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::NamespaceNotFound(_)
            | BackupError::NoBackups(_)
            | BackupError::InventoryNotFound { .. } => ErrorKind::NotFound,
            BackupError::AlreadyLocked(_) => ErrorKind::AlreadyLocked,
            BackupError::InvalidState { .. } => ErrorKind::InvalidState,
            BackupError::PartialFailure { .. } | BackupError::Incomplete { .. } => {
                ErrorKind::PartialFailure
            }
            BackupError::Configuration(_) => ErrorKind::Configuration,
            BackupError::Storage(_)
            | BackupError::Catalog(_)
            | BackupError::Inventory { .. }
            | BackupError::Report(_) => ErrorKind::Backend,
        }
    }
}
