use serde::Serialize;

use super::Toolkit;
use crate::archive::NamespacePrefix;
use crate::error::BackupResult;

/// Result of removing a namespace lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnlockReport {
    operation: &'static str,

    /// Namespace name.
    pub namespace: String,

    /// Whether a lock was present.
    pub lock_existed: bool,

    /// What happened.
    pub message: String,
}

impl Toolkit {
    /// Remove a stale backup lock.
    #[tracing::instrument(skip(self), fields(namespace = name))]
    pub async fn unlock(&self, name: &str) -> BackupResult<UnlockReport> {
        tracing::info!("Unlocking namespace: {name}");
        let namespace = self.namespace(name).await?;
        let prefix = NamespacePrefix::from(&namespace);

        let lock_existed = self.archive.lock_exists(&prefix).await?;
        let message = if lock_existed {
            self.archive.release_lock(&prefix).await?;
            format!("Successfully removed backup lock for namespace '{name}'")
        } else {
            tracing::info!("No lock found for namespace {name}");
            format!("No backup lock found for namespace '{name}'")
        };

        Ok(UnlockReport {
            operation: "Unlock",
            namespace: name.to_string(),
            lock_existed,
            message,
        })
    }
}
