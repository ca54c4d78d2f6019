//! The archive bucket: lock markers, numbered inventories and archived blobs.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use catalog::Namespace;
use storage::StorageBucket;

use crate::digest::BlobDigest;
use crate::config::ConfigError;
use crate::error::{BackupError, BackupResult};
use crate::inventory::Inventory;

/// Sequence number of an inventory within a namespace.
pub type BackupNumber = u64;

/// The key prefix which scopes every archive object of one namespace.
///
/// Rendered as `<id>-<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePrefix {
    id: i64,
    name: String,
}

impl NamespacePrefix {
    /// Prefix for a namespace id and name.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// The namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.to_string())
    }

    /// Directory holding the lock and the inventories.
    pub fn backup_dir(&self) -> Utf8PathBuf {
        self.root().join("backup")
    }

    /// Key of the lock marker.
    pub fn lock_path(&self) -> Utf8PathBuf {
        self.backup_dir().join("lock")
    }

    /// Key of inventory `number`.
    pub fn inventory_path(&self, number: BackupNumber) -> Utf8PathBuf {
        self.backup_dir().join(format!("{number}.json"))
    }

    /// Key of an archived blob.
    pub fn blob_path(&self, digest: &BlobDigest) -> Utf8PathBuf {
        let mut path = self.root().join("blob");
        path.push(digest.shard());
        path.push(digest.as_str());
        path
    }
}

impl From<&Namespace> for NamespacePrefix {
    fn from(namespace: &Namespace) -> Self {
        Self::new(namespace.id, namespace.name.clone())
    }
}

impl fmt::Display for NamespacePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.name)
    }
}

fn backup_number(path: &str) -> Option<BackupNumber> {
    Utf8Path::new(path)
        .file_name()?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Archive storage for namespace backups.
#[derive(Clone, Debug)]
pub struct ArchiveStore {
    bucket: StorageBucket,
}

impl ArchiveStore {
    /// Create an archive store over a bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    /// The archive bucket name.
    pub fn bucket_name(&self) -> &str {
        &self.bucket.bucket
    }

    /// Whether a backup currently holds the namespace lock.
    pub async fn lock_exists(&self, prefix: &NamespacePrefix) -> BackupResult<bool> {
        Ok(self.bucket.exists(&prefix.lock_path()).await?)
    }

    /// Create the lock marker, failing if one is already present.
    #[tracing::instrument(skip(self), fields(%prefix))]
    pub async fn acquire_lock(&self, prefix: &NamespacePrefix) -> BackupResult<()> {
        match self.bucket.create(&prefix.lock_path(), b"").await {
            Ok(()) => {
                tracing::info!("Created backup lock");
                Ok(())
            }
            Err(error) if error.is_already_exists() => {
                Err(BackupError::AlreadyLocked(prefix.name().to_string()))
            }
            Err(error) if error.is_not_found() => {
                tracing::error!(bucket = %self.bucket_name(), "Archive bucket is missing: {error}");
                Err(ConfigError::ArchiveBucketMissing(self.bucket_name().to_string()).into())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Remove the lock marker. Removing an absent lock succeeds.
    #[tracing::instrument(skip(self), fields(%prefix))]
    pub async fn release_lock(&self, prefix: &NamespacePrefix) -> BackupResult<()> {
        self.bucket.delete(&prefix.lock_path()).await?;
        tracing::info!("Removed backup lock");
        Ok(())
    }

    /// Every inventory number present for the namespace, ascending.
    ///
    /// Keys whose file stem is not a number are ignored.
    pub async fn backup_numbers(&self, prefix: &NamespacePrefix) -> BackupResult<Vec<BackupNumber>> {
        let mut numbers: Vec<BackupNumber> = self
            .bucket
            .list(Some(&prefix.backup_dir()))
            .await?
            .iter()
            .filter_map(|path| backup_number(path))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// The highest inventory number, if any inventory exists.
    pub async fn latest_backup_number(
        &self,
        prefix: &NamespacePrefix,
    ) -> BackupResult<Option<BackupNumber>> {
        Ok(self.backup_numbers(prefix).await?.last().copied())
    }

    /// The number the next backup will be saved under.
    pub async fn next_backup_number(&self, prefix: &NamespacePrefix) -> BackupResult<BackupNumber> {
        Ok(self.latest_backup_number(prefix).await?.unwrap_or(0) + 1)
    }

    /// Persist an inventory as pretty-printed JSON.
    #[tracing::instrument(skip(self, inventory), fields(%prefix, backup_number = number))]
    pub async fn save_inventory(
        &self,
        prefix: &NamespacePrefix,
        number: BackupNumber,
        inventory: &Inventory,
    ) -> BackupResult<()> {
        let path = prefix.inventory_path(number);
        let body = serde_json::to_vec_pretty(inventory).map_err(|source| BackupError::Inventory {
            path: path.to_string(),
            source,
        })?;
        self.bucket.write(&path, &body).await?;
        tracing::info!("Saved backup inventory {number}");
        Ok(())
    }

    /// Load an inventory, defaulting to the latest one.
    ///
    /// Returns the number that was loaded along with the inventory.
    #[tracing::instrument(skip(self), fields(%prefix))]
    pub async fn load_inventory(
        &self,
        prefix: &NamespacePrefix,
        number: Option<BackupNumber>,
    ) -> BackupResult<(BackupNumber, Inventory)> {
        let number = match number {
            Some(number) => number,
            None => self
                .latest_backup_number(prefix)
                .await?
                .ok_or_else(|| BackupError::NoBackups(prefix.name().to_string()))?,
        };

        let path = prefix.inventory_path(number);
        let body = match self.bucket.read(&path).await {
            Ok(body) => body,
            Err(error) if error.is_not_found() => {
                return Err(BackupError::InventoryNotFound {
                    namespace: prefix.name().to_string(),
                    number,
                })
            }
            Err(error) => return Err(error.into()),
        };

        let inventory = serde_json::from_slice(&body).map_err(|source| BackupError::Inventory {
            path: path.to_string(),
            source,
        })?;
        Ok((number, inventory))
    }

    /// Whether a blob has been archived for the namespace.
    pub async fn blob_exists(
        &self,
        prefix: &NamespacePrefix,
        digest: &BlobDigest,
    ) -> BackupResult<bool> {
        Ok(self.bucket.exists(&prefix.blob_path(digest)).await?)
    }

    /// Archive a blob.
    pub async fn upload_blob(
        &self,
        prefix: &NamespacePrefix,
        digest: &BlobDigest,
        data: &[u8],
    ) -> BackupResult<()> {
        self.bucket.write(&prefix.blob_path(digest), data).await?;
        Ok(())
    }

    /// Fetch an archived blob, or `None` if it was never archived.
    pub async fn download_blob(
        &self,
        prefix: &NamespacePrefix,
        digest: &BlobDigest,
    ) -> BackupResult<Option<Vec<u8>>> {
        match self.bucket.read(&prefix.blob_path(digest)).await {
            Ok(data) => Ok(Some(data)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Inventory, Status, Summary};
    use storage::MemoryStorage;

    fn archive() -> ArchiveStore {
        let storage: storage::Storage = MemoryStorage::with_buckets(&["quaybackup"]).into();
        ArchiveStore::new(storage.bucket("quaybackup"))
    }

    fn prefix() -> NamespacePrefix {
        NamespacePrefix::new(7, "acme")
    }

    fn inventory() -> Inventory {
        Inventory {
            user: "acme".into(),
            id: "7".into(),
            repositories: Vec::new(),
            summary: Summary::new(Status::Success, 0, 0, 0, 0),
        }
    }

    #[test]
    fn keys() {
        let prefix = prefix();
        assert_eq!(prefix.to_string(), "7-acme");
        assert_eq!(prefix.lock_path().as_str(), "7-acme/backup/lock");
        assert_eq!(prefix.inventory_path(3).as_str(), "7-acme/backup/3.json");
        assert_eq!(
            prefix.blob_path(&BlobDigest::new("sha256:deadbeef")).as_str(),
            "7-acme/blob/de/deadbeef"
        );
    }

    #[test]
    fn numbers_from_keys() {
        assert_eq!(backup_number("7-acme/backup/12.json"), Some(12));
        assert_eq!(backup_number("7-acme/backup/lock"), None);
        assert_eq!(backup_number("7-acme/backup/notes.json"), None);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let archive = archive();
        let prefix = prefix();

        assert!(!archive.lock_exists(&prefix).await.unwrap());
        archive.acquire_lock(&prefix).await.unwrap();
        assert!(archive.lock_exists(&prefix).await.unwrap());

        let err = archive.acquire_lock(&prefix).await.unwrap_err();
        assert!(matches!(err, BackupError::AlreadyLocked(ref name) if name == "acme"));

        archive.release_lock(&prefix).await.unwrap();
        archive.release_lock(&prefix).await.unwrap();
        assert!(!archive.lock_exists(&prefix).await.unwrap());
    }

    #[tokio::test]
    async fn numbering_follows_the_highest_inventory() {
        let archive = archive();
        let prefix = prefix();

        assert_eq!(archive.latest_backup_number(&prefix).await.unwrap(), None);
        assert_eq!(archive.next_backup_number(&prefix).await.unwrap(), 1);
        assert!(matches!(
            archive.load_inventory(&prefix, None).await,
            Err(BackupError::NoBackups(_))
        ));

        for number in [1, 2, 5] {
            archive
                .save_inventory(&prefix, number, &inventory())
                .await
                .unwrap();
        }
        archive.acquire_lock(&prefix).await.unwrap();

        assert_eq!(archive.backup_numbers(&prefix).await.unwrap(), vec![1, 2, 5]);
        assert_eq!(archive.next_backup_number(&prefix).await.unwrap(), 6);

        let (number, loaded) = archive.load_inventory(&prefix, None).await.unwrap();
        assert_eq!(number, 5);
        assert_eq!(loaded.user, "acme");

        assert!(matches!(
            archive.load_inventory(&prefix, Some(3)).await,
            Err(BackupError::InventoryNotFound { number: 3, .. })
        ));
    }

    #[tokio::test]
    async fn blobs() {
        let archive = archive();
        let prefix = prefix();
        let digest = BlobDigest::new("sha256:b1");

        assert!(!archive.blob_exists(&prefix, &digest).await.unwrap());
        assert!(archive.download_blob(&prefix, &digest).await.unwrap().is_none());

        archive.upload_blob(&prefix, &digest, b"layer").await.unwrap();
        assert!(archive.blob_exists(&prefix, &BlobDigest::new("b1")).await.unwrap());
        assert_eq!(
            archive.download_blob(&prefix, &digest).await.unwrap().unwrap(),
            b"layer"
        );
    }
}
