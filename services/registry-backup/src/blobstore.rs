//! The registry's own blob storage

use camino::{Utf8Path, Utf8PathBuf};
use storage::StorageBucket;

use crate::digest::BlobDigest;
use crate::error::BackupResult;

/// Content-addressed blob storage used by the registry.
///
/// Blobs live at `<storage_path>/sha256/<shard>/<digest>` inside the
/// registry's bucket.
#[derive(Clone, Debug)]
pub struct RegistryBlobStore {
    bucket: StorageBucket,
    storage_path: Option<Utf8PathBuf>,
}

impl RegistryBlobStore {
    /// Create a blob store over a bucket, rooted at an optional path prefix.
    ///
    /// A leading `/` on the prefix is ignored.
    pub fn new(bucket: StorageBucket, storage_path: Option<&Utf8Path>) -> Self {
        let storage_path = storage_path
            .map(|path| Utf8PathBuf::from(path.as_str().trim_start_matches('/')))
            .filter(|path| !path.as_str().is_empty());
        Self {
            bucket,
            storage_path,
        }
    }

    /// Get the path for a blob
    pub fn blob_path(&self, digest: &BlobDigest) -> Utf8PathBuf {
        match &self.storage_path {
            Some(root) => root.join(digest.cas_path()),
            None => digest.cas_path(),
        }
    }

    /// Check if a blob exists
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn exists(&self, digest: &BlobDigest) -> BackupResult<bool> {
        Ok(self.bucket.exists(&self.blob_path(digest)).await?)
    }

    /// Read a blob, or `None` if the registry does not hold it
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn read(&self, digest: &BlobDigest) -> BackupResult<Option<Vec<u8>>> {
        match self.bucket.read(&self.blob_path(digest)).await {
            Ok(data) => Ok(Some(data)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Store a blob
    #[tracing::instrument(skip(self, data), fields(%digest, size = data.len()))]
    pub async fn write(&self, digest: &BlobDigest, data: &[u8]) -> BackupResult<()> {
        self.bucket.write(&self.blob_path(digest), data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    fn test_store(storage_path: Option<&str>) -> RegistryBlobStore {
        let storage: storage::Storage = MemoryStorage::with_buckets(&["registry"]).into();
        RegistryBlobStore::new(storage.bucket("registry"), storage_path.map(Utf8Path::new))
    }

    #[tokio::test]
    async fn test_blob_storage() {
        let store = test_store(None);
        let digest = BlobDigest::new("sha256:b1");

        assert!(!store.exists(&digest).await.unwrap());
        assert!(store.read(&digest).await.unwrap().is_none());

        store.write(&digest, b"layer").await.unwrap();

        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(store.read(&digest).await.unwrap().unwrap(), b"layer");
    }

    #[test]
    fn test_blob_paths() {
        let store = test_store(Some("/datastorage/registry"));
        let path = store.blob_path(&BlobDigest::new("sha256:abcdef123456"));
        assert_eq!(path.as_str(), "datastorage/registry/sha256/ab/abcdef123456");

        let store = test_store(Some("/"));
        let path = store.blob_path(&BlobDigest::new("abcdef123456"));
        assert_eq!(path.as_str(), "sha256/ab/abcdef123456");
    }
}
