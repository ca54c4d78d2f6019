use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

#[derive(Debug)]
struct MemoryFileItem {
    modified: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            modified: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            modified: value.modified,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores objects in memory.
///
/// Buckets are created implicitly on first upload.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket).or_default();
    }

    fn missing_bucket(&self, bucket: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        )
        .bucket(bucket)
        .context("bucket not found")
        .build()
    }

    fn missing_path(&self, bucket: &str, remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("Path not found: {remote}"),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .context("path not found")
        .build()
    }

    async fn read_all(&self, local: &mut Reader<'_>) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(buf)
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| self.missing_path(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket_map) = buckets.get_mut(bucket) {
            bucket_map.remove(remote);
        }

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let buf = self.read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let buf = self.read_all(local).await?;

        // Check and insert under one write guard.
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        if bucket_map.contains_key(remote) {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::AlreadyExists,
                format!("Path already exists: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        let mut buf = bucket_map
            .get(remote)
            .ok_or_else(|| self.missing_path(bucket, remote))?
            .as_ref();

        tokio::io::copy(&mut buf, local)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(bucket_map) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut paths: Vec<String> = bucket_map
            .keys()
            .filter(|path| prefix.is_none_or(|prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();
        paths.sort();

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_refuses_existing_object() {
        let storage = MemoryStorage::new();
        let path = Utf8Path::new("1-acme/backup/lock");

        storage
            .create("archive", path, &mut &b""[..])
            .await
            .unwrap();
        let err = storage
            .create("archive", path, &mut &b""[..])
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let storage = MemoryStorage::with_buckets(&["archive"]);
        let err = storage
            .metadata("archive", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage
            .exists("archive", Utf8Path::new("nope"))
            .await
            .unwrap());
        assert!(!storage
            .exists("other", Utf8Path::new("nope"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_path_components() {
        let storage = MemoryStorage::new();
        for path in ["1-acme/backup/1.json", "1-acme/backup/lock", "1-acmex/backup/1.json"] {
            storage
                .upload("archive", Utf8Path::new(path), &mut &b"{}"[..])
                .await
                .unwrap();
        }

        let listed = storage
            .list("archive", Some(Utf8Path::new("1-acme/backup")))
            .await
            .unwrap();
        assert_eq!(listed, vec!["1-acme/backup/1.json", "1-acme/backup/lock"]);
    }
}
