//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io;

#[cfg(feature = "local")]
pub(crate) mod local;
pub(crate) mod memory;
#[cfg(feature = "cloud")]
pub(crate) mod object;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "cloud")]
#[doc(inline)]
pub use object::{AzureConfig, GcsConfig, ObjectStoreDriver, S3Config};

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

/// Backend selection for a [`Storage`] handle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Objects held in process memory.
    Memory {
        /// Bucket created up front.
        bucket: String,
    },

    /// Objects stored as files under a directory.
    #[cfg(feature = "local")]
    Local {
        /// Root directory; buckets are subdirectories.
        path: Utf8PathBuf,
    },

    /// An S3-compatible object store.
    #[cfg(feature = "cloud")]
    S3(S3Config),

    /// Google Cloud Storage.
    #[cfg(feature = "cloud")]
    Gcs(GcsConfig),

    /// Azure blob storage.
    #[cfg(feature = "cloud")]
    Azure(AzureConfig),
}

impl StorageConfig {
    /// Build the storage handle described by this configuration.
    #[tracing::instrument(skip(self))]
    pub fn build(self) -> Storage {
        match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "cloud")]
            StorageConfig::S3(config) => ObjectStoreDriver::s3(config).into(),
            #[cfg(feature = "cloud")]
            StorageConfig::Gcs(config) => ObjectStoreDriver::gcs(config).into(),
            #[cfg(feature = "cloud")]
            StorageConfig::Azure(config) => ObjectStoreDriver::azure(config).into(),
        }
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cheaply cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle scoped to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// Storage handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket this handle operates on.
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// Size and modification time of an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Whether an object exists. Only a missing object yields `false`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn exists(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        self.driver.exists(&self.bucket, remote).await
    }

    /// Stream an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Stream `reader` into an object, replacing anything at the path.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// Read a whole object into memory.
    pub async fn read(&self, remote: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        self.download(remote, &mut buf).await?;
        Ok(buf)
    }

    /// Write a whole object, replacing anything at the path.
    pub async fn write(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = data;
        self.upload(remote, &mut reader).await
    }

    /// Write a whole object only if nothing exists at the path.
    #[tracing::instrument(skip(self, data), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn create(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = data;
        self.driver.create(&self.bucket, remote, &mut reader).await
    }

    /// Bucket-relative paths of every object under `prefix`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Remove an object. Removing a missing object succeeds.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_json() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"memory": {"bucket": "quaybackup"}}"#).unwrap();
        assert!(matches!(config, StorageConfig::Memory { ref bucket } if bucket == "quaybackup"));

        #[cfg(feature = "cloud")]
        {
            let config: StorageConfig = serde_json::from_str(
                r#"{"s3": {"endpoint": "http://minio:9000", "access_key_id": "k"}}"#,
            )
            .unwrap();
            let StorageConfig::S3(s3) = config else {
                panic!("expected s3 config");
            };
            assert_eq!(s3.region, "us-east-1");
            assert_eq!(s3.access_key_id.as_deref(), Some("k"));
        }
    }

    #[tokio::test]
    async fn bucket_round_trip() {
        let storage = StorageConfig::Memory {
            bucket: "quaybackup".into(),
        }
        .build();
        let bucket = storage.bucket("quaybackup");
        let path = Utf8Path::new("1-acme/backup/1.json");

        bucket.write(path, b"{}").await.unwrap();
        assert!(bucket.exists(path).await.unwrap());
        assert_eq!(bucket.read(path).await.unwrap(), b"{}");

        let err = bucket.create(path, b"").await.unwrap_err();
        assert!(err.is_already_exists());

        bucket.delete(path).await.unwrap();
        let err = bucket.read(path).await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }
}
