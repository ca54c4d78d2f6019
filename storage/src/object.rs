//! Cloud object store driver, backed by the `object_store` crate.

use std::sync::Arc;

use camino::Utf8Path;
use dashmap::DashMap;
use eyre::WrapErr;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, azure::MicrosoftAzureBuilder, gcp::GoogleCloudStorageBuilder,
    path::Path as ObjectPath, ObjectStore, PutMode, PutPayload,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct S3Config {
    /// Endpoint URL. Unset means AWS itself.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region used for request signing.
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key id.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".into()
}

const REDACTED: &str = "<redacted>";

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| REDACTED))
            .finish()
    }
}

/// Connection settings for Google Cloud Storage.
///
/// Credentials come from the ambient environment.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GcsConfig {
    /// Optional path to a service account key file.
    #[serde(default)]
    pub service_account_path: Option<String>,
}

/// Connection settings for Azure blob storage.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct AzureConfig {
    /// Storage account name.
    pub account_name: String,

    /// Storage account key.
    #[serde(default)]
    pub account_key: Option<String>,
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| REDACTED))
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Backend {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
}

/// Storage driver for S3, GCS and Azure object stores.
///
/// Buckets map onto the provider's bucket (or container). A client is built
/// per bucket on first use and cached for the life of the driver.
#[derive(Debug, Clone)]
pub struct ObjectStoreDriver {
    name: &'static str,
    backend: Backend,
    clients: Arc<DashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreDriver {
    /// Driver for an S3-compatible endpoint.
    pub fn s3(config: S3Config) -> Self {
        Self::with_backend("s3", Backend::S3(config))
    }

    /// Driver for Google Cloud Storage.
    pub fn gcs(config: GcsConfig) -> Self {
        Self::with_backend("gcs", Backend::Gcs(config))
    }

    /// Driver for Azure blob storage.
    pub fn azure(config: AzureConfig) -> Self {
        Self::with_backend("azure", Backend::Azure(config))
    }

    fn with_backend(name: &'static str, backend: Backend) -> Self {
        Self {
            name,
            backend,
            clients: Arc::new(DashMap::new()),
        }
    }

    fn client(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if let Some(client) = self.clients.get(bucket) {
            return Ok(client.clone());
        }

        tracing::debug!(driver = self.name, %bucket, "building object store client");
        let client = self
            .build_client(bucket)
            .map_err(|err| {
                StorageError::builder(self.name, StorageErrorKind::InvalidRequest, err)
                    .bucket(bucket)
                    .context("configure client")
                    .build()
            })?;

        Ok(self
            .clients
            .entry(bucket.to_string())
            .or_insert(client)
            .clone())
    }

    fn build_client(&self, bucket: &str) -> eyre::Result<Arc<dyn ObjectStore>> {
        let client: Arc<dyn ObjectStore> = match &self.backend {
            Backend::S3(config) => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(&config.region);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"))
                        .with_virtual_hosted_style_request(false);
                }
                if let Some(key) = &config.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                Arc::new(builder.build().wrap_err("building s3 client")?)
            }
            Backend::Gcs(config) => {
                let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
                if let Some(path) = &config.service_account_path {
                    builder = builder.with_service_account_path(path);
                }
                Arc::new(builder.build().wrap_err("building gcs client")?)
            }
            Backend::Azure(config) => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(&config.account_name)
                    .with_container_name(bucket);
                if let Some(key) = &config.account_key {
                    builder = builder.with_access_key(key);
                }
                Arc::new(builder.build().wrap_err("building azure client")?)
            }
        };
        Ok(client)
    }

    fn error(&self, bucket: &str, remote: &Utf8Path, err: object_store::Error) -> StorageError {
        StorageError::builder(self.name, error_kind(&err), err)
            .bucket(bucket)
            .path(remote.as_str())
            .build()
    }

    async fn read_all(&self, reader: &mut Reader<'_>) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|err| StorageError::io(self.name, err))?;
        Ok(buf)
    }
}

fn error_kind(err: &object_store::Error) -> StorageErrorKind {
    match err {
        object_store::Error::NotFound { .. } => StorageErrorKind::NotFound,
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            StorageErrorKind::AlreadyExists
        }
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => StorageErrorKind::PermissionDenied,
        object_store::Error::NotSupported { .. } | object_store::Error::NotImplemented => {
            StorageErrorKind::Unsupported
        }
        object_store::Error::InvalidPath { .. }
        | object_store::Error::UnknownConfigurationKey { .. } => StorageErrorKind::InvalidRequest,
        _ => StorageErrorKind::Io,
    }
}

fn object_path(remote: &Utf8Path) -> ObjectPath {
    ObjectPath::from(remote.as_str())
}

#[async_trait::async_trait]
impl Driver for ObjectStoreDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let client = self.client(bucket)?;
        match client.delete(&object_path(remote)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(self.error(bucket, remote, err)),
        }
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let client = self.client(bucket)?;
        let meta = client
            .head(&object_path(remote))
            .await
            .map_err(|err| self.error(bucket, remote, err))?;

        Ok(Metadata {
            size: meta.size,
            modified: meta.last_modified,
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let client = self.client(bucket)?;
        let buf = self.read_all(reader).await?;

        client
            .put(&object_path(remote), PutPayload::from(buf))
            .await
            .map_err(|err| self.error(bucket, remote, err))?;
        Ok(())
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let client = self.client(bucket)?;
        let buf = self.read_all(reader).await?;
        let path = object_path(remote);

        match client
            .put_opts(&path, PutPayload::from(buf.clone()), PutMode::Create.into())
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::NotImplemented) => {
                tracing::warn!(
                    driver = self.name,
                    %bucket,
                    %remote,
                    "conditional put unsupported, falling back to check-then-put"
                );
                if self.exists(bucket, remote).await? {
                    return Err(StorageError::builder(
                        self.name,
                        StorageErrorKind::AlreadyExists,
                        format!("object already exists: {remote}"),
                    )
                    .bucket(bucket)
                    .path(remote.as_str())
                    .build());
                }
                client
                    .put(&path, PutPayload::from(buf))
                    .await
                    .map_err(|err| self.error(bucket, remote, err))?;
                Ok(())
            }
            Err(err) => Err(self.error(bucket, remote, err)),
        }
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let client = self.client(bucket)?;
        let body = client
            .get(&object_path(remote))
            .await
            .map_err(|err| self.error(bucket, remote, err))?
            .bytes()
            .await
            .map_err(|err| self.error(bucket, remote, err))?;

        writer
            .write_all(&body)
            .await
            .map_err(|err| StorageError::io(self.name, err))?;
        writer
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name, err))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let client = self.client(bucket)?;
        let prefix = prefix.map(object_path);

        let objects: Vec<_> = client
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|err| {
                StorageError::builder(self.name, error_kind(&err), err)
                    .bucket(bucket)
                    .context("list objects")
                    .build()
            })?;

        let mut paths: Vec<String> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        paths.sort();

        tracing::debug!("Found {} entries", paths.len());
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        let err = object_store::Error::NotFound {
            path: "a".into(),
            source: "gone".into(),
        };
        assert_eq!(error_kind(&err), StorageErrorKind::NotFound);

        let err = object_store::Error::AlreadyExists {
            path: "a".into(),
            source: "there".into(),
        };
        assert_eq!(error_kind(&err), StorageErrorKind::AlreadyExists);

        assert_eq!(
            error_kind(&object_store::Error::NotImplemented),
            StorageErrorKind::Unsupported
        );
    }

    #[test]
    fn clients_are_cached_per_bucket() {
        let driver = ObjectStoreDriver::s3(S3Config {
            endpoint: Some("http://localhost:9000".into()),
            region: default_region(),
            access_key_id: Some("minio".into()),
            secret_access_key: Some("minio123".into()),
        });

        let first = driver.client("quaybackup").unwrap();
        let second = driver.client("quaybackup").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        driver.client("other").unwrap();
        assert_eq!(driver.clients.len(), 2);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = S3Config {
            endpoint: None,
            region: default_region(),
            access_key_id: Some("AKIAEXAMPLE".into()),
            secret_access_key: Some("wJalrXUtnFEMI".into()),
        };

        let rendered = format!("{:?}", crate::StorageConfig::S3(config.clone()));
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));

        let driver = ObjectStoreDriver::s3(config);
        assert!(!format!("{driver:?}").contains("wJalrXUtnFEMI"));

        let azure = AzureConfig {
            account_name: "registry".into(),
            account_key: Some("c2VjcmV0".into()),
        };
        assert!(!format!("{azure:?}").contains("c2VjcmV0"));
    }
}
