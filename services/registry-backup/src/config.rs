//! Settings from the environment and the registry's YAML configuration.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::{AzureConfig, GcsConfig, LocalDriver, S3Config, Storage, StorageConfig};

use crate::blobstore::RegistryBlobStore;

/// Environment variable naming the registry config file.
pub const QUAY_CONFIG: &str = "QUAY_CONFIG";
/// Archive access key id.
pub const S3_ACCESS_KEY_ID: &str = "S3_ACCESS_KEY_ID";
/// Archive secret key.
pub const S3_SECRET_ACCESS_KEY: &str = "S3_SECRET_ACCESS_KEY";
/// Archive endpoint URL.
pub const S3_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";
/// Archive region (optional).
pub const S3_REGION: &str = "S3_REGION";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_STORAGE_PATH: &str = "/datastorage/registry";

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variables are unset or empty
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnvironment(Vec<&'static str>),

    /// The registry config file could not be read
    #[error("Quay config file not readable: {path}: {source}")]
    Read {
        /// Config file path
        path: Utf8PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The registry config file is not valid YAML of the expected shape
    #[error("Invalid Quay config: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// A required key is absent from the registry config
    #[error("{0} not found in Quay configuration")]
    MissingKey(&'static str),

    /// The preferred storage location is not configured
    #[error("Storage location '{0}' not configured")]
    UnknownLocation(String),

    /// The storage driver is not one this tool can read
    #[error("Unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    /// The storage driver parameters are incomplete or malformed
    #[error("Invalid parameters for storage driver {driver}: {source}")]
    DriverParameters {
        /// Driver name
        driver: String,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// The archive bucket does not exist. It is never created by this tool.
    #[error("Archive bucket '{0}' does not exist; create it before running a backup")]
    ArchiveBucketMissing(String),
}

/// Values read from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Path of the registry config file.
    pub quay_config: Utf8PathBuf,
    /// Archive access key id.
    pub access_key_id: String,
    /// Archive secret key.
    pub secret_access_key: String,
    /// Archive endpoint URL.
    pub endpoint_url: String,
    /// Archive region.
    pub region: String,
}

impl Environment {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the environment through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let required = [QUAY_CONFIG, S3_ACCESS_KEY_ID, S3_SECRET_ACCESS_KEY, S3_ENDPOINT_URL];
        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|&key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnvironment(missing));
        }

        let value = |key: &str| get(key).unwrap_or_default();
        Ok(Self {
            quay_config: value(QUAY_CONFIG).into(),
            access_key_id: value(S3_ACCESS_KEY_ID),
            secret_access_key: value(S3_SECRET_ACCESS_KEY),
            endpoint_url: value(S3_ENDPOINT_URL),
            region: get(S3_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        })
    }

    /// Storage configuration for the archive endpoint.
    pub fn archive_storage(&self) -> StorageConfig {
        StorageConfig::S3(S3Config {
            endpoint: Some(self.endpoint_url.clone()),
            region: self.region.clone(),
            access_key_id: Some(self.access_key_id.clone()),
            secret_access_key: Some(self.secret_access_key.clone()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryConfigFile {
    #[serde(rename = "DB_URI", default)]
    db_uri: Option<String>,

    #[serde(rename = "DISTRIBUTED_STORAGE_CONFIG", default)]
    storage: serde_yaml::Mapping,

    #[serde(rename = "DISTRIBUTED_STORAGE_PREFERENCE", default)]
    preference: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LocalParams {
    #[serde(default)]
    storage_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Params {
    s3_bucket: String,
    #[serde(default)]
    s3_access_key: Option<String>,
    #[serde(default)]
    s3_secret_key: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    s3_region: Option<String>,
    #[serde(default)]
    storage_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RadosParams {
    hostname: String,
    #[serde(default = "default_secure")]
    is_secure: bool,
    #[serde(default)]
    port: Option<u16>,
    access_key: String,
    secret_key: String,
    bucket_name: String,
    #[serde(default)]
    storage_path: Option<String>,
}

fn default_secure() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct GcsParams {
    bucket_name: String,
    #[serde(default)]
    storage_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureParams {
    azure_container: String,
    azure_account_name: String,
    #[serde(default)]
    azure_account_key: Option<String>,
    #[serde(default)]
    storage_path: Option<String>,
}

fn endpoint(host: &str, secure: bool, port: Option<u16>) -> String {
    let scheme = if secure { "https" } else { "http" };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}

fn storage_path(path: Option<String>) -> Utf8PathBuf {
    path.unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string()).into()
}

/// Where the registry keeps its blobs.
#[derive(Debug, Clone)]
pub enum RegistryStorageConfig {
    /// `LocalStorage`: a directory on this host.
    Local {
        /// Directory holding the `sha256/` tree.
        storage_path: Utf8PathBuf,
    },

    /// `S3Storage`, `CloudFrontedS3Storage` and `RadosGWStorage`.
    S3Compatible {
        /// Bucket name.
        bucket: String,
        /// Connection settings.
        config: S3Config,
        /// Key prefix inside the bucket.
        storage_path: Utf8PathBuf,
    },

    /// `GoogleCloudStorage`.
    CloudStorage {
        /// Bucket name.
        bucket: String,
        /// Connection settings.
        config: GcsConfig,
        /// Key prefix inside the bucket.
        storage_path: Utf8PathBuf,
    },

    /// `AzureStorage`.
    BlobStorage {
        /// Container name.
        container: String,
        /// Connection settings.
        config: AzureConfig,
        /// Key prefix inside the container.
        storage_path: Utf8PathBuf,
    },
}

impl RegistryStorageConfig {
    /// Interpret one `[DriverName, {params}]` entry.
    pub fn from_driver(driver: &str, params: serde_yaml::Value) -> Result<Self, ConfigError> {
        let params = if params.is_null() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            params
        };
        let parse_error = |source| ConfigError::DriverParameters {
            driver: driver.to_string(),
            source,
        };

        match driver {
            "LocalStorage" => {
                let params: LocalParams = serde_yaml::from_value(params).map_err(parse_error)?;
                Ok(Self::Local {
                    storage_path: storage_path(params.storage_path),
                })
            }
            "S3Storage" | "CloudFrontedS3Storage" => {
                let params: S3Params = serde_yaml::from_value(params).map_err(parse_error)?;
                Ok(Self::S3Compatible {
                    bucket: params.s3_bucket,
                    config: S3Config {
                        endpoint: params
                            .host
                            .as_deref()
                            .map(|host| endpoint(host, true, params.port)),
                        region: params
                            .s3_region
                            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                        access_key_id: params.s3_access_key,
                        secret_access_key: params.s3_secret_key,
                    },
                    storage_path: storage_path(params.storage_path),
                })
            }
            "RadosGWStorage" => {
                let params: RadosParams = serde_yaml::from_value(params).map_err(parse_error)?;
                Ok(Self::S3Compatible {
                    bucket: params.bucket_name,
                    config: S3Config {
                        endpoint: Some(endpoint(&params.hostname, params.is_secure, params.port)),
                        region: DEFAULT_REGION.to_string(),
                        access_key_id: Some(params.access_key),
                        secret_access_key: Some(params.secret_key),
                    },
                    storage_path: storage_path(params.storage_path),
                })
            }
            "GoogleCloudStorage" => {
                let params: GcsParams = serde_yaml::from_value(params).map_err(parse_error)?;
                Ok(Self::CloudStorage {
                    bucket: params.bucket_name,
                    config: GcsConfig::default(),
                    storage_path: storage_path(params.storage_path),
                })
            }
            "AzureStorage" => {
                let params: AzureParams = serde_yaml::from_value(params).map_err(parse_error)?;
                Ok(Self::BlobStorage {
                    container: params.azure_container,
                    config: AzureConfig {
                        account_name: params.azure_account_name,
                        account_key: params.azure_account_key,
                    },
                    storage_path: storage_path(params.storage_path),
                })
            }
            other => Err(ConfigError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Build the blob store this configuration describes.
    pub fn blob_store(&self) -> RegistryBlobStore {
        match self {
            Self::Local { storage_path } => {
                let storage = Storage::new(LocalDriver::new(storage_path.clone()));
                RegistryBlobStore::new(storage.bucket(""), None)
            }
            Self::S3Compatible {
                bucket,
                config,
                storage_path,
            } => {
                let storage = StorageConfig::S3(config.clone()).build();
                RegistryBlobStore::new(storage.bucket(bucket.as_str()), Some(storage_path))
            }
            Self::CloudStorage {
                bucket,
                config,
                storage_path,
            } => {
                let storage = StorageConfig::Gcs(config.clone()).build();
                RegistryBlobStore::new(storage.bucket(bucket.as_str()), Some(storage_path))
            }
            Self::BlobStorage {
                container,
                config,
                storage_path,
            } => {
                let storage = StorageConfig::Azure(config.clone()).build();
                RegistryBlobStore::new(storage.bucket(container.as_str()), Some(storage_path))
            }
        }
    }
}

/// Everything needed to reach the catalog, the registry storage and the
/// archive.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Process environment values.
    pub environment: Environment,
    /// Registry database URL.
    pub database_url: String,
    /// Registry blob storage.
    pub registry_storage: RegistryStorageConfig,
}

impl Settings {
    /// Load settings from the process environment and the config file it
    /// points at.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = Environment::from_env()?;
        Self::from_environment(environment)
    }

    /// Load settings for a resolved environment.
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let contents = read_config(&environment.quay_config)?;
        Self::from_yaml(environment, &contents)
    }

    /// Build settings from registry config YAML.
    pub fn from_yaml(environment: Environment, yaml: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfigFile = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;

        let database_url = config
            .db_uri
            .filter(|uri| !uri.is_empty())
            .ok_or(ConfigError::MissingKey("DB_URI"))?;

        let storage = config.storage;
        if storage.is_empty() {
            return Err(ConfigError::MissingKey("DISTRIBUTED_STORAGE_CONFIG"));
        }

        // Without a preference the first location in file order wins.
        let location = match config.preference.first() {
            Some(location) => location.clone(),
            None => storage
                .keys()
                .find_map(|key| key.as_str().map(str::to_owned))
                .ok_or(ConfigError::MissingKey("DISTRIBUTED_STORAGE_CONFIG"))?,
        };
        let entry = storage
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownLocation(location.clone()))?;
        let (driver, params) = driver_entry(entry)?;
        tracing::debug!(%location, %driver, "using registry storage location");

        Ok(Self {
            environment,
            database_url,
            registry_storage: RegistryStorageConfig::from_driver(&driver, params)?,
        })
    }
}

/// Split a `[DriverName, {params}]` entry. The parameters may be omitted.
fn driver_entry(entry: serde_yaml::Value) -> Result<(String, serde_yaml::Value), ConfigError> {
    let mut parts: Vec<serde_yaml::Value> = serde_yaml::from_value(entry).map_err(ConfigError::Parse)?;
    if parts.is_empty() {
        return Err(ConfigError::UnsupportedDriver(String::new()));
    }
    let params = if parts.len() > 1 {
        parts.swap_remove(1)
    } else {
        serde_yaml::Value::Null
    };
    let driver = match parts.swap_remove(0) {
        serde_yaml::Value::String(driver) => driver,
        other => return Err(ConfigError::UnsupportedDriver(format!("{other:?}"))),
    };
    Ok((driver, params))
}

fn read_config(path: &Utf8Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn environment() -> Environment {
        Environment {
            quay_config: "/conf/stack/config.yaml".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            endpoint_url: "http://minio:9000".into(),
            region: DEFAULT_REGION.into(),
        }
    }

    #[test]
    fn missing_environment_is_listed() {
        let vars: HashMap<&str, &str> = [(QUAY_CONFIG, "/conf/config.yaml"), (S3_ACCESS_KEY_ID, "")]
            .into_iter()
            .collect();
        let err = Environment::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("S3_ACCESS_KEY_ID"));
        assert!(message.contains("S3_SECRET_ACCESS_KEY"));
        assert!(message.contains("S3_ENDPOINT_URL"));
        assert!(!message.contains("QUAY_CONFIG"));
    }

    #[test]
    fn region_defaults() {
        let vars: HashMap<&str, &str> = [
            (QUAY_CONFIG, "/conf/config.yaml"),
            (S3_ACCESS_KEY_ID, "key"),
            (S3_SECRET_ACCESS_KEY, "secret"),
            (S3_ENDPOINT_URL, "http://minio:9000"),
        ]
        .into_iter()
        .collect();
        let env = Environment::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(env.region, "us-east-1");
        assert_eq!(env.quay_config.as_str(), "/conf/config.yaml");
    }

    #[test]
    fn local_storage() {
        let settings = Settings::from_yaml(
            environment(),
            r#"
DB_URI: postgresql://quay:quay@db/quay
DISTRIBUTED_STORAGE_CONFIG:
  default:
    - LocalStorage
    - storage_path: /datastorage/registry
"#,
        )
        .unwrap();
        assert_eq!(settings.database_url, "postgresql://quay:quay@db/quay");
        assert!(matches!(
            settings.registry_storage,
            RegistryStorageConfig::Local { ref storage_path } if storage_path == "/datastorage/registry"
        ));
    }

    #[test]
    fn preference_selects_location() {
        let settings = Settings::from_yaml(
            environment(),
            r#"
DB_URI: postgresql://quay@db/quay
DISTRIBUTED_STORAGE_PREFERENCE: [s3]
DISTRIBUTED_STORAGE_CONFIG:
  local:
    - LocalStorage
    - {}
  s3:
    - S3Storage
    - s3_bucket: quay
      host: s3.example.com
      s3_access_key: key
      s3_secret_key: secret
"#,
        )
        .unwrap();

        let RegistryStorageConfig::S3Compatible {
            bucket,
            config,
            storage_path,
        } = settings.registry_storage
        else {
            panic!("expected s3 storage");
        };
        assert_eq!(bucket, "quay");
        assert_eq!(config.endpoint.as_deref(), Some("https://s3.example.com"));
        assert_eq!(config.region, "us-east-1");
        assert_eq!(storage_path, "/datastorage/registry");
    }

    #[test]
    fn radosgw_endpoint() {
        let params: serde_yaml::Value = serde_yaml::from_str(
            "{hostname: ceph, is_secure: false, port: 7480, access_key: a, secret_key: s, bucket_name: quay}",
        )
        .unwrap();
        let RegistryStorageConfig::S3Compatible { config, .. } =
            RegistryStorageConfig::from_driver("RadosGWStorage", params).unwrap()
        else {
            panic!("expected s3 storage");
        };
        assert_eq!(config.endpoint.as_deref(), Some("http://ceph:7480"));
    }

    #[test]
    fn config_errors() {
        let err = Settings::from_yaml(environment(), "DISTRIBUTED_STORAGE_CONFIG: {}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("DB_URI")));

        let err = Settings::from_yaml(environment(), "DB_URI: postgresql://db/quay").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("DISTRIBUTED_STORAGE_CONFIG")));

        let err = Settings::from_yaml(
            environment(),
            "DB_URI: postgresql://db/quay\nDISTRIBUTED_STORAGE_CONFIG:\n  swift: [SwiftStorage, {}]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedDriver(ref name) if name == "SwiftStorage"));

        let err = Settings::from_yaml(
            environment(),
            "DB_URI: postgresql://db/quay\nDISTRIBUTED_STORAGE_PREFERENCE: [east]\nDISTRIBUTED_STORAGE_CONFIG:\n  west: [LocalStorage, {}]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLocation(ref name) if name == "east"));
    }
}
