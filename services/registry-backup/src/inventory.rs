//! Backup inventories and the walk which produces them.
//!
//! An inventory records, per repository, which blobs every manifest
//! referenced at backup time. Counts are written as decimal strings; either
//! strings or numbers are accepted when reading.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use catalog::{Catalog, Namespace};
use serde::{Deserialize, Serialize};

use crate::digest::BlobDigest;
use crate::error::BackupResult;
use crate::pool::TransferTask;

/// Format of the `Completed` timestamps.
const TIMESTAMP_FORMAT: &str = "%A, %b %d, %Y %H:%M";

/// The current local time, formatted for a summary.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Outcome recorded in a summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Every blob transferred.
    Success,
    /// At least one blob failed.
    #[default]
    Failed,
    /// The run had not finished when the summary was written.
    #[serde(rename = "In Progress")]
    InProgress,
    /// A status this tool does not recognize.
    #[serde(other)]
    Unknown,
}

impl Status {
    /// `Success` when nothing failed, `Failed` otherwise.
    pub fn from_failures(failed: usize) -> Self {
        if failed == 0 {
            Status::Success
        } else {
            Status::Failed
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("Success"),
            Status::Failed => f.write_str("Failed"),
            Status::InProgress => f.write_str("In Progress"),
            Status::Unknown => f.write_str("Unknown"),
        }
    }
}

mod stringly {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Count::deserialize(deserializer)? {
            Count::Number(value) => Ok(value),
            Count::Text(text) if text.trim().is_empty() => Ok(0),
            Count::Text(text) => text.trim().parse().map_err(D::Error::custom),
        }
    }
}

/// Transfer counters of a backup or restore run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataCounters {
    /// Blobs actually transferred.
    #[serde(default, with = "stringly")]
    pub blobs: u64,

    /// Bytes transferred.
    #[serde(default, with = "stringly")]
    pub bytes_written: u64,
}

/// Summary block shared by inventories and restore reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Summary {
    /// When the run finished.
    #[serde(default)]
    pub completed: String,

    /// Run outcome.
    #[serde(default)]
    pub status: Status,

    /// Repositories covered.
    #[serde(default, with = "stringly")]
    pub repositories_created: u64,

    /// Manifests covered.
    #[serde(default, with = "stringly")]
    pub manifests_created: u64,

    /// Transfer counters.
    #[serde(default)]
    pub data: DataCounters,
}

impl Summary {
    /// A summary stamped with the current time.
    pub fn new(status: Status, repositories: u64, manifests: u64, blobs: u64, bytes: u64) -> Self {
        Self {
            completed: timestamp(),
            status,
            repositories_created: repositories,
            manifests_created: manifests,
            data: DataCounters {
                blobs,
                bytes_written: bytes,
            },
        }
    }
}

/// The manifests of one repository, each with the blobs it references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryBackup {
    /// Repository name.
    pub name: String,

    /// Repository id, as a string.
    #[serde(default)]
    pub id: String,

    /// Manifest digest to blob digests, in discovery order.
    #[serde(default)]
    pub manifests: BTreeMap<BlobDigest, Vec<BlobDigest>>,
}

/// A persisted record of one backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Inventory {
    /// Namespace name.
    #[serde(default)]
    pub user: String,

    /// Namespace id, as a string.
    #[serde(default)]
    pub id: String,

    /// Repositories captured.
    #[serde(default)]
    pub repositories: Vec<RepositoryBackup>,

    /// Run summary.
    #[serde(default)]
    pub summary: Summary,
}

/// Work derived from a catalog walk or a stored inventory.
#[derive(Debug, Clone, Default)]
pub struct BackupPlan {
    /// Repositories in scope with their manifest maps.
    pub repositories: Vec<RepositoryBackup>,

    /// One task per distinct blob digest, in first-seen order.
    pub tasks: Vec<TransferTask>,
}

impl BackupPlan {
    /// Number of repositories in scope.
    pub fn repository_count(&self) -> u64 {
        self.repositories.len() as u64
    }

    /// Number of distinct manifests across the repositories in scope.
    pub fn manifest_count(&self) -> u64 {
        self.repositories
            .iter()
            .map(|repo| repo.manifests.len() as u64)
            .sum()
    }
}

/// Builds a [`BackupPlan`], deduplicating blobs by digest as it goes.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    plan: BackupPlan,
    seen: HashSet<BlobDigest>,
}

impl InventoryBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blob reference. Only the first reference to a digest becomes
    /// a task.
    fn push_task(&mut self, repository: &str, manifest: &BlobDigest, digest: &BlobDigest) {
        if self.seen.insert(digest.clone()) {
            self.plan.tasks.push(TransferTask::new(
                digest.clone(),
                repository.to_string(),
                manifest.clone(),
            ));
        }
    }

    /// Add a repository and queue tasks for its blobs.
    pub fn add_repository(&mut self, repository: RepositoryBackup, order: &[BlobDigest]) {
        for manifest in order {
            if let Some(blobs) = repository.manifests.get(manifest) {
                for digest in blobs {
                    self.push_task(&repository.name, manifest, digest);
                }
            }
        }
        self.plan.repositories.push(repository);
    }

    /// Finish the plan.
    pub fn build(self) -> BackupPlan {
        self.plan
    }

    /// Walk the live catalog for a namespace.
    ///
    /// Repositories are visited by name and manifests by id. Each manifest
    /// lists its own blobs followed by the blobs of its child manifests.
    #[tracing::instrument(skip(catalog, namespace), fields(namespace = %namespace.name))]
    pub async fn from_catalog(catalog: &dyn Catalog, namespace: &Namespace) -> BackupResult<BackupPlan> {
        let mut builder = Self::new();

        let repositories = catalog.repositories(namespace.id).await?;
        tracing::info!("Found {} repositories", repositories.len());

        for repository in repositories {
            tracing::info!("Processing repository: {}", repository.name);

            let mut manifests = BTreeMap::new();
            let mut order = Vec::new();
            for manifest in catalog.manifests(repository.id).await? {
                tracing::debug!("Getting blobs for manifest {}", manifest.id);

                let mut blobs: Vec<BlobDigest> = catalog
                    .manifest_blobs(manifest.id)
                    .await?
                    .iter()
                    .map(|blob| BlobDigest::new(&blob.digest))
                    .collect();

                for child in catalog.manifest_children(manifest.id).await? {
                    blobs.extend(
                        catalog
                            .manifest_blobs(child.id)
                            .await?
                            .iter()
                            .map(|blob| BlobDigest::new(&blob.digest)),
                    );
                }

                let digest = BlobDigest::new(&manifest.digest);
                if manifests.insert(digest.clone(), blobs).is_none() {
                    order.push(digest);
                }
            }

            builder.add_repository(
                RepositoryBackup {
                    name: repository.name,
                    id: repository.id.to_string(),
                    manifests,
                },
                &order,
            );
        }

        Ok(builder.build())
    }

    /// Plan a restore from a stored inventory, optionally limited to one
    /// repository by name.
    pub fn from_inventory(inventory: &Inventory, repository: Option<&str>) -> BackupPlan {
        let mut builder = Self::new();

        for repo in inventory
            .repositories
            .iter()
            .filter(|repo| repository.is_none_or(|name| repo.name == name))
        {
            let order: Vec<BlobDigest> = repo.manifests.keys().cloned().collect();
            builder.add_repository(repo.clone(), &order);
        }

        if let Some(name) = repository {
            if builder.plan.repositories.is_empty() {
                tracing::warn!(repository = name, "Repository filter matched nothing in the inventory");
            }
        }

        builder.build()
    }
}

impl Inventory {
    /// Every blob digest referenced anywhere in the inventory.
    pub fn blob_digests(&self) -> HashSet<BlobDigest> {
        self.repositories
            .iter()
            .flat_map(|repo| repo.manifests.values())
            .flatten()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::MemoryCatalog;

    #[test]
    fn counts_are_strings() {
        let summary = Summary::new(Status::Success, 1, 2, 3, 4);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["RepositoriesCreated"], "1");
        assert_eq!(value["ManifestsCreated"], "2");
        assert_eq!(value["Data"]["Blobs"], "3");
        assert_eq!(value["Data"]["BytesWritten"], "4");
        assert_eq!(value["Status"], "Success");
    }

    #[test]
    fn lenient_reading() {
        let inventory: Inventory = serde_json::from_str(
            r#"{
                "User": "acme",
                "Repositories": [{"Name": "app", "Id": "3", "Manifests": {"sha256:abc": ["sha256:b1", "b2"]}}],
                "Summary": {"Status": "In Progress", "RepositoriesCreated": 1, "Data": {"Blobs": "2"}}
            }"#,
        )
        .unwrap();

        assert_eq!(inventory.summary.status, Status::InProgress);
        assert_eq!(inventory.summary.repositories_created, 1);
        assert_eq!(inventory.summary.manifests_created, 0);
        assert_eq!(inventory.summary.data.blobs, 2);

        let blobs = &inventory.repositories[0].manifests[&BlobDigest::new("abc")];
        assert_eq!(blobs, &vec![BlobDigest::new("b1"), BlobDigest::new("b2")]);
    }

    #[test]
    fn missing_status_is_failed() {
        let inventory: Inventory = serde_json::from_str(r#"{"User": "acme"}"#).unwrap();
        assert_eq!(inventory.summary.status, Status::Failed);

        let summary: Summary = serde_json::from_str(r#"{"Status": "Paused"}"#).unwrap();
        assert_eq!(summary.status, Status::Unknown);
    }

    #[test]
    fn timestamp_format() {
        let stamp = timestamp();
        // e.g. "Thursday, Oct 15, 2026 09:30"
        assert_eq!(stamp.matches(',').count(), 2);
        assert!(stamp.contains(':'));
    }

    #[tokio::test]
    async fn catalog_walk() {
        let catalog = MemoryCatalog::new();
        let ns = catalog.add_namespace("acme", true);
        let app = catalog.add_repository(ns, "app");

        let list = catalog.add_manifest(app, "sha256:list", None);
        catalog.add_blob(list, "sha256:config", 1);
        let child = catalog.add_manifest(app, "sha256:amd64", None);
        catalog.add_blob(child, "sha256:layer", 10);
        catalog.add_child(list, child);

        let namespace = catalog.namespace("acme").await.unwrap().unwrap();
        let plan = InventoryBuilder::from_catalog(&catalog, &namespace).await.unwrap();

        let repo = &plan.repositories[0];
        assert_eq!(
            repo.manifests[&BlobDigest::new("list")],
            vec![BlobDigest::new("config"), BlobDigest::new("layer")]
        );
        assert_eq!(plan.manifest_count(), 2);

        let digests: Vec<&str> = plan.tasks.iter().map(|task| task.digest.as_str()).collect();
        assert_eq!(digests, vec!["config", "layer"]);
        assert_eq!(plan.tasks[1].manifest, BlobDigest::new("list"));
    }

    #[test]
    fn restore_filter() {
        let mut manifests = BTreeMap::new();
        manifests.insert(BlobDigest::new("m1"), vec![BlobDigest::new("b1")]);
        let inventory = Inventory {
            user: "acme".into(),
            id: "1".into(),
            repositories: vec![
                RepositoryBackup {
                    name: "app".into(),
                    id: "2".into(),
                    manifests: manifests.clone(),
                },
                RepositoryBackup {
                    name: "web".into(),
                    id: "3".into(),
                    manifests,
                },
            ],
            summary: Summary::default(),
        };

        let plan = InventoryBuilder::from_inventory(&inventory, None);
        assert_eq!(plan.repository_count(), 2);
        assert_eq!(plan.tasks.len(), 1);

        let plan = InventoryBuilder::from_inventory(&inventory, Some("web"));
        assert_eq!(plan.repository_count(), 1);
        assert_eq!(plan.tasks[0].repository, "web");

        let plan = InventoryBuilder::from_inventory(&inventory, Some("nope"));
        assert_eq!(plan.repository_count(), 0);
        assert!(plan.tasks.is_empty());
    }
}
