use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::{BlobRecord, Catalog, CatalogError, Manifest, Namespace, NamespaceBlob, Repository};

#[derive(Debug)]
struct RepositoryRow {
    namespace_id: i64,
    repository: Repository,
    deleted: bool,
}

#[derive(Debug)]
struct ManifestRow {
    repository_id: i64,
    manifest: Manifest,
}

#[derive(Debug)]
struct BlobRow {
    manifest_id: i64,
    blob: BlobRecord,
    uploading: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    unavailable: bool,
    namespaces: Vec<Namespace>,
    repositories: Vec<RepositoryRow>,
    manifests: Vec<ManifestRow>,
    blobs: Vec<BlobRow>,
    children: Vec<(i64, i64)>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self) -> Result<(), CatalogError> {
        if self.unavailable {
            return Err(CatalogError::Unavailable("memory catalog marked unavailable".into()));
        }
        Ok(())
    }

    fn manifest(&self, id: i64) -> Option<&Manifest> {
        self.manifests
            .iter()
            .find(|row| row.manifest.id == id)
            .map(|row| &row.manifest)
    }
}

/// An in-memory catalog, populated through its builder methods.
///
/// Ids are allocated from one counter shared by every table, so insertion
/// order is also id order.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace, returning its id.
    pub fn add_namespace(&self, name: &str, organization: bool) -> i64 {
        let mut state = self.state.write();
        let id = state.id();
        state.namespaces.push(Namespace {
            id,
            name: name.to_string(),
            organization,
        });
        id
    }

    /// Add a repository to a namespace, returning its id.
    pub fn add_repository(&self, namespace_id: i64, name: &str) -> i64 {
        let mut state = self.state.write();
        let id = state.id();
        state.repositories.push(RepositoryRow {
            namespace_id,
            repository: Repository {
                id,
                name: name.to_string(),
            },
            deleted: false,
        });
        id
    }

    /// Mark a repository as no longer in the normal state.
    pub fn delete_repository(&self, repository_id: i64) {
        let mut state = self.state.write();
        for row in state
            .repositories
            .iter_mut()
            .filter(|row| row.repository.id == repository_id)
        {
            row.deleted = true;
        }
    }

    /// Add a manifest to a repository, returning its id.
    pub fn add_manifest(&self, repository_id: i64, digest: &str, media_type: Option<&str>) -> i64 {
        let mut state = self.state.write();
        let id = state.id();
        state.manifests.push(ManifestRow {
            repository_id,
            manifest: Manifest {
                id,
                digest: digest.to_string(),
                media_type: media_type.map(str::to_string),
            },
        });
        id
    }

    /// Reference a blob from a manifest. Blob index follows call order.
    pub fn add_blob(&self, manifest_id: i64, digest: &str, size: u64) {
        self.push_blob(manifest_id, digest, size, false);
    }

    /// Reference a blob whose upload has not finished.
    pub fn add_uploading_blob(&self, manifest_id: i64, digest: &str, size: u64) {
        self.push_blob(manifest_id, digest, size, true);
    }

    fn push_blob(&self, manifest_id: i64, digest: &str, size: u64, uploading: bool) {
        self.state.write().blobs.push(BlobRow {
            manifest_id,
            blob: BlobRecord {
                digest: digest.to_string(),
                size,
            },
            uploading,
        });
    }

    /// Drop every reference from a manifest to a blob digest.
    pub fn remove_blob(&self, manifest_id: i64, digest: &str) {
        self.state
            .write()
            .blobs
            .retain(|row| !(row.manifest_id == manifest_id && row.blob.digest == digest));
    }

    /// Record `child_id` as a child of the manifest list `parent_id`.
    pub fn add_child(&self, parent_id: i64, child_id: i64) {
        self.state.write().children.push((parent_id, child_id));
    }

    /// Make every query fail, to simulate a database outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }
}

#[async_trait::async_trait]
impl Catalog for MemoryCatalog {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, CatalogError> {
        let state = self.state.read();
        state.check()?;
        Ok(state.namespaces.iter().find(|ns| ns.name == name).cloned())
    }

    async fn repositories(&self, namespace_id: i64) -> Result<Vec<Repository>, CatalogError> {
        let state = self.state.read();
        state.check()?;
        let mut repositories: Vec<Repository> = state
            .repositories
            .iter()
            .filter(|row| row.namespace_id == namespace_id && !row.deleted)
            .map(|row| row.repository.clone())
            .collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn manifests(&self, repository_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        let state = self.state.read();
        state.check()?;
        let mut manifests: Vec<Manifest> = state
            .manifests
            .iter()
            .filter(|row| row.repository_id == repository_id)
            .map(|row| row.manifest.clone())
            .collect();
        manifests.sort_by_key(|manifest| manifest.id);
        Ok(manifests)
    }

    async fn manifest_blobs(&self, manifest_id: i64) -> Result<Vec<BlobRecord>, CatalogError> {
        let state = self.state.read();
        state.check()?;
        Ok(state
            .blobs
            .iter()
            .filter(|row| row.manifest_id == manifest_id && !row.uploading)
            .map(|row| row.blob.clone())
            .collect())
    }

    async fn manifest_children(&self, manifest_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        let state = self.state.read();
        state.check()?;
        let mut children: Vec<Manifest> = state
            .children
            .iter()
            .filter(|(parent, _)| *parent == manifest_id)
            .filter_map(|(_, child)| state.manifest(*child).cloned())
            .collect();
        children.sort_by_key(|manifest| manifest.id);
        Ok(children)
    }

    async fn namespace_blobs(
        &self,
        namespace_id: i64,
    ) -> Result<Vec<NamespaceBlob>, CatalogError> {
        let state = self.state.read();
        state.check()?;

        let mut rows = BTreeSet::new();
        for repo in state
            .repositories
            .iter()
            .filter(|row| row.namespace_id == namespace_id && !row.deleted)
        {
            for manifest in state
                .manifests
                .iter()
                .filter(|row| row.repository_id == repo.repository.id)
            {
                for blob in state
                    .blobs
                    .iter()
                    .filter(|row| row.manifest_id == manifest.manifest.id && !row.uploading)
                {
                    rows.insert((
                        repo.repository.name.clone(),
                        manifest.manifest.digest.clone(),
                        blob.blob.digest.clone(),
                        repo.repository.id,
                        manifest.manifest.id,
                        blob.blob.size,
                    ));
                }
            }
        }

        Ok(rows
            .into_iter()
            .map(
                |(repository_name, manifest_digest, blob_digest, repository_id, manifest_id, size)| {
                    NamespaceBlob {
                        repository_id,
                        repository_name,
                        manifest_id,
                        manifest_digest,
                        blob_digest,
                        size,
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> (MemoryCatalog, i64) {
        let catalog = MemoryCatalog::new();
        let ns = catalog.add_namespace("acme", true);
        let web = catalog.add_repository(ns, "web");
        let app = catalog.add_repository(ns, "app");

        let m1 = catalog.add_manifest(app, "sha256:m1", None);
        catalog.add_blob(m1, "sha256:b2", 20);
        catalog.add_blob(m1, "sha256:b1", 10);
        catalog.add_uploading_blob(m1, "sha256:partial", 5);

        let m2 = catalog.add_manifest(web, "sha256:m2", None);
        catalog.add_blob(m2, "sha256:b1", 10);
        (catalog, ns)
    }

    #[tokio::test]
    async fn repositories_are_sorted_by_name() {
        let (catalog, ns) = catalog();
        let names: Vec<String> = catalog
            .repositories(ns)
            .await
            .unwrap()
            .into_iter()
            .map(|repo| repo.name)
            .collect();
        assert_eq!(names, vec!["app", "web"]);
    }

    #[tokio::test]
    async fn manifest_blobs_keep_index_order_and_skip_uploads() {
        let (catalog, ns) = catalog();
        let app = catalog.repositories(ns).await.unwrap()[0].id;
        let manifest = catalog.manifests(app).await.unwrap()[0].id;
        let digests: Vec<String> = catalog
            .manifest_blobs(manifest)
            .await
            .unwrap()
            .into_iter()
            .map(|blob| blob.digest)
            .collect();
        assert_eq!(digests, vec!["sha256:b2", "sha256:b1"]);
    }

    #[tokio::test]
    async fn namespace_blobs_cover_every_repository() {
        let (catalog, ns) = catalog();
        let rows = catalog.namespace_blobs(ns).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].repository_name, "app");
        assert_eq!(rows[2].repository_name, "web");
    }

    #[tokio::test]
    async fn unavailable_catalog_fails_queries() {
        let (catalog, _) = catalog();
        catalog.set_unavailable(true);
        assert!(matches!(
            catalog.namespace("acme").await,
            Err(CatalogError::Unavailable(_))
        ));
    }
}
