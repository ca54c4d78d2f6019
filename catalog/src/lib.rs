//! # Registry catalog
//!
//! Read-only queries against the registry's metadata database: which
//! repositories a namespace owns, which manifests they hold, and which blobs
//! those manifests reference.

use std::{fmt, ops::Deref, sync::Arc};

mod error;
mod memory;
mod model;
#[cfg(feature = "postgres")]
mod postgres;

pub use error::CatalogError;
pub use memory::MemoryCatalog;
pub use model::{BlobRecord, Manifest, Namespace, NamespaceBlob, Repository};
#[cfg(feature = "postgres")]
pub use postgres::PgCatalog;

/// Read access to the registry catalog.
///
/// Every listing is returned in a stable order, so two walks over an
/// unchanged catalog visit rows identically.
#[async_trait::async_trait]
pub trait Catalog: fmt::Debug + Send + Sync {
    /// Look up a namespace (user or organization) by name.
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, CatalogError>;

    /// Repositories in the normal state owned by a namespace, ordered by name.
    async fn repositories(&self, namespace_id: i64) -> Result<Vec<Repository>, CatalogError>;

    /// Manifests stored in a repository, ordered by id.
    async fn manifests(&self, repository_id: i64) -> Result<Vec<Manifest>, CatalogError>;

    /// Blobs referenced directly by a manifest, in blob index order.
    ///
    /// Blobs which are still uploading are excluded.
    async fn manifest_blobs(&self, manifest_id: i64) -> Result<Vec<BlobRecord>, CatalogError>;

    /// Child manifests of a manifest list, ordered by id.
    async fn manifest_children(&self, manifest_id: i64) -> Result<Vec<Manifest>, CatalogError>;

    /// Every live repository/manifest/blob row for a namespace.
    async fn namespace_blobs(&self, namespace_id: i64)
        -> Result<Vec<NamespaceBlob>, CatalogError>;
}

#[async_trait::async_trait]
impl<C> Catalog for Arc<C>
where
    C: ?Sized + Catalog + 'static,
{
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, CatalogError> {
        self.deref().namespace(name).await
    }

    async fn repositories(&self, namespace_id: i64) -> Result<Vec<Repository>, CatalogError> {
        self.deref().repositories(namespace_id).await
    }

    async fn manifests(&self, repository_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        self.deref().manifests(repository_id).await
    }

    async fn manifest_blobs(&self, manifest_id: i64) -> Result<Vec<BlobRecord>, CatalogError> {
        self.deref().manifest_blobs(manifest_id).await
    }

    async fn manifest_children(&self, manifest_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        self.deref().manifest_children(manifest_id).await
    }

    async fn namespace_blobs(
        &self,
        namespace_id: i64,
    ) -> Result<Vec<NamespaceBlob>, CatalogError> {
        self.deref().namespace_blobs(namespace_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Catalog);
}
