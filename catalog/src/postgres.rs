use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{BlobRecord, Catalog, CatalogError, Manifest, Namespace, NamespaceBlob, Repository};

/// Catalog backed by the registry's PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connect to the database at `url`.
    #[tracing::instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        tracing::debug!("connected to registry database");
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn size(value: Option<i64>) -> Result<u64, CatalogError> {
    let value = value.unwrap_or(0);
    u64::try_from(value).map_err(|_| CatalogError::InvalidRow(format!("negative blob size {value}")))
}

#[async_trait::async_trait]
impl Catalog for PgCatalog {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, CatalogError> {
        let row: Option<(i64, String, bool)> = sqlx::query_as(
            r#"SELECT id::bigint, username, organization
            FROM "user"
            WHERE username = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, organization)| Namespace {
            id,
            name,
            organization,
        }))
    }

    async fn repositories(&self, namespace_id: i64) -> Result<Vec<Repository>, CatalogError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id::bigint, name
            FROM repository
            WHERE namespace_user_id = $1
            AND state = 0
            ORDER BY name",
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| Repository { id, name })
            .collect())
    }

    async fn manifests(&self, repository_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
            "SELECT m.id::bigint, m.digest, mt.name
            FROM manifest m
            LEFT JOIN mediatype mt ON m.media_type_id = mt.id
            WHERE m.repository_id = $1
            ORDER BY m.id",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, digest, media_type)| Manifest {
                id,
                digest,
                media_type,
            })
            .collect())
    }

    async fn manifest_blobs(&self, manifest_id: i64) -> Result<Vec<BlobRecord>, CatalogError> {
        let rows: Vec<(Option<String>, Option<i64>)> = sqlx::query_as(
            "SELECT ist.content_checksum, ist.image_size
            FROM manifestblob mb
            JOIN imagestorage ist ON mb.blob_id = ist.id
            WHERE mb.manifest_id = $1
            AND ist.uploading = false
            ORDER BY mb.blob_index",
        )
        .bind(manifest_id)
        .fetch_all(&self.pool)
        .await?;

        let mut blobs = Vec::with_capacity(rows.len());
        for (digest, image_size) in rows {
            let Some(digest) = digest else {
                tracing::warn!(manifest_id, "skipping blob without a content checksum");
                continue;
            };
            blobs.push(BlobRecord {
                digest,
                size: size(image_size)?,
            });
        }
        Ok(blobs)
    }

    async fn manifest_children(&self, manifest_id: i64) -> Result<Vec<Manifest>, CatalogError> {
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
            "SELECT cm.id::bigint, cm.digest, mt.name
            FROM manifest cm
            JOIN manifestchild mc ON cm.id = mc.child_manifest_id
            LEFT JOIN mediatype mt ON cm.media_type_id = mt.id
            WHERE mc.manifest_id = $1
            ORDER BY cm.id",
        )
        .bind(manifest_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, digest, media_type)| Manifest {
                id,
                digest,
                media_type,
            })
            .collect())
    }

    async fn namespace_blobs(
        &self,
        namespace_id: i64,
    ) -> Result<Vec<NamespaceBlob>, CatalogError> {
        let rows: Vec<(i64, String, i64, String, Option<String>, Option<i64>)> = sqlx::query_as(
            r#"SELECT DISTINCT
                r.id::bigint,
                r.name,
                m.id::bigint,
                m.digest,
                ist.content_checksum,
                ist.image_size
            FROM "user" u
            JOIN repository r ON u.id = r.namespace_user_id
            JOIN manifest m ON r.id = m.repository_id
            JOIN manifestblob mb ON m.id = mb.manifest_id
            JOIN imagestorage ist ON mb.blob_id = ist.id
            WHERE u.id = $1
            AND r.state = 0
            AND ist.uploading = false
            ORDER BY r.name, m.digest, ist.content_checksum"#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await?;

        let mut blobs = Vec::with_capacity(rows.len());
        for (repository_id, repository_name, manifest_id, manifest_digest, digest, image_size) in
            rows
        {
            let Some(blob_digest) = digest else {
                continue;
            };
            blobs.push(NamespaceBlob {
                repository_id,
                repository_name,
                manifest_id,
                manifest_digest,
                blob_digest,
                size: size(image_size)?,
            });
        }
        Ok(blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(size(None).unwrap(), 0);
        assert_eq!(size(Some(42)).unwrap(), 42);
        assert!(matches!(size(Some(-1)), Err(CatalogError::InvalidRow(_))));
    }
}
