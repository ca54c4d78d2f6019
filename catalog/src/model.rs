use serde::Serialize;

/// A registry namespace: a user or an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    /// Database id.
    pub id: i64,

    /// Namespace name.
    pub name: String,

    /// Whether the namespace is an organization rather than a user.
    pub organization: bool,
}

/// A repository inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    /// Database id.
    pub id: i64,

    /// Repository name, without the namespace.
    pub name: String,
}

/// A stored manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// Database id.
    pub id: i64,

    /// Manifest digest, as recorded by the registry.
    pub digest: String,

    /// Manifest media type, when known.
    pub media_type: Option<String>,
}

/// A blob referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobRecord {
    /// Content digest, as recorded by the registry.
    pub digest: String,

    /// Size in bytes.
    pub size: u64,
}

/// One row of the flattened namespace → repository → manifest → blob join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceBlob {
    /// Repository id.
    pub repository_id: i64,

    /// Repository name.
    pub repository_name: String,

    /// Manifest id.
    pub manifest_id: i64,

    /// Manifest digest.
    pub manifest_digest: String,

    /// Blob digest.
    pub blob_digest: String,

    /// Blob size in bytes.
    pub size: u64,
}
