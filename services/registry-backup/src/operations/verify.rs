use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::Toolkit;
use crate::archive::{BackupNumber, NamespacePrefix};
use crate::digest::BlobDigest;
use crate::error::{BackupError, BackupResult};
use crate::inventory::{timestamp, Status};

const SAMPLE_SIZE: usize = 10;

/// Whether the backup covers every live blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerifyStatus {
    /// Every live blob is in the inventory.
    Complete,
    /// Some live blobs are not.
    Incomplete,
}

/// Live data counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerifyData {
    /// Distinct live blobs.
    pub blobs: String,
    /// Sum of the sizes of the distinct live blobs.
    pub bytes_seen: String,
}

/// Headline results of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerifySummary {
    /// When verification finished.
    pub completed: String,
    /// Inventory number compared against.
    pub inventory: String,
    /// Outcome.
    pub status: VerifyStatus,
    /// Live repositories with at least one blob.
    pub repositories_seen: String,
    /// Live manifests with at least one blob.
    pub manifests_seen: String,
    /// Live data counters.
    pub data: VerifyData,
}

/// Set differences between the live catalog and the inventory.
///
/// Example lists hold the lexicographically smallest digests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IncompleteDetails {
    /// Live blobs absent from the inventory.
    pub missing_blobs: usize,
    /// A sample of them.
    pub example_missing_blobs: Vec<BlobDigest>,
    /// Missing blobs which are not in the archive either.
    pub missing_in_archive: usize,
    /// A sample of them.
    pub example_missing_in_archive: Vec<BlobDigest>,
    /// Inventory blobs no longer live.
    pub extra_blobs: usize,
    /// A sample of them.
    pub example_extra_blobs: Vec<BlobDigest>,
}

/// Result of comparing an inventory against the live catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerifyReport {
    operation: &'static str,

    /// Namespace name.
    pub namespace: String,

    /// Headline results.
    #[serde(rename = "Verify Summary")]
    pub verify_summary: VerifySummary,

    /// Differences, present only when the backup is incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,

    /// Differences, whatever the outcome.
    #[serde(skip)]
    pub details: IncompleteDetails,

    /// Inventory number compared against.
    #[serde(skip)]
    pub backup_number: BackupNumber,
}

impl VerifyReport {
    /// Whether the backup covers every live blob.
    pub fn succeeded(&self) -> bool {
        self.verify_summary.status == VerifyStatus::Complete
    }

    /// The error describing an incomplete backup.
    pub fn failure(&self) -> Option<BackupError> {
        (!self.succeeded()).then(|| BackupError::Incomplete {
            missing: self.details.missing_blobs,
            number: self.backup_number,
        })
    }
}

fn sample<'a>(digests: impl IntoIterator<Item = &'a BlobDigest>) -> Vec<BlobDigest> {
    digests.into_iter().take(SAMPLE_SIZE).cloned().collect()
}

impl Toolkit {
    /// Compare an inventory (the latest by default) with the blobs the
    /// catalog currently references.
    #[tracing::instrument(skip(self), fields(namespace = name))]
    pub async fn verify(&self, name: &str, number: Option<BackupNumber>) -> BackupResult<VerifyReport> {
        tracing::info!("Starting verification for namespace: {name}");
        let namespace = self.namespace(name).await?;
        let prefix = NamespacePrefix::from(&namespace);

        let (number, inventory) = self.archive.load_inventory(&prefix, number).await?;
        if inventory.summary.status != Status::Success {
            tracing::warn!("Verifying backup with status: {}", inventory.summary.status);
        }
        tracing::info!(backup_number = number, "Loaded inventory from backup {number}");

        let rows = self.catalog.namespace_blobs(namespace.id).await?;
        let mut repositories = HashSet::new();
        let mut manifests = HashSet::new();
        let mut live: HashMap<BlobDigest, u64> = HashMap::new();
        for row in rows {
            repositories.insert(row.repository_id);
            manifests.insert(BlobDigest::new(&row.manifest_digest));
            live.entry(BlobDigest::new(&row.blob_digest)).or_insert(row.size);
        }
        let bytes: u64 = live.values().sum();

        let backed_up = inventory.blob_digests();
        let missing: BTreeSet<&BlobDigest> =
            live.keys().filter(|digest| !backed_up.contains(*digest)).collect();
        let extra: BTreeSet<&BlobDigest> =
            backed_up.iter().filter(|digest| !live.contains_key(*digest)).collect();

        let mut missing_in_archive = Vec::new();
        for digest in &missing {
            if !self.archive.blob_exists(&prefix, digest).await? {
                missing_in_archive.push(*digest);
            }
        }

        let details = IncompleteDetails {
            missing_blobs: missing.len(),
            example_missing_blobs: sample(missing.iter().copied()),
            missing_in_archive: missing_in_archive.len(),
            example_missing_in_archive: sample(missing_in_archive.iter().copied()),
            extra_blobs: extra.len(),
            example_extra_blobs: sample(extra.iter().copied()),
        };

        let status = if missing.is_empty() {
            VerifyStatus::Complete
        } else {
            tracing::warn!("{} live blobs are missing from backup {number}", missing.len());
            VerifyStatus::Incomplete
        };

        Ok(VerifyReport {
            operation: "Verify",
            namespace: namespace.name,
            verify_summary: VerifySummary {
                completed: timestamp(),
                inventory: number.to_string(),
                status,
                repositories_seen: repositories.len().to_string(),
                manifests_seen: manifests.len().to_string(),
                data: VerifyData {
                    blobs: live.len().to_string(),
                    bytes_seen: bytes.to_string(),
                },
            },
            incomplete_details: (status == VerifyStatus::Incomplete).then(|| details.clone()),
            details,
            backup_number: number,
        })
    }
}
