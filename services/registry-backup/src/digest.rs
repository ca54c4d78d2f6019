//! Normalized blob digests and the paths derived from them.

use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content digest with any `algorithm:` prefix removed.
///
/// `sha256:deadbeef` and `deadbeef` compare, hash and map to paths identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BlobDigest(String);

impl BlobDigest {
    /// Normalize a digest as recorded by the registry.
    pub fn new(raw: &str) -> Self {
        let hex = raw.split_once(':').map_or(raw, |(_, hex)| hex);
        Self(hex.to_string())
    }

    /// The bare digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fan-out directory: the first two characters of the digest.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }

    /// Path of the blob in the registry's content-addressed storage.
    pub fn cas_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("sha256/{}/{}", self.shard(), self.0))
    }

    /// Whether this looks like a full hex SHA-256, which can be checked
    /// against content.
    pub fn is_sha256(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Check `data` against this digest.
    ///
    /// Returns the computed digest on mismatch. Digests which are not full
    /// SHA-256 values are not checked.
    pub fn verify(&self, data: &[u8]) -> Result<(), String> {
        if !self.is_sha256() {
            return Ok(());
        }

        let computed = hex::encode(Sha256::digest(data));
        if computed.eq_ignore_ascii_case(&self.0) {
            Ok(())
        } else {
            Err(computed)
        }
    }
}

impl From<String> for BlobDigest {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for BlobDigest {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<BlobDigest> for String {
    fn from(value: BlobDigest) -> Self {
        value.0
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_ignored() {
        assert_eq!(BlobDigest::new("sha256:deadbeef"), BlobDigest::new("deadbeef"));
        assert_eq!(
            BlobDigest::new("sha256:deadbeef").cas_path(),
            BlobDigest::new("deadbeef").cas_path()
        );
        assert_eq!(BlobDigest::new("deadbeef").cas_path().as_str(), "sha256/de/deadbeef");
    }

    #[test]
    fn short_digest_shard() {
        assert_eq!(BlobDigest::new("a").shard(), "a");
        assert_eq!(BlobDigest::new("sha256:b1").shard(), "b1");
    }

    #[test]
    fn deserialize_normalizes() {
        let digests: Vec<BlobDigest> =
            serde_json::from_str(r#"["sha256:abc", "abc"]"#).unwrap();
        assert_eq!(digests[0], digests[1]);
        assert_eq!(serde_json::to_string(&digests[0]).unwrap(), r#""abc""#);
    }

    #[test]
    fn verify_content() {
        let data = b"layer";
        let digest = BlobDigest::new(&hex::encode(Sha256::digest(data)));
        assert!(digest.is_sha256());
        assert!(digest.verify(data).is_ok());
        assert!(digest.verify(b"other").is_err());

        assert!(BlobDigest::new("b1").verify(b"anything").is_ok());
    }

    #[test]
    fn every_constructor_normalizes_alike() {
        for raw in ["sha256:ab", "ab", "sha256:ab:cd", ""] {
            let expected = BlobDigest::new(raw);
            assert_eq!(BlobDigest::from(raw.to_string()), expected, "{raw:?}");
            assert_eq!(BlobDigest::from(raw), expected, "{raw:?}");

            let parsed: BlobDigest = serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(parsed, expected, "{raw:?}");
        }
    }
}
