//! Manifest finalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::METADATA_FILE;

/// Identity of the object being finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub repository_id: String,
    pub record_id: i64,
    pub identifier: String,
    pub object_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub name: String,
    pub size_bytes: u64,
    pub md5: String,
    pub sha256: String,
}

/// Description of an archived object, written next to it as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub object_id: String,
    pub repository_id: String,
    pub record_id: i64,
    pub identifier: String,
    pub files: Vec<ManifestFile>,
    pub created_at: DateTime<Utc>,
}

/// Result of finalizing an object.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub accept: bool,
    /// Why the object was not accepted.
    pub reason: Option<String>,
    pub manifest: Manifest,
}

/// Validates a transformed object and describes it.
///
/// An object is accepted when it is non-empty and mentions the identifier it
/// was fetched for.
#[derive(Debug, Clone, Default)]
pub struct ManifestFinalizer;

impl ManifestFinalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn finalize(&self, transformed: &[u8], metadata: &ManifestMetadata) -> Finalized {
        let reason = if transformed.is_empty() {
            Some("transformed object is empty".to_string())
        } else if !contains(transformed, metadata.identifier.as_bytes()) {
            Some(format!(
                "object does not reference identifier {}",
                metadata.identifier
            ))
        } else {
            None
        };

        let manifest = Manifest {
            object_id: metadata.object_id.clone(),
            repository_id: metadata.repository_id.clone(),
            record_id: metadata.record_id,
            identifier: metadata.identifier.clone(),
            files: vec![ManifestFile {
                name: METADATA_FILE.to_string(),
                size_bytes: transformed.len() as u64,
                md5: format!("{:x}", md5::compute(transformed)),
                sha256: format!("{:x}", Sha256::digest(transformed)),
            }],
            created_at: Utc::now(),
        };

        Finalized {
            accept: reason.is_none(),
            reason,
            manifest,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
