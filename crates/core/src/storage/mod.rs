//! The PROCESSING / DONE / REJECTED storage areas.

mod error;
mod fs_storage;

pub use error::StorageError;
pub use fs_storage::FileStorage;

use serde::{Deserialize, Serialize};

/// Transformed object file inside an object directory.
pub const METADATA_FILE: &str = "metadata.xml";
/// Manifest file inside an object directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Untransformed response kept for rejected objects.
pub const ORIGINAL_FILE: &str = "original.xml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageArea {
    Processing,
    Done,
    Rejected,
}

impl StorageArea {
    pub const ALL: [StorageArea; 3] = [
        StorageArea::Processing,
        StorageArea::Done,
        StorageArea::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Processing => "processing",
            StorageArea::Done => "done",
            StorageArea::Rejected => "rejected",
        }
    }
}
