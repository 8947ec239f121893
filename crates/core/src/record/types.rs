//! Record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Processing status of a harvested record.
///
/// Records move PENDING -> PROCESSING -> {DONE, FAILED, REJECTED}. Going back
/// to PENDING is only possible through an explicit reset or startup recovery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Rejected,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 5] = [
        ProcessStatus::Pending,
        ProcessStatus::Processing,
        ProcessStatus::Done,
        ProcessStatus::Failed,
        ProcessStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Processing => "processing",
            ProcessStatus::Done => "done",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Rejected => "rejected",
        }
    }

    /// Outcome of a processing attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Done | ProcessStatus::Failed | ProcessStatus::Rejected
        )
    }

    /// Whether a worker may move a record from `self` to `next`.
    /// FAILED records may be claimed again for a retry.
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        match self {
            ProcessStatus::Pending | ProcessStatus::Failed => next == ProcessStatus::Processing,
            ProcessStatus::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessStatus::Pending),
            "processing" => Ok(ProcessStatus::Processing),
            "done" => Ok(ProcessStatus::Done),
            "failed" => Ok(ProcessStatus::Failed),
            "rejected" => Ok(ProcessStatus::Rejected),
            other => Err(format!("unknown process status: {}", other)),
        }
    }
}

/// One harvested object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: i64,
    pub repository_id: String,
    /// OAI identifier as listed by the repository.
    pub identifier: String,
    /// Generated id used for the object's storage directory.
    pub object_id: String,
    /// Stable dedup key, see [`fingerprint`].
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datestamp: Option<String>,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Header entry from a ListIdentifiers page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestedEntry {
    pub identifier: String,
    pub datestamp: Option<String>,
    /// Header carried `status="deleted"`.
    pub deleted: bool,
}

impl HarvestedEntry {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_datestamp(mut self, datestamp: impl Into<String>) -> Self {
        self.datestamp = Some(datestamp.into());
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Record to insert as PENDING.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub repository_id: String,
    pub identifier: String,
    pub object_id: String,
    pub fingerprint: String,
    pub datestamp: Option<String>,
}

/// Changes computed from one ListIdentifiers page, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub inserts: Vec<NewRecord>,
    /// Records whose source entry was deleted.
    pub withdrawals: Vec<i64>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.withdrawals.is_empty()
    }
}

/// What a batch actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    /// Ids of the records the batch moved to REJECTED.
    pub withdrawn: Vec<i64>,
}

/// A record rejected because its source entry was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub record_id: i64,
    pub identifier: String,
    pub object_id: String,
}

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    pub rejected: i64,
}

impl StatusCounts {
    pub fn get(&self, status: ProcessStatus) -> i64 {
        match status {
            ProcessStatus::Pending => self.pending,
            ProcessStatus::Processing => self.processing,
            ProcessStatus::Done => self.done,
            ProcessStatus::Failed => self.failed,
            ProcessStatus::Rejected => self.rejected,
        }
    }

    pub(crate) fn set(&mut self, status: ProcessStatus, count: i64) {
        match status {
            ProcessStatus::Pending => self.pending = count,
            ProcessStatus::Processing => self.processing = count,
            ProcessStatus::Done => self.done = count,
            ProcessStatus::Failed => self.failed = count,
            ProcessStatus::Rejected => self.rejected = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.done + self.failed + self.rejected
    }
}

/// Dedup key of an identifier within a repository (hex SHA-256).
pub fn fingerprint(repository_id: &str, identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}
