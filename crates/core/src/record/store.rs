//! Record storage trait and types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::{BatchOutcome, ProcessStatus, Record, RecordBatch, StatusCounts};

/// Error type for record operations.
#[derive(Debug)]
pub enum RecordError {
    /// Record not found.
    NotFound(i64),
    /// A worker asked for a status change the lifecycle does not allow.
    InvalidTransition {
        record_id: i64,
        to: ProcessStatus,
    },
    /// Database error.
    Database(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::NotFound(id) => write!(f, "Record not found: {}", id),
            RecordError::InvalidTransition { record_id, to } => {
                write!(f, "Record {} cannot move to {}", record_id, to)
            }
            RecordError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RecordError {}

/// Filter for querying records.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    pub repository_id: Option<String>,
    pub status: Option<ProcessStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordFilter {
    pub fn new() -> Self {
        Self {
            repository_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_repository(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = Some(repository_id.into());
        self
    }

    pub fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for record storage backends.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: i64) -> Result<Option<Record>, RecordError>;

    fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>, RecordError>;

    /// Count records matching the filter, ignoring limit and offset.
    fn count(&self, filter: &RecordFilter) -> Result<i64, RecordError>;

    /// Existing records keyed by fingerprint.
    fn find_by_fingerprints(
        &self,
        fingerprints: &[String],
    ) -> Result<HashMap<String, Record>, RecordError>;

    /// Apply inserts and withdrawals in one transaction. Inserting a
    /// fingerprint that already exists is a no-op. Withdrawals skip records
    /// that are PROCESSING or already REJECTED.
    fn apply_batch(&self, batch: &RecordBatch) -> Result<BatchOutcome, RecordError>;

    /// Records ready for a download attempt, skipping the given repositories.
    /// PENDING records come first, oldest first. FAILED records follow once
    /// their last update is older than `retry_failed_before`.
    fn next_claimable(
        &self,
        limit: usize,
        excluded_repositories: &[String],
        retry_failed_before: DateTime<Utc>,
    ) -> Result<Vec<Record>, RecordError>;

    /// PENDING or FAILED -> PROCESSING. False when the record was in neither.
    fn claim(&self, id: i64) -> Result<bool, RecordError>;

    /// PROCESSING -> `status`. False when the record was no longer processing.
    fn finish(
        &self,
        id: i64,
        status: ProcessStatus,
        error_detail: Option<&str>,
    ) -> Result<bool, RecordError>;

    /// Operator reset of one record to PENDING. PROCESSING records are left alone.
    fn reset(&self, id: i64) -> Result<bool, RecordError>;

    /// FAILED -> PENDING for a whole repository.
    fn reset_failed(&self, repository_id: &str) -> Result<usize, RecordError>;

    /// Every PROCESSING record back to PENDING. Used at startup.
    fn reset_processing(&self) -> Result<usize, RecordError>;

    fn status_counts(&self, repository_id: Option<&str>) -> Result<StatusCounts, RecordError>;
}
