use thiserror::Error;

use super::{ErrorReport, NewErrorReport};
use crate::errorflow::{FailureKind, WorkerKind};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Filter for querying error reports
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub repository_id: Option<String>,
    pub record_id: Option<i64>,
    pub worker: Option<WorkerKind>,
    pub kind: Option<FailureKind>,
    pub limit: i64,
    pub offset: i64,
}

impl ReportFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_repository(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = Some(repository_id.into());
        self
    }

    pub fn with_record(mut self, record_id: i64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn with_worker(mut self, worker: WorkerKind) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = Some(kind);
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

/// Trait for error report storage
pub trait ReportStore: Send + Sync {
    /// Insert a report, returns the assigned ID
    fn insert(&self, report: &NewErrorReport) -> Result<i64, ReportError>;

    /// Newest reports first
    fn query(&self, filter: &ReportFilter) -> Result<Vec<ErrorReport>, ReportError>;

    /// Count matching reports
    fn count(&self, filter: &ReportFilter) -> Result<i64, ReportError>;
}
