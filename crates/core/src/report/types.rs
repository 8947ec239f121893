use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errorflow::{FailureContext, FailureKind, WorkerFailure, WorkerKind};

/// A stored worker failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    pub id: i64,
    pub repository_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    pub worker: WorkerKind,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Error report before it is stored
#[derive(Debug, Clone)]
pub struct NewErrorReport {
    pub repository_id: String,
    pub record_id: Option<i64>,
    pub worker: WorkerKind,
    pub kind: FailureKind,
    pub message: String,
    pub url: Option<String>,
}

impl NewErrorReport {
    pub fn from_failure(worker: WorkerKind, context: &FailureContext, failure: &WorkerFailure) -> Self {
        Self {
            repository_id: context.repository_id.clone(),
            record_id: context.record_id,
            worker,
            kind: failure.kind,
            message: failure.message.clone(),
            url: failure.url.clone(),
        }
    }
}
