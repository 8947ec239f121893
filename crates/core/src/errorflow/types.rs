//! Failure classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::fetcher::FetchError;

/// Which worker kind produced a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Identifier,
    Object,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Identifier => "identifier",
            WorkerKind::Object => "object",
        }
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identifier" => Ok(WorkerKind::Identifier),
            "object" => Ok(WorkerKind::Object),
            other => Err(format!("unknown worker kind: {}", other)),
        }
    }
}

/// Category of a worker failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection problems, timeouts talking to the source, 5xx answers.
    TransientNetwork,
    /// The source answered with something that is not a usable OAI-PMH response.
    Protocol,
    /// The content of one record is unacceptable.
    Validation,
    /// Local filesystem or database trouble.
    Storage,
    /// The worker exceeded its wall-clock budget.
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::Protocol => "protocol",
            FailureKind::Validation => "validation",
            FailureKind::Storage => "storage",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient_network" => Ok(FailureKind::TransientNetwork),
            "protocol" => Ok(FailureKind::Protocol),
            "validation" => Ok(FailureKind::Validation),
            "storage" => Ok(FailureKind::Storage),
            "timeout" => Ok(FailureKind::Timeout),
            other => Err(format!("unknown failure kind: {}", other)),
        }
    }
}

/// A classified failure reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub message: String,
    /// URL being fetched when the failure happened, if any.
    pub url: Option<String>,
}

impl WorkerFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientNetwork, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Storage, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Classify a fetch error. Client errors other than 408 and 429 mean the
    /// source rejected the request itself.
    pub fn from_fetch(error: &FetchError) -> Self {
        let kind = match error {
            FetchError::Http { status, .. }
                if (400..500).contains(status) && *status != 408 && *status != 429 =>
            {
                FailureKind::Protocol
            }
            _ => FailureKind::TransientNetwork,
        };
        let failure = Self::new(kind, error.to_string());
        match error.url() {
            Some(url) => failure.with_url(url),
            None => failure,
        }
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What the caller should do after a failure was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep going; the failure was counted.
    Continue,
    /// Only this record is bad; the repository counter is untouched.
    RecordRejected,
    /// The repository crossed its threshold and is now paused.
    PauseRepository,
}

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    pub repository_id: String,
    pub record_id: Option<i64>,
}

impl FailureContext {
    pub fn repository(repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            record_id: None,
        }
    }

    pub fn record(repository_id: impl Into<String>, record_id: i64) -> Self {
        Self {
            repository_id: repository_id.into(),
            record_id: Some(record_id),
        }
    }
}
