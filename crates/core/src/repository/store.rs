//! Repository storage trait and types.

use std::fmt;

use super::{FailureTally, HarvestState, NewRepository, Repository};

/// Error type for repository operations.
#[derive(Debug)]
pub enum RepositoryError {
    /// Repository not found.
    NotFound(String),
    /// Repository already registered.
    AlreadyExists(String),
    /// Database error.
    Database(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::NotFound(id) => write!(f, "Repository not found: {}", id),
            RepositoryError::AlreadyExists(id) => write!(f, "Repository already exists: {}", id),
            RepositoryError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Filter for querying repositories.
#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    pub state: Option<HarvestState>,
    pub enabled: Option<bool>,
    pub harvest_requested: Option<bool>,
}

impl RepositoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: HarvestState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_harvest_requested(mut self, requested: bool) -> Self {
        self.harvest_requested = Some(requested);
        self
    }
}

/// Trait for repository storage backends.
///
/// Every state change is a conditional update: the returned `bool` tells
/// whether the expected source state matched and the change was applied.
pub trait RepositoryStore: Send + Sync {
    /// Register a repository in state IDLE.
    fn create(&self, request: NewRepository) -> Result<Repository, RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<Repository>, RepositoryError>;

    fn list(&self, filter: &RepositoryFilter) -> Result<Vec<Repository>, RepositoryError>;

    fn count(&self, filter: &RepositoryFilter) -> Result<i64, RepositoryError>;

    /// IDLE and enabled -> HARVESTING, clearing the harvest request.
    fn try_start_harvest(&self, id: &str) -> Result<bool, RepositoryError>;

    /// HARVESTING -> IDLE after a complete listing. Resets the failure
    /// counter, stamps the harvest time and advances the datestamp when one
    /// is given.
    fn finish_harvest(&self, id: &str, datestamp: Option<&str>) -> Result<bool, RepositoryError>;

    /// HARVESTING -> IDLE without touching the harvest time.
    fn abort_harvest(&self, id: &str) -> Result<bool, RepositoryError>;

    /// Count one consecutive failure. Reaching `threshold` moves the
    /// repository to PAUSED_ON_ERROR. A paused repository is left unchanged.
    fn increment_failures(&self, id: &str, threshold: u32)
        -> Result<FailureTally, RepositoryError>;

    /// Zero the failure counter unless the repository is paused.
    fn reset_failures(&self, id: &str) -> Result<(), RepositoryError>;

    /// PAUSED_ON_ERROR -> IDLE with the counter zeroed.
    fn resume(&self, id: &str) -> Result<bool, RepositoryError>;

    /// Flag an enabled, unpaused repository for harvesting.
    fn request_harvest(&self, id: &str) -> Result<bool, RepositoryError>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, RepositoryError>;

    /// Move every HARVESTING repository back to IDLE. Used at startup.
    fn reset_harvesting(&self) -> Result<usize, RepositoryError>;
}
