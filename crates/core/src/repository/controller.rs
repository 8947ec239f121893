//! Repository harvest lifecycle.
//!
//! All transitions go through the store's conditional updates, so two callers
//! racing to start the same repository cannot both win.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{FailureTally, HarvestState, Repository, RepositoryError, RepositoryStore};
use crate::notify::{Notification, Notifier};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Repository {0} is already harvesting")]
    AlreadyHarvesting(String),

    #[error("Repository {0} is paused on error")]
    Paused(String),

    #[error("Repository {0} is disabled")]
    Disabled(String),

    #[error("Repository {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: HarvestState,
        expected: HarvestState,
    },

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Drives repository state transitions and announces them.
pub struct RepositoryController {
    store: Arc<dyn RepositoryStore>,
    notifier: Notifier,
}

impl RepositoryController {
    pub fn new(store: Arc<dyn RepositoryStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<dyn RepositoryStore> {
        &self.store
    }

    /// IDLE -> HARVESTING. Returns the repository as it is after the change.
    pub fn start_harvest(&self, id: &str) -> Result<Repository, ControllerError> {
        if self.store.try_start_harvest(id)? {
            info!(repository_id = %id, "Harvest started");
            return self.announce(id);
        }

        // Explain why the start was refused
        let repo = self.require(id)?;
        Err(match repo.state {
            HarvestState::Harvesting => ControllerError::AlreadyHarvesting(repo.id),
            HarvestState::PausedOnError => ControllerError::Paused(repo.id),
            HarvestState::Idle if !repo.enabled => ControllerError::Disabled(repo.id),
            // Lost a race with another caller that has since finished
            HarvestState::Idle => ControllerError::AlreadyHarvesting(repo.id),
        })
    }

    /// HARVESTING -> IDLE after a complete listing.
    pub fn complete_harvest(
        &self,
        id: &str,
        datestamp: Option<&str>,
    ) -> Result<(), ControllerError> {
        if self.store.finish_harvest(id, datestamp)? {
            info!(repository_id = %id, "Harvest completed");
        } else {
            // Paused by a concurrent failure or reset at startup
            debug!(repository_id = %id, "Harvest completion found repository not harvesting");
        }
        self.announce(id)?;
        Ok(())
    }

    /// HARVESTING -> IDLE without recording a harvest. A no-op when the
    /// repository was already paused.
    pub fn abort_harvest(&self, id: &str) -> Result<(), ControllerError> {
        if self.store.abort_harvest(id)? {
            debug!(repository_id = %id, "Harvest aborted");
        }
        self.announce(id)?;
        Ok(())
    }

    /// Count one consecutive failure against `threshold`.
    pub fn record_failure(&self, id: &str, threshold: u32) -> Result<FailureTally, ControllerError> {
        let tally = self.store.increment_failures(id, threshold)?;
        if tally.paused_now {
            warn!(
                repository_id = %id,
                failures = tally.consecutive_failures,
                "Repository paused on error"
            );
        }
        self.announce(id)?;
        Ok(tally)
    }

    pub fn record_success(&self, id: &str) -> Result<(), ControllerError> {
        self.store.reset_failures(id)?;
        Ok(())
    }

    /// Operator resume: PAUSED_ON_ERROR -> IDLE with the counter zeroed.
    pub fn resume(&self, id: &str) -> Result<Repository, ControllerError> {
        if !self.store.resume(id)? {
            let repo = self.require(id)?;
            return Err(ControllerError::InvalidState {
                id: repo.id,
                state: repo.state,
                expected: HarvestState::PausedOnError,
            });
        }
        info!(repository_id = %id, "Repository resumed");
        self.announce(id)
    }

    /// Ask for a harvest on the next identifier daemon tick.
    pub fn request_harvest(&self, id: &str) -> Result<Repository, ControllerError> {
        if !self.store.request_harvest(id)? {
            let repo = self.require(id)?;
            return Err(if !repo.enabled {
                ControllerError::Disabled(repo.id)
            } else {
                ControllerError::Paused(repo.id)
            });
        }
        debug!(repository_id = %id, "Harvest requested");
        self.announce(id)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Repository, ControllerError> {
        if !self.store.set_enabled(id, enabled)? {
            return Err(ControllerError::NotFound(id.to_string()));
        }
        info!(repository_id = %id, enabled, "Repository enablement changed");
        self.announce(id)
    }

    fn require(&self, id: &str) -> Result<Repository, ControllerError> {
        self.store
            .get(id)?
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    fn announce(&self, id: &str) -> Result<Repository, ControllerError> {
        let repo = self.require(id)?;
        self.notifier.publish(Notification::RepositoryUpdate {
            repository_id: repo.id.clone(),
            state: repo.state,
            enabled: repo.enabled,
            harvest_requested: repo.harvest_requested,
            consecutive_failures: repo.consecutive_failures,
        });
        Ok(repo)
    }
}
