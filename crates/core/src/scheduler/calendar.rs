//! Periodic harvest requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::repository::{ControllerError, HarvestState, RepositoryController, RepositoryFilter};

/// Sets `harvest_requested` on repositories whose cadence is due.
///
/// It never starts harvests itself; the identifier daemon picks the
/// requests up.
pub struct CalendarScheduler {
    controller: Arc<RepositoryController>,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CalendarScheduler {
    pub fn new(controller: Arc<RepositoryController>, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            controller,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Request harvests for every due repository. Returns how many were requested.
    pub fn run_once(&self, now: DateTime<Utc>) -> usize {
        Self::request_due(&self.controller, now)
    }

    fn request_due(controller: &RepositoryController, now: DateTime<Utc>) -> usize {
        let filter = RepositoryFilter::new()
            .with_enabled(true)
            .with_state(HarvestState::Idle)
            .with_harvest_requested(false);

        let repositories = match controller.store().list(&filter) {
            Ok(repositories) => repositories,
            Err(e) => {
                warn!(error = %e, "Calendar could not list repositories");
                return 0;
            }
        };

        let mut requested = 0;
        for repo in repositories.iter().filter(|r| r.is_due(now)) {
            match controller.request_harvest(&repo.id) {
                Ok(_) => {
                    info!(
                        repository_id = %repo.id,
                        schedule = repo.schedule.as_str(),
                        "Scheduled harvest requested"
                    );
                    requested += 1;
                }
                // State moved on since listing
                Err(ControllerError::Paused(_)) | Err(ControllerError::Disabled(_)) => {
                    debug!(repository_id = %repo.id, "Skipped scheduled harvest");
                }
                Err(e) => warn!(repository_id = %repo.id, error = %e, "Harvest request failed"),
            }
        }
        requested
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Calendar scheduler already running");
            return;
        }

        let controller = Arc::clone(&self.controller);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Calendar scheduler started");
            loop {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                Self::request_due(&controller, Utc::now());
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Calendar scheduler stopped");
        });
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}
