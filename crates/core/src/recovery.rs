//! Startup recovery of work interrupted by a crash or kill.

use serde::Serialize;
use tracing::{error, info};

use crate::record::RecordStore;
use crate::repository::RepositoryStore;

/// What startup recovery put back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// PROCESSING records returned to PENDING.
    pub records_reset: usize,
    /// HARVESTING repositories returned to IDLE.
    pub repositories_reset: usize,
}

/// Return everything left in flight to a claimable state.
///
/// Must run before either daemon starts. Failures are logged and leave the
/// affected rows untouched; they never prevent startup.
pub fn recover_interrupted_work(
    records: &dyn RecordStore,
    repositories: &dyn RepositoryStore,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    match records.reset_processing() {
        Ok(n) => report.records_reset = n,
        Err(e) => error!(error = %e, "Failed to reset processing records"),
    }
    match repositories.reset_harvesting() {
        Ok(n) => report.repositories_reset = n,
        Err(e) => error!(error = %e, "Failed to reset harvesting repositories"),
    }

    if report.records_reset > 0 || report.repositories_reset > 0 {
        info!(
            records = report.records_reset,
            repositories = report.repositories_reset,
            "Recovered interrupted work"
        );
    }
    report
}
