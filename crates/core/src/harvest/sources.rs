//! Work sources feeding the two scheduler daemons.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::identifier::{HarvestOutcome, HarvestSummary, IdentifierHarvester};
use super::object::{ObjectHarvester, ObjectOutcome};
use crate::errorflow::{Decision, ErrorFlowHandler, FailureContext, WorkerFailure};
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::record::{ProcessStatus, Record, RecordFilter};
use crate::repository::{
    ControllerError, HarvestState, Repository, RepositoryController, RepositoryFilter,
};
use crate::scheduler::{Completion, WorkSource};

/// Repositories with a pending harvest request.
pub struct IdentifierHarvestSource {
    harvester: IdentifierHarvester,
    controller: Arc<RepositoryController>,
    errorflow: Arc<ErrorFlowHandler>,
    notifier: Notifier,
    interrupts: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl IdentifierHarvestSource {
    pub fn new(
        harvester: IdentifierHarvester,
        controller: Arc<RepositoryController>,
        errorflow: Arc<ErrorFlowHandler>,
        notifier: Notifier,
    ) -> Self {
        Self {
            harvester,
            controller,
            errorflow,
            notifier,
            interrupts: Mutex::new(HashMap::new()),
        }
    }

    /// Ask a running harvest to stop after its current page.
    pub fn interrupt(&self, repository_id: &str) -> bool {
        match self.interrupts.lock() {
            Ok(interrupts) => match interrupts.get(repository_id) {
                Some(flag) => {
                    flag.store(true, Ordering::Release);
                    info!(repository_id, "Harvest interrupt requested");
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn requested() -> RepositoryFilter {
        RepositoryFilter::new()
            .with_harvest_requested(true)
            .with_enabled(true)
            .with_state(HarvestState::Idle)
    }

    fn interrupt_flag(&self, repository_id: &str) -> Arc<AtomicBool> {
        match self.interrupts.lock() {
            Ok(mut interrupts) => interrupts
                .entry(repository_id.to_string())
                .or_default()
                .clone(),
            Err(_) => Arc::new(AtomicBool::new(false)),
        }
    }

    fn forget_interrupt(&self, repository_id: &str) {
        if let Ok(mut interrupts) = self.interrupts.lock() {
            interrupts.remove(repository_id);
        }
    }

    fn finished(&self, repository: &Repository, outcome: &str, summary: &HarvestSummary) {
        metrics::HARVESTS_TOTAL.with_label_values(&[outcome]).inc();
        metrics::RECORDS_DISCOVERED
            .with_label_values(&["inserted"])
            .inc_by(summary.load.inserted as u64);
        metrics::RECORDS_DISCOVERED
            .with_label_values(&["withdrawn"])
            .inc_by(summary.load.withdrawn as u64);
        self.notifier.publish(Notification::HarvestFinished {
            repository_id: repository.id.clone(),
            outcome: outcome.to_string(),
            pages: summary.pages,
            inserted: summary.load.inserted,
            withdrawn: summary.load.withdrawn,
        });
    }

    async fn fail(&self, repository: &Repository, failure: WorkerFailure, summary: &HarvestSummary) {
        let decision = self
            .errorflow
            .on_failure(&FailureContext::repository(&repository.id), &failure)
            .await;
        // A pause already moved the repository out of HARVESTING
        if decision != Decision::PauseRepository {
            log_controller(&repository.id, self.controller.abort_harvest(&repository.id));
        }
        self.finished(repository, "failed", summary);
    }
}

fn log_controller<T>(repository_id: &str, result: Result<T, ControllerError>) {
    if let Err(e) = result {
        error!(repository_id, error = %e, "Repository transition failed");
    }
}

#[async_trait]
impl WorkSource for IdentifierHarvestSource {
    type Item = Repository;
    type Outcome = HarvestOutcome;

    fn key(item: &Repository) -> String {
        item.id.clone()
    }

    async fn claim(&self, limit: usize, active: &HashSet<String>) -> Vec<Repository> {
        let candidates = match self.controller.store().list(&Self::requested()) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to list requested repositories");
                return Vec::new();
            }
        };

        let mut claimed = Vec::new();
        for candidate in candidates {
            if claimed.len() >= limit {
                break;
            }
            if active.contains(&candidate.id) {
                continue;
            }
            match self.controller.start_harvest(&candidate.id) {
                Ok(repository) => {
                    self.interrupt_flag(&repository.id);
                    claimed.push(repository);
                }
                Err(e) => debug!(repository_id = %candidate.id, reason = %e, "Harvest not started"),
            }
        }
        claimed
    }

    async fn run(&self, repository: Repository) -> HarvestOutcome {
        let interrupt = self.interrupt_flag(&repository.id);
        self.harvester.harvest(&repository, &interrupt).await
    }

    async fn complete(&self, repository: Repository, completion: Completion<HarvestOutcome>) {
        self.forget_interrupt(&repository.id);
        let id = repository.id.as_str();

        match completion {
            Completion::Finished(HarvestOutcome::Completed(summary)) => {
                let datestamp = if self.harvester.is_sampling() {
                    None
                } else {
                    summary.load.latest_datestamp.as_deref()
                };
                log_controller(id, self.controller.complete_harvest(id, datestamp));
                self.errorflow.on_success(id);
                info!(
                    repository_id = id,
                    pages = summary.pages,
                    inserted = summary.load.inserted,
                    withdrawn = summary.load.withdrawn,
                    "Identifier harvest completed"
                );
                self.finished(&repository, "completed", &summary);
            }
            Completion::Finished(HarvestOutcome::Interrupted(summary)) => {
                log_controller(id, self.controller.abort_harvest(id));
                self.finished(&repository, "interrupted", &summary);
            }
            Completion::Finished(HarvestOutcome::Failed { failure, summary }) => {
                warn!(repository_id = id, error = %failure, "Identifier harvest failed");
                self.fail(&repository, failure, &summary).await;
            }
            Completion::TimedOut => {
                warn!(repository_id = id, "Identifier harvest exceeded its time budget");
                let failure = WorkerFailure::timeout("harvest exceeded its time budget");
                self.fail(&repository, failure, &HarvestSummary::default()).await;
            }
            Completion::Panicked(message) => {
                error!(repository_id = id, %message, "Identifier harvest panicked");
                let failure = WorkerFailure::storage(format!("harvest worker panicked: {}", message));
                self.fail(&repository, failure, &HarvestSummary::default()).await;
            }
        }
    }

    async fn queue_depth(&self) -> usize {
        self.controller
            .store()
            .count(&Self::requested())
            .map(|n| n.max(0) as usize)
            .unwrap_or(0)
    }
}

/// A claimed record and the repository it belongs to.
#[derive(Debug, Clone)]
pub struct ObjectJob {
    pub record: Record,
    pub repository: Repository,
}

/// Records of repositories that are neither paused nor disabled: PENDING
/// ones first, then FAILED ones whose retry delay has passed.
pub struct ObjectHarvestSource {
    harvester: ObjectHarvester,
    controller: Arc<RepositoryController>,
    errorflow: Arc<ErrorFlowHandler>,
    page_size: usize,
    failed_retry_delay: Duration,
}

impl ObjectHarvestSource {
    pub fn new(
        harvester: ObjectHarvester,
        controller: Arc<RepositoryController>,
        errorflow: Arc<ErrorFlowHandler>,
        page_size: usize,
    ) -> Self {
        Self {
            harvester,
            controller,
            errorflow,
            page_size,
            failed_retry_delay: Duration::from_secs(300),
        }
    }

    pub fn with_failed_retry_delay(mut self, delay: Duration) -> Self {
        self.failed_retry_delay = delay;
        self
    }

    fn retry_cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.failed_retry_delay)
            .ok()
            .and_then(|delay| Utc::now().checked_sub_signed(delay))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn fail(&self, job: &ObjectJob, failure: &WorkerFailure) {
        let context = FailureContext::record(&job.record.repository_id, job.record.id);
        self.errorflow.on_failure(&context, failure).await;
    }
}

#[async_trait]
impl WorkSource for ObjectHarvestSource {
    type Item = ObjectJob;
    type Outcome = ObjectOutcome;

    fn key(item: &ObjectJob) -> String {
        item.record.id.to_string()
    }

    async fn claim(&self, limit: usize, active: &HashSet<String>) -> Vec<ObjectJob> {
        let repositories: HashMap<String, Repository> =
            match self.controller.store().list(&RepositoryFilter::new()) {
                Ok(list) => list.into_iter().map(|r| (r.id.clone(), r)).collect(),
                Err(e) => {
                    error!(error = %e, "Failed to list repositories");
                    return Vec::new();
                }
            };
        let excluded: Vec<String> = repositories
            .values()
            .filter(|r| r.is_paused() || !r.enabled)
            .map(|r| r.id.clone())
            .collect();

        let ready = match self.harvester.records().next_claimable(
            limit.min(self.page_size),
            &excluded,
            self.retry_cutoff(),
        ) {
            Ok(ready) => ready,
            Err(e) => {
                error!(error = %e, "Failed to read claimable records");
                return Vec::new();
            }
        };

        let mut claimed = Vec::new();
        for record in ready {
            if active.contains(&record.id.to_string()) {
                continue;
            }
            let Some(repository) = repositories.get(&record.repository_id) else {
                warn!(
                    record_id = record.id,
                    repository_id = %record.repository_id,
                    "Pending record of unknown repository"
                );
                continue;
            };
            if record.status == ProcessStatus::Failed {
                debug!(record_id = record.id, "Retrying failed record");
            }
            match self.harvester.claim(&record) {
                Ok(true) => claimed.push(ObjectJob {
                    record,
                    repository: repository.clone(),
                }),
                Ok(false) => debug!(record_id = record.id, "Record claimed elsewhere"),
                Err(e) => error!(record_id = record.id, error = %e, "Failed to claim record"),
            }
        }
        claimed
    }

    async fn run(&self, job: ObjectJob) -> ObjectOutcome {
        self.harvester.process(&job.record, &job.repository).await
    }

    async fn complete(&self, job: ObjectJob, completion: Completion<ObjectOutcome>) {
        match completion {
            Completion::Finished(ObjectOutcome::Archived) => {
                self.errorflow.on_success(&job.record.repository_id);
            }
            Completion::Finished(ObjectOutcome::Rejected(failure))
            | Completion::Finished(ObjectOutcome::Failed(failure)) => {
                self.fail(&job, &failure).await;
            }
            Completion::TimedOut => {
                let failure = WorkerFailure::timeout("download exceeded its time budget");
                self.harvester.abandon(&job.record, &failure).await;
                self.fail(&job, &failure).await;
            }
            Completion::Panicked(message) => {
                let failure = WorkerFailure::storage(format!("download worker panicked: {}", message));
                self.harvester.abandon(&job.record, &failure).await;
                self.fail(&job, &failure).await;
            }
        }
    }

    async fn queue_depth(&self) -> usize {
        self.harvester
            .records()
            .count(&RecordFilter::new().with_status(ProcessStatus::Pending))
            .map(|n| n.max(0) as usize)
            .unwrap_or(0)
    }
}
