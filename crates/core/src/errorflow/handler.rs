//! Per-worker-kind failure handler.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{Decision, FailureContext, FailureKind, WorkerFailure, WorkerKind};
use crate::mail::Mailer;
use crate::metrics;
use crate::notify::{Notification, Notifier};
use crate::record::{Withdrawal, WITHDRAWN_DETAIL};
use crate::report::{NewErrorReport, ReportStore};
use crate::repository::RepositoryController;

/// Stores every failure, counts it against the repository and escalates
/// when the repository crosses its threshold.
pub struct ErrorFlowHandler {
    worker: WorkerKind,
    threshold: u32,
    controller: Arc<RepositoryController>,
    reports: Arc<dyn ReportStore>,
    mailer: Arc<dyn Mailer>,
    recipients: Vec<String>,
    notifier: Notifier,
}

impl ErrorFlowHandler {
    pub fn new(
        worker: WorkerKind,
        threshold: u32,
        controller: Arc<RepositoryController>,
        reports: Arc<dyn ReportStore>,
        mailer: Arc<dyn Mailer>,
        recipients: Vec<String>,
        notifier: Notifier,
    ) -> Self {
        Self {
            worker,
            threshold,
            controller,
            reports,
            mailer,
            recipients,
            notifier,
        }
    }

    pub async fn on_failure(&self, context: &FailureContext, failure: &WorkerFailure) -> Decision {
        self.store_report(context, failure);
        let decision = self.decide(context, failure);
        self.escalate(context, failure, decision).await;
        decision
    }

    /// A success anywhere in the repository resets its counter.
    pub fn on_success(&self, repository_id: &str) {
        if let Err(e) = self.controller.record_success(repository_id) {
            error!(repository_id, error = %e, "Failed to reset failure counter");
        }
    }

    /// Report a record deleted at source. The repository did nothing wrong,
    /// so nothing is counted against it.
    pub fn on_withdrawal(&self, repository_id: &str, withdrawal: &Withdrawal) {
        let context = FailureContext::record(repository_id, withdrawal.record_id);
        let failure = WorkerFailure::validation(format!(
            "{}: {}",
            WITHDRAWN_DETAIL, withdrawal.identifier
        ));
        self.store_report(&context, &failure);
    }

    fn store_report(&self, context: &FailureContext, failure: &WorkerFailure) {
        let report = NewErrorReport::from_failure(self.worker, context, failure);
        if let Err(e) = self.reports.insert(&report) {
            error!(
                repository_id = %context.repository_id,
                error = %e,
                "Failed to store error report"
            );
        }
        self.notifier.publish(Notification::ErrorReported {
            repository_id: context.repository_id.clone(),
            record_id: context.record_id,
            worker: self.worker,
            kind: failure.kind,
            message: failure.message.clone(),
        });
    }

    fn decide(&self, context: &FailureContext, failure: &WorkerFailure) -> Decision {
        if self.worker == WorkerKind::Object && failure.kind == FailureKind::Validation {
            return Decision::RecordRejected;
        }

        match self
            .controller
            .record_failure(&context.repository_id, self.threshold)
        {
            Ok(tally) if tally.paused_now => Decision::PauseRepository,
            Ok(_) => Decision::Continue,
            Err(e) => {
                error!(
                    repository_id = %context.repository_id,
                    error = %e,
                    "Failed to count failure"
                );
                Decision::Continue
            }
        }
    }

    async fn escalate(&self, context: &FailureContext, failure: &WorkerFailure, decision: Decision) {
        match decision {
            Decision::Continue | Decision::RecordRejected => {
                debug!(
                    repository_id = %context.repository_id,
                    record_id = ?context.record_id,
                    worker = self.worker.as_str(),
                    kind = failure.kind.as_str(),
                    ?decision,
                    "Failure handled"
                );
            }
            Decision::PauseRepository => {
                warn!(
                    repository_id = %context.repository_id,
                    worker = self.worker.as_str(),
                    threshold = self.threshold,
                    error = %failure,
                    "Pausing repository after consecutive failures"
                );
                metrics::REPOSITORY_PAUSES
                    .with_label_values(&[self.worker.as_str()])
                    .inc();
                self.notifier.publish(Notification::RepositoryPaused {
                    repository_id: context.repository_id.clone(),
                    consecutive_failures: self.threshold,
                    message: failure.to_string(),
                });

                let subject = format!("Harvesting paused for {}", context.repository_id);
                let body = format!(
                    "Repository {} was paused after {} consecutive {} failures.\nLast failure: {}{}",
                    context.repository_id,
                    self.threshold,
                    self.worker.as_str(),
                    failure,
                    failure
                        .url
                        .as_deref()
                        .map(|url| format!("\nURL: {}", url))
                        .unwrap_or_default()
                );
                if let Err(e) = self.mailer.send(&subject, &body, &self.recipients).await {
                    error!(repository_id = %context.repository_id, error = %e, "Failed to send alert");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportFilter, SqliteReportStore};
    use crate::repository::{HarvestState, NewRepository, RepositoryStore, SqliteRepositoryStore};
    use crate::testing::MockMailer;

    struct Fixture {
        handler: ErrorFlowHandler,
        repositories: Arc<SqliteRepositoryStore>,
        reports: Arc<SqliteReportStore>,
        mailer: Arc<MockMailer>,
    }

    fn fixture(worker: WorkerKind, threshold: u32) -> Fixture {
        let repositories = Arc::new(SqliteRepositoryStore::in_memory().unwrap());
        repositories
            .create(NewRepository::new("repo", "http://example.org/oai"))
            .unwrap();
        let reports = Arc::new(SqliteReportStore::in_memory().unwrap());
        let mailer = Arc::new(MockMailer::new());
        let notifier = Notifier::default();
        let controller = Arc::new(RepositoryController::new(
            repositories.clone(),
            notifier.clone(),
        ));
        let handler = ErrorFlowHandler::new(
            worker,
            threshold,
            controller,
            reports.clone(),
            mailer.clone(),
            vec!["ops@example.org".to_string()],
            notifier,
        );
        Fixture {
            handler,
            repositories,
            reports,
            mailer,
        }
    }

    #[tokio::test]
    async fn test_threshold_pauses_once_and_mails_once() {
        let f = fixture(WorkerKind::Identifier, 3);
        let ctx = FailureContext::repository("repo");
        let failure = WorkerFailure::transient("connection reset");

        let mut decisions = Vec::new();
        for _ in 0..5 {
            decisions.push(f.handler.on_failure(&ctx, &failure).await);
        }

        assert_eq!(
            decisions,
            vec![
                Decision::Continue,
                Decision::Continue,
                Decision::PauseRepository,
                Decision::Continue,
                Decision::Continue
            ]
        );
        assert_eq!(f.mailer.sent().len(), 1);
        assert_eq!(f.reports.count(&ReportFilter::new()).unwrap(), 5);
        let repo = f.repositories.get("repo").unwrap().unwrap();
        assert_eq!(repo.state, HarvestState::PausedOnError);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let f = fixture(WorkerKind::Object, 3);
        let ctx = FailureContext::record("repo", 1);
        let failure = WorkerFailure::transient("timeout");

        f.handler.on_failure(&ctx, &failure).await;
        f.handler.on_failure(&ctx, &failure).await;
        f.handler.on_success("repo");
        f.handler.on_failure(&ctx, &failure).await;
        assert_eq!(f.handler.on_failure(&ctx, &failure).await, Decision::Continue);

        let repo = f.repositories.get("repo").unwrap().unwrap();
        assert_eq!(repo.state, HarvestState::Idle);
        assert_eq!(repo.consecutive_failures, 2);
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_object_validation_rejects_without_counting() {
        let f = fixture(WorkerKind::Object, 1);
        let ctx = FailureContext::record("repo", 9);
        let decision = f
            .handler
            .on_failure(&ctx, &WorkerFailure::validation("malformed"))
            .await;

        assert_eq!(decision, Decision::RecordRejected);
        let repo = f.repositories.get("repo").unwrap().unwrap();
        assert_eq!(repo.consecutive_failures, 0);
        let reports = f.reports.query(&ReportFilter::new().with_record(9)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_withdrawal_is_reported_without_counting() {
        let f = fixture(WorkerKind::Identifier, 1);
        f.handler.on_withdrawal(
            "repo",
            &Withdrawal {
                record_id: 4,
                identifier: "oai:x:4".to_string(),
                object_id: "obj-4".to_string(),
            },
        );

        let reports = f.reports.query(&ReportFilter::new().with_record(4)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].worker, WorkerKind::Identifier);
        assert_eq!(reports[0].kind, FailureKind::Validation);
        assert!(reports[0].message.contains("oai:x:4"));
        let repo = f.repositories.get("repo").unwrap().unwrap();
        assert_eq!(repo.consecutive_failures, 0);
        assert_eq!(repo.state, HarvestState::Idle);
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mail_failure_does_not_change_decision() {
        let f = fixture(WorkerKind::Identifier, 1);
        f.mailer.fail_next();
        let decision = f
            .handler
            .on_failure(
                &FailureContext::repository("repo"),
                &WorkerFailure::protocol("bad xml"),
            )
            .await;
        assert_eq!(decision, Decision::PauseRepository);
    }
}
