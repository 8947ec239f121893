//! Harvest lifecycle integration tests.
//!
//! These tests drive both scheduler daemons against mock OAI endpoints:
//! requested -> harvesting -> idle for repositories, and
//! pending -> processing -> done | rejected | failed for records.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use harvester_core::{
    config::StorageAreas,
    oai,
    record::WITHDRAWN_DETAIL,
    recover_interrupted_work,
    testing::{fixtures, MockFetcher, MockMailer, MockTransformer},
    DaemonConfig, ErrorFlowHandler, FailureKind, FetchResponse, FileStorage, HarvestState, HarvestedEntry,
    IdentifierHarvestSource, IdentifierHarvester, NewRepository, Notification, Notifier,
    ObjectHarvestSource, ObjectHarvester, ProcessStatus, RecordBatchLoader, RecordFilter,
    RecordStore, ReportFilter, ReportStore, RepositoryController, RepositoryStore,
    SchedulerDaemon, SqliteRecordStore, SqliteReportStore, SqliteRepositoryStore, StorageArea,
    WorkerKind,
};

const BASE: &str = "http://example.org/oai";

/// Test helper wiring stores, mocks and both work sources together.
struct TestHarness {
    repositories: Arc<SqliteRepositoryStore>,
    records: Arc<SqliteRecordStore>,
    controller: Arc<RepositoryController>,
    storage: Arc<FileStorage>,
    fetcher: Arc<MockFetcher>,
    transformer: Arc<MockTransformer>,
    mailer: Arc<MockMailer>,
    notifier: Notifier,
    reports: Arc<SqliteReportStore>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let repositories = Arc::new(
            SqliteRepositoryStore::new(&db_path).expect("Failed to create repository store"),
        );
        let records =
            Arc::new(SqliteRecordStore::new(&db_path).expect("Failed to create record store"));
        let reports =
            Arc::new(SqliteReportStore::new(&db_path).expect("Failed to create report store"));
        let storage = Arc::new(FileStorage::new(StorageAreas {
            processing: temp_dir.path().join("processing"),
            done: temp_dir.path().join("done"),
            rejected: temp_dir.path().join("rejected"),
        }));
        let notifier = Notifier::default();
        let controller = Arc::new(RepositoryController::new(
            Arc::clone(&repositories) as Arc<dyn RepositoryStore>,
            notifier.clone(),
        ));

        Self {
            repositories,
            records,
            controller,
            storage,
            fetcher: Arc::new(MockFetcher::new()),
            transformer: Arc::new(MockTransformer::new()),
            mailer: Arc::new(MockMailer::new()),
            notifier,
            reports,
            temp_dir,
        }
    }

    fn errorflow(&self, worker: WorkerKind, threshold: u32) -> Arc<ErrorFlowHandler> {
        Arc::new(ErrorFlowHandler::new(
            worker,
            threshold,
            Arc::clone(&self.controller),
            self.reports.clone(),
            self.mailer.clone(),
            vec!["ops@example.org".to_string()],
            self.notifier.clone(),
        ))
    }

    fn identifier_daemon(&self, threshold: u32) -> SchedulerDaemon<IdentifierHarvestSource> {
        let loader = Arc::new(RecordBatchLoader::new(self.records.clone()));
        let errorflow = self.errorflow(WorkerKind::Identifier, threshold);
        let source = IdentifierHarvestSource::new(
            IdentifierHarvester::new(self.fetcher.clone(), loader)
                .with_withdrawal_handling(Arc::clone(&self.storage), Arc::clone(&errorflow)),
            Arc::clone(&self.controller),
            errorflow,
            self.notifier.clone(),
        );
        SchedulerDaemon::new(
            daemon_config("identifier-harvester", 2, Duration::ZERO),
            Arc::new(source),
            self.notifier.clone(),
        )
    }

    fn object_daemon(&self, max_parallel: usize, threshold: u32) -> SchedulerDaemon<ObjectHarvestSource> {
        self.object_daemon_retrying(max_parallel, threshold, Duration::from_secs(300))
    }

    fn object_daemon_retrying(
        &self,
        max_parallel: usize,
        threshold: u32,
        retry_delay: Duration,
    ) -> SchedulerDaemon<ObjectHarvestSource> {
        let harvester = ObjectHarvester::new(
            self.fetcher.clone(),
            self.records.clone(),
            Arc::clone(&self.storage),
            self.transformer.clone(),
            self.notifier.clone(),
        );
        let source = ObjectHarvestSource::new(
            harvester,
            Arc::clone(&self.controller),
            self.errorflow(WorkerKind::Object, threshold),
            50,
        )
        .with_failed_retry_delay(retry_delay);
        SchedulerDaemon::new(
            daemon_config("object-harvester", max_parallel, Duration::ZERO),
            Arc::new(source),
            self.notifier.clone(),
        )
    }

    fn create_repository(&self, id: &str) {
        self.repositories
            .create(NewRepository::new(id, BASE))
            .expect("Failed to create repository");
    }

    fn load(&self, repository_id: &str, identifiers: &[&str]) {
        let entries: Vec<HarvestedEntry> =
            identifiers.iter().map(|i| HarvestedEntry::new(*i)).collect();
        RecordBatchLoader::new(self.records.clone())
            .load(repository_id, &entries)
            .expect("Failed to load records");
    }

    fn script_record(&self, identifier: &str) {
        self.fetcher.respond(
            &oai::get_record_url(BASE, identifier, "oai_dc"),
            FetchResponse::ok(fixtures::get_record(identifier)),
        );
    }

    fn count(&self, status: ProcessStatus) -> i64 {
        self.records.status_counts(None).unwrap().get(status)
    }
}

fn daemon_config(name: &str, max_parallel: usize, refill_delay: Duration) -> DaemonConfig {
    DaemonConfig {
        name: name.to_string(),
        tick: Duration::from_millis(10),
        max_parallel,
        refill_delay,
        worker_budget: Duration::from_secs(5),
    }
}

/// Tick `daemon` until `done` holds or the timeout expires.
async fn drive<S, F>(daemon: &SchedulerDaemon<S>, mut done: F) -> bool
where
    S: harvester_core::WorkSource,
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        daemon.tick().await;
        if done() && daemon.active_count().await == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn drain_events(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_identifier_harvest_end_to_end() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    let repo = harness.controller.request_harvest("repo").unwrap();
    harness.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(
            &[("oai:x:1", false), ("oai:x:2", false), ("oai:x:3", false)],
            None,
        )),
    );
    let mut events = harness.notifier.subscribe();

    let daemon = harness.identifier_daemon(3);
    let finished = drive(&daemon, || harness.count(ProcessStatus::Pending) == 3).await;
    assert!(finished, "harvest did not finish");

    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.state, HarvestState::Idle);
    assert!(!repo.harvest_requested);
    assert_eq!(repo.datestamp.as_deref(), Some("2024-01-01"));
    assert!(repo.last_harvest.is_some());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Notification::HarvestFinished { repository_id, outcome, inserted: 3, .. }
            if repository_id == "repo" && outcome == "completed"
    )));
}

#[tokio::test]
async fn test_second_harvest_asks_from_last_datestamp() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    let repo = harness.controller.request_harvest("repo").unwrap();
    harness.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(&[("oai:x:1", false)], None)),
    );

    let daemon = harness.identifier_daemon(3);
    assert!(drive(&daemon, || harness.count(ProcessStatus::Pending) == 1).await);

    let repo = harness.controller.request_harvest("repo").unwrap();
    let second_url = oai::list_identifiers_url(&repo);
    assert!(second_url.contains("from=2024-01-01"));
    harness.fetcher.respond(
        &second_url,
        FetchResponse::ok(fixtures::list_identifiers(&[("oai:x:1", true)], None)),
    );

    assert!(
        drive(&daemon, || harness.count(ProcessStatus::Rejected) == 1).await,
        "withdrawal was not applied"
    );
    assert_eq!(harness.count(ProcessStatus::Pending), 0);
    let withdrawn = harness.records.list(&RecordFilter::new()).unwrap().remove(0);
    assert_eq!(withdrawn.error_detail.as_deref(), Some(WITHDRAWN_DETAIL));
}

#[tokio::test]
async fn test_withdrawn_archived_record_moves_to_rejected_with_report() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:x:1"]);
    harness.script_record("oai:x:1");

    let objects = harness.object_daemon(1, 10);
    assert!(drive(&objects, || harness.count(ProcessStatus::Done) == 1).await);
    let record = harness.records.list(&RecordFilter::new()).unwrap().remove(0);
    assert!(harness.storage.exists(StorageArea::Done, &record.object_id).await);

    let repo = harness.controller.request_harvest("repo").unwrap();
    harness.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(&[("oai:x:1", true)], None)),
    );
    let identifiers = harness.identifier_daemon(3);
    assert!(
        drive(&identifiers, || harness.count(ProcessStatus::Rejected) == 1).await,
        "withdrawal was not applied"
    );

    assert!(!harness.storage.exists(StorageArea::Done, &record.object_id).await);
    assert!(harness.storage.exists(StorageArea::Rejected, &record.object_id).await);

    let reports = harness
        .reports
        .query(&ReportFilter::new().with_record(record.id))
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].worker, WorkerKind::Identifier);
    assert_eq!(reports[0].kind, FailureKind::Validation);

    // Deletions at source are not failures of the repository
    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.consecutive_failures, 0);
    assert_eq!(repo.state, HarvestState::Idle);
}

#[tokio::test]
async fn test_identifier_failures_pause_repository_with_one_alert() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    // Nothing scripted: every fetch fails with a network error
    let daemon = harness.identifier_daemon(3);

    for attempt in 1..=3 {
        harness.controller.request_harvest("repo").unwrap();
        let done = drive(&daemon, || {
            let repo = harness.repositories.get("repo").unwrap().unwrap();
            !repo.harvest_requested && repo.state != HarvestState::Harvesting
        })
        .await;
        assert!(done, "attempt {} did not settle", attempt);
    }

    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.state, HarvestState::PausedOnError);
    assert_eq!(harness.mailer.sent().len(), 1);
    assert!(harness.controller.request_harvest("repo").is_err());
}

#[tokio::test]
async fn test_object_harvest_archives_and_rejects() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:x:1", "oai:x:2", "oai:x:bad"]);
    harness.script_record("oai:x:1");
    harness.script_record("oai:x:2");
    harness.fetcher.respond(
        &oai::get_record_url(BASE, "oai:x:bad", "oai_dc"),
        FetchResponse::ok(fixtures::oai_error("cannotDisseminateFormat", "no oai_dc")),
    );

    let daemon = harness.object_daemon(4, 1);
    let finished = drive(&daemon, || {
        harness.count(ProcessStatus::Done) + harness.count(ProcessStatus::Rejected) == 3
    })
    .await;
    assert!(finished, "downloads did not finish");

    assert_eq!(harness.count(ProcessStatus::Done), 2);
    assert_eq!(harness.count(ProcessStatus::Rejected), 1);

    let rejected = harness
        .records
        .list(&RecordFilter::new().with_status(ProcessStatus::Rejected))
        .unwrap();
    assert_eq!(rejected[0].identifier, "oai:x:bad");
    assert!(
        harness
            .storage
            .exists(StorageArea::Rejected, &rejected[0].object_id)
            .await
    );

    // Threshold 1, yet a validation rejection must not pause
    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.state, HarvestState::Idle);
    assert!(harness.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_object_admission_is_bounded_and_refilled() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    let identifiers = ["oai:1", "oai:2", "oai:3", "oai:4", "oai:5"];
    harness.load("repo", &identifiers);
    for identifier in identifiers {
        harness.script_record(identifier);
    }
    harness.fetcher.set_delay(Duration::from_millis(50));

    let daemon = harness.object_daemon(2, 10);
    let mut max_active = 0;
    let start = std::time::Instant::now();
    while harness.count(ProcessStatus::Done) < 5 && start.elapsed() < Duration::from_secs(5) {
        daemon.tick().await;
        max_active = max_active.max(daemon.active_count().await);
        assert!(harness.count(ProcessStatus::Processing) <= 2);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(harness.count(ProcessStatus::Done), 5);
    assert_eq!(max_active, 2);
}

#[tokio::test]
async fn test_paused_repository_records_are_not_claimed() {
    let harness = TestHarness::new();
    harness.create_repository("paused");
    harness.create_repository("healthy");
    harness.load("paused", &["oai:p:1"]);
    harness.load("healthy", &["oai:h:1"]);
    harness.script_record("oai:p:1");
    harness.script_record("oai:h:1");
    harness.controller.record_failure("paused", 1).unwrap();

    let daemon = harness.object_daemon(4, 10);
    assert!(drive(&daemon, || harness.count(ProcessStatus::Done) == 1).await);

    let pending = harness
        .records
        .list(&RecordFilter::new().with_status(ProcessStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].repository_id, "paused");
}

#[tokio::test]
async fn test_interleaved_success_resets_object_failures() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:fail:1", "oai:ok:1", "oai:fail:2"]);
    harness.script_record("oai:ok:1");

    // One worker at a time keeps the order fail, ok, fail
    let daemon = harness.object_daemon(1, 2);
    assert!(
        drive(&daemon, || harness.count(ProcessStatus::Pending) == 0).await,
        "downloads did not finish"
    );

    assert_eq!(harness.count(ProcessStatus::Failed), 2);
    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.state, HarvestState::Idle);
    assert_eq!(repo.consecutive_failures, 1);
    assert!(harness.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_failed_record_is_retried_after_delay() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:x:1"]);

    // Nothing scripted yet, so the first attempt fails
    let daemon = harness.object_daemon_retrying(1, 10, Duration::from_millis(200));
    assert!(drive(&daemon, || harness.count(ProcessStatus::Failed) == 1).await);
    assert_eq!(
        harness.repositories.get("repo").unwrap().unwrap().consecutive_failures,
        1
    );

    harness.script_record("oai:x:1");
    assert!(
        drive(&daemon, || harness.count(ProcessStatus::Done) == 1).await,
        "failed record was not retried"
    );
    assert_eq!(harness.count(ProcessStatus::Failed), 0);
    let record = harness.records.list(&RecordFilter::new()).unwrap().remove(0);
    assert!(harness.storage.exists(StorageArea::Done, &record.object_id).await);
    assert_eq!(
        harness.repositories.get("repo").unwrap().unwrap().consecutive_failures,
        0
    );
}

#[tokio::test]
async fn test_failed_records_of_paused_repository_wait() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:x:1"]);

    let daemon = harness.object_daemon_retrying(1, 1, Duration::ZERO);
    assert!(drive(&daemon, || harness.count(ProcessStatus::Failed) == 1).await);
    let repo = harness.repositories.get("repo").unwrap().unwrap();
    assert_eq!(repo.state, HarvestState::PausedOnError);

    harness.script_record("oai:x:1");
    for _ in 0..10 {
        daemon.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.count(ProcessStatus::Failed), 1);
    assert_eq!(harness.count(ProcessStatus::Done), 0);
}

#[tokio::test]
async fn test_crash_recovery_returns_claimed_work() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["a", "b", "c", "d"]);
    for record in harness.records.list(&RecordFilter::new()).unwrap() {
        assert!(harness.records.claim(record.id).unwrap());
    }
    harness.repositories.try_start_harvest("repo").unwrap();

    let report = recover_interrupted_work(harness.records.as_ref(), harness.repositories.as_ref());
    assert_eq!(report.records_reset, 4);
    assert_eq!(report.repositories_reset, 1);
    assert_eq!(harness.count(ProcessStatus::Pending), 4);
    assert_eq!(harness.count(ProcessStatus::Processing), 0);
}

/// Run `attempt` on every connection at once and count the winners.
async fn race<T, F>(connections: &[Arc<T>], attempt: F) -> usize
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(std::sync::Barrier::new(connections.len()));
    let handles: Vec<_> = connections
        .iter()
        .map(|connection| {
            let connection = Arc::clone(connection);
            let barrier = Arc::clone(&barrier);
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                attempt(&connection)
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    winners
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_have_one_winner() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    let db_path = harness.temp_dir.path().join("test.db");
    // One connection per contender so the race happens inside SQLite
    let stores: Vec<Arc<SqliteRepositoryStore>> = (0..6)
        .map(|_| Arc::new(SqliteRepositoryStore::new(&db_path).unwrap()))
        .collect();

    for round in 0..25 {
        let winners = race(&stores, |store| store.try_start_harvest("repo").unwrap()).await;
        assert_eq!(winners, 1, "round {} had {} winners", round, winners);
        assert!(harness.repositories.abort_harvest("repo").unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let harness = TestHarness::new();
    let identifiers: Vec<String> = (0..25).map(|i| format!("oai:x:{}", i)).collect();
    let identifiers: Vec<&str> = identifiers.iter().map(String::as_str).collect();
    harness.load("repo", &identifiers);
    let db_path = harness.temp_dir.path().join("test.db");
    let stores: Vec<Arc<SqliteRecordStore>> = (0..6)
        .map(|_| Arc::new(SqliteRecordStore::new(&db_path).unwrap()))
        .collect();

    for record in harness.records.list(&RecordFilter::new()).unwrap() {
        let id = record.id;
        let winners = race(&stores, move |store| store.claim(id).unwrap()).await;
        assert_eq!(winners, 1, "record {} had {} winners", id, winners);
    }
    assert_eq!(harness.count(ProcessStatus::Processing), 25);
}

#[tokio::test]
async fn test_terminal_records_do_not_move() {
    let harness = TestHarness::new();
    harness.load("repo", &["a"]);
    let record = harness.records.list(&RecordFilter::new()).unwrap().remove(0);

    assert!(harness.records.claim(record.id).unwrap());
    assert!(harness
        .records
        .finish(record.id, ProcessStatus::Done, None)
        .unwrap());
    assert!(!harness
        .records
        .finish(record.id, ProcessStatus::Failed, Some("late"))
        .unwrap());
    assert!(!harness.records.claim(record.id).unwrap());
    assert_eq!(
        harness.records.get(record.id).unwrap().unwrap().status,
        ProcessStatus::Done
    );
}

#[tokio::test]
async fn test_loader_is_idempotent_across_harvests() {
    let harness = TestHarness::new();
    harness.load("repo", &["a", "b"]);
    harness.load("repo", &["a", "b", "c"]);
    let identifiers: HashSet<String> = harness
        .records
        .list(&RecordFilter::new())
        .unwrap()
        .into_iter()
        .map(|r| r.identifier)
        .collect();
    assert_eq!(identifiers.len(), 3);
}

#[tokio::test]
async fn test_stopped_daemon_lets_workers_finish() {
    let harness = TestHarness::new();
    harness.create_repository("repo");
    harness.load("repo", &["oai:1"]);
    harness.script_record("oai:1");
    harness.fetcher.set_delay(Duration::from_millis(100));

    let daemon = harness.object_daemon(2, 10);
    daemon.start().await;
    let start = std::time::Instant::now();
    while harness.count(ProcessStatus::Processing) == 0 && start.elapsed() < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    daemon.stop().await;

    assert_eq!(harness.count(ProcessStatus::Done), 1);
    assert_eq!(daemon.active_count().await, 0);
}
