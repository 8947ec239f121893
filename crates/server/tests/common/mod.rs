//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router over file-backed stores and mock fetch,
//! transform and mail backends. Daemons are not started; tests drive them
//! with `tick()` so every step is deterministic.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use harvester_core::{
    config::StorageAreas,
    oai, FetchResponse,
    testing::{MockFetcher, MockMailer, MockTransformer},
    CalendarScheduler, Config, DaemonConfig, ErrorFlowHandler, FileStorage,
    IdentifierHarvestSource, IdentifierHarvester, Notifier, ObjectHarvestSource, ObjectHarvester,
    RecordBatchLoader, RecordStore, ReportStore, RepositoryController, RepositoryStore,
    RepositoryValidator, SchedulerDaemon, SqliteRecordStore, SqliteReportStore,
    SqliteRepositoryStore, WorkerKind,
};
use harvester_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use harvester_core::testing::fixtures;

pub const BASE: &str = "http://example.org/oai";

/// Test fixture with an in-process router and controllable mocks.
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    pub fetcher: Arc<MockFetcher>,
    pub mailer: Arc<MockMailer>,
    pub records: Arc<dyn RecordStore>,
    pub identifier_daemon: Arc<SchedulerDaemon<IdentifierHarvestSource>>,
    pub object_daemon: Arc<SchedulerDaemon<ObjectHarvestSource>>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let repositories: Arc<dyn RepositoryStore> =
            Arc::new(SqliteRepositoryStore::new(&db_path).expect("repository store"));
        let records: Arc<dyn RecordStore> =
            Arc::new(SqliteRecordStore::new(&db_path).expect("record store"));
        let reports: Arc<dyn ReportStore> =
            Arc::new(SqliteReportStore::new(&db_path).expect("report store"));

        let storage = Arc::new(FileStorage::new(StorageAreas {
            processing: temp_dir.path().join("processing"),
            done: temp_dir.path().join("done"),
            rejected: temp_dir.path().join("rejected"),
        }));
        storage.ensure_areas().await.expect("storage areas");

        // Registrations against BASE pass validation unless a test rescripts it
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            &oai::list_metadata_formats_url(BASE),
            FetchResponse::ok(fixtures::metadata_formats(&["oai_dc"])),
        );
        let mailer = Arc::new(MockMailer::new());
        let notifier = Notifier::default();
        let controller = Arc::new(RepositoryController::new(
            Arc::clone(&repositories),
            notifier.clone(),
        ));

        let errorflow = |worker, threshold| {
            Arc::new(ErrorFlowHandler::new(
                worker,
                threshold,
                Arc::clone(&controller),
                Arc::clone(&reports),
                mailer.clone(),
                vec!["ops@example.org".to_string()],
                notifier.clone(),
            ))
        };

        let identifier_errors = errorflow(WorkerKind::Identifier, 2);
        let identifier_source = Arc::new(IdentifierHarvestSource::new(
            IdentifierHarvester::new(
                fetcher.clone(),
                Arc::new(RecordBatchLoader::new(Arc::clone(&records))),
            )
            .with_withdrawal_handling(Arc::clone(&storage), Arc::clone(&identifier_errors)),
            Arc::clone(&controller),
            identifier_errors,
            notifier.clone(),
        ));
        let object_source = Arc::new(ObjectHarvestSource::new(
            ObjectHarvester::new(
                fetcher.clone(),
                Arc::clone(&records),
                storage,
                Arc::new(MockTransformer::new()),
                notifier.clone(),
            ),
            Arc::clone(&controller),
            errorflow(WorkerKind::Object, 5),
            50,
        ));

        let identifier_daemon = Arc::new(SchedulerDaemon::new(
            daemon_config("identifier-harvester"),
            identifier_source,
            notifier.clone(),
        ));
        let object_daemon = Arc::new(SchedulerDaemon::new(
            daemon_config("object-harvester"),
            object_source,
            notifier.clone(),
        ));
        let calendar = Arc::new(CalendarScheduler::new(
            Arc::clone(&controller),
            Duration::from_secs(60),
        ));

        let state = Arc::new(AppState::new(
            Config::default(),
            repositories,
            Arc::clone(&records),
            reports,
            controller,
            notifier,
            Arc::clone(&identifier_daemon),
            Arc::clone(&object_daemon),
            calendar,
            Arc::new(RepositoryValidator::new(fetcher.clone())),
        ));

        Self {
            router: create_router(Arc::clone(&state)),
            state,
            fetcher,
            mailer,
            records,
            identifier_daemon,
            object_daemon,
            temp_dir,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, body }
    }

    /// Tick the identifier daemon until no harvest is running.
    pub async fn run_identifier_harvests(&self) {
        self.identifier_daemon.tick().await;
        wait_idle(&self.identifier_daemon).await;
    }

    /// Tick the object daemon until the pending queue is drained.
    pub async fn run_object_harvests(&self) {
        for _ in 0..200 {
            self.object_daemon.tick().await;
            if self.object_daemon.active_count().await == 0
                && self.records.status_counts(None).unwrap().pending == 0
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("object harvests did not finish");
    }
}

async fn wait_idle<S: harvester_core::WorkSource>(daemon: &SchedulerDaemon<S>) {
    for _ in 0..200 {
        daemon.tick().await;
        if daemon.active_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon did not become idle");
}

fn daemon_config(name: &str) -> DaemonConfig {
    DaemonConfig {
        name: name.to_string(),
        tick: Duration::from_millis(10),
        max_parallel: 2,
        refill_delay: Duration::ZERO,
        worker_budget: Duration::from_secs(5),
    }
}
