//! API integration tests against an in-process router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{fixtures, TestFixture, BASE};
use harvester_core::{oai, FetchResponse, Repository};

fn new_repository(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Repository {}", id),
        "url": BASE,
        "metadata_prefix": "oai_dc",
    })
}

async fn create(fixture: &TestFixture, id: &str) -> Repository {
    let response = fixture.post("/api/v1/repositories", new_repository(id)).await;
    assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
    serde_json::from_value(response.body).unwrap()
}

#[tokio::test]
async fn test_health_and_config() {
    let fixture = TestFixture::new().await;

    let health = fixture.get("/api/v1/health").await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");

    let config = fixture.get("/api/v1/config").await;
    assert_eq!(config.status, StatusCode::OK);
    assert_eq!(config.body["mail_recipients"], 0);
    assert_eq!(config.body["server"]["port"], 8080);
}

#[tokio::test]
async fn test_repository_registration() {
    let fixture = TestFixture::new().await;

    let repo = create(&fixture, "repo-a").await;
    assert_eq!(repo.metadata_prefix, "oai_dc");
    assert!(repo.enabled);

    let duplicate = fixture.post("/api/v1/repositories", new_repository("repo-a")).await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let list = fixture.get("/api/v1/repositories?state=idle").await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.body["total"], 1);

    let bad_state = fixture.get("/api/v1/repositories?state=sleeping").await;
    assert_eq!(bad_state.status, StatusCode::BAD_REQUEST);

    let missing = fixture.get("/api/v1/repositories/nope").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert!(missing.body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_registration_checks_oai_settings() {
    let fixture = TestFixture::new().await;

    let mut unknown_prefix = new_repository("repo-a");
    unknown_prefix["metadata_prefix"] = json!("mods");
    let response = fixture.post("/api/v1/repositories", unknown_prefix).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("mods"));

    fixture.fetcher.respond(
        &oai::list_sets_url(BASE, None),
        FetchResponse::ok(fixtures::list_sets(&["books", "maps"], None)),
    );
    let mut unknown_set = new_repository("repo-b");
    unknown_set["set"] = json!("coins");
    let response = fixture.post("/api/v1/repositories", unknown_set).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("coins"));

    let mut known_set = new_repository("repo-c");
    known_set["set"] = json!("maps");
    let response = fixture.post("/api/v1/repositories", known_set).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["set"], "maps");

    let mut elsewhere = new_repository("repo-d");
    elsewhere["url"] = json!("http://unreachable.example.org/oai");
    let response = fixture.post("/api/v1/repositories", elsewhere).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let list = fixture.get("/api/v1/repositories").await;
    assert_eq!(list.body["total"], 1);
}

#[tokio::test]
async fn test_harvest_through_api() {
    let fixture = TestFixture::new().await;
    let repo = create(&fixture, "repo").await;

    fixture.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(
            &[("oai:x:1", false), ("oai:x:2", false)],
            None,
        )),
    );
    for identifier in ["oai:x:1", "oai:x:2"] {
        fixture.fetcher.respond(
            &oai::get_record_url(BASE, identifier, "oai_dc"),
            FetchResponse::ok(fixtures::get_record(identifier)),
        );
    }

    let requested = fixture.post_empty("/api/v1/repositories/repo/harvest").await;
    assert_eq!(requested.status, StatusCode::ACCEPTED);
    assert_eq!(requested.body["harvest_requested"], true);

    fixture.run_identifier_harvests().await;

    let pending = fixture.get("/api/v1/records?repository_id=repo&status=pending").await;
    assert_eq!(pending.status, StatusCode::OK);
    assert_eq!(pending.body["total"], 2);

    fixture.run_object_harvests().await;

    let detail = fixture.get("/api/v1/repositories/repo").await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.body["state"], "idle");
    assert_eq!(detail.body["harvest_requested"], false);
    assert_eq!(detail.body["records"]["done"], 2);
    assert_eq!(detail.body["datestamp"], "2024-01-01");

    let counts = fixture.get("/api/v1/records/counts").await;
    assert_eq!(counts.body["done"], 2);
    assert_eq!(counts.body["pending"], 0);
}

#[tokio::test]
async fn test_pause_resume_and_reports() {
    let fixture = TestFixture::new().await;
    let repo = create(&fixture, "flaky").await;
    fixture
        .fetcher
        .fail_with_status(&oai::list_identifiers_url(&repo), 503);

    // Threshold is two consecutive identifier failures
    for _ in 0..2 {
        let requested = fixture.post_empty("/api/v1/repositories/flaky/harvest").await;
        assert_eq!(requested.status, StatusCode::ACCEPTED);
        fixture.run_identifier_harvests().await;
    }

    let detail = fixture.get("/api/v1/repositories/flaky").await;
    assert_eq!(detail.body["state"], "paused_on_error");
    assert_eq!(fixture.mailer.sent().len(), 1);

    let refused = fixture.post_empty("/api/v1/repositories/flaky/harvest").await;
    assert_eq!(refused.status, StatusCode::CONFLICT);

    let reports = fixture
        .get("/api/v1/reports?repository_id=flaky&worker=identifier")
        .await;
    assert_eq!(reports.status, StatusCode::OK);
    assert_eq!(reports.body["total"], 2);
    assert_eq!(reports.body["reports"][0]["kind"], "transient_network");

    let bad_worker = fixture.get("/api/v1/reports?worker=robot").await;
    assert_eq!(bad_worker.status, StatusCode::BAD_REQUEST);

    let resumed = fixture.post_empty("/api/v1/repositories/flaky/resume").await;
    assert_eq!(resumed.status, StatusCode::OK);
    assert_eq!(resumed.body["state"], "idle");
    assert_eq!(resumed.body["consecutive_failures"], 0);
}

#[tokio::test]
async fn test_record_reset() {
    let fixture = TestFixture::new().await;
    let repo = create(&fixture, "repo").await;
    fixture.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(&[("oai:x:1", false)], None)),
    );
    fixture.post_empty("/api/v1/repositories/repo/harvest").await;
    fixture.run_identifier_harvests().await;

    let list = fixture.get("/api/v1/records").await;
    let id = list.body["records"][0]["id"].as_i64().unwrap();
    assert_eq!(list.body["records"][0]["status"], "pending");

    // No GetRecord response scripted, the download fails
    fixture.run_object_harvests().await;
    let failed = fixture.get(&format!("/api/v1/records/{}", id)).await;
    assert_eq!(failed.body["status"], "failed");

    let reset = fixture.post_empty(&format!("/api/v1/records/{}/reset", id)).await;
    assert_eq!(reset.status, StatusCode::OK);
    assert_eq!(reset.body["status"], "pending");

    let missing = fixture.post_empty("/api/v1/records/9999/reset").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_reset_failed() {
    let fixture = TestFixture::new().await;
    let repo = create(&fixture, "repo").await;
    fixture.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(
            &[("oai:x:1", false), ("oai:x:2", false)],
            None,
        )),
    );
    fixture.post_empty("/api/v1/repositories/repo/harvest").await;
    fixture.run_identifier_harvests().await;
    fixture.run_object_harvests().await;

    let reset = fixture.post_empty("/api/v1/repositories/repo/reset-failed").await;
    assert_eq!(reset.status, StatusCode::OK);
    assert_eq!(reset.body["reset"], 2);

    let unknown = fixture.post_empty("/api/v1/repositories/other/reset-failed").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enable_disable_and_interrupt() {
    let fixture = TestFixture::new().await;
    create(&fixture, "repo").await;

    let disabled = fixture.post_empty("/api/v1/repositories/repo/disable").await;
    assert_eq!(disabled.status, StatusCode::OK);
    assert_eq!(disabled.body["enabled"], false);

    let refused = fixture.post_empty("/api/v1/repositories/repo/harvest").await;
    assert_eq!(refused.status, StatusCode::CONFLICT);

    let enabled = fixture.post_empty("/api/v1/repositories/repo/enable").await;
    assert_eq!(enabled.body["enabled"], true);

    let interrupt = fixture.post_empty("/api/v1/repositories/repo/interrupt").await;
    assert_eq!(interrupt.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_daemon_intake_control() {
    let fixture = TestFixture::new().await;

    let status = fixture.get("/api/v1/daemons").await;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(status.body["daemons"].as_array().unwrap().len(), 2);

    let paused = fixture.post_empty("/api/v1/daemons/object-harvester/pause").await;
    assert_eq!(paused.status, StatusCode::OK);
    assert_eq!(paused.body["running"], false);
    assert!(!fixture.object_daemon.is_intake_running());

    let resumed = fixture.post_empty("/api/v1/daemons/object-harvester/resume").await;
    assert_eq!(resumed.body["running"], true);

    let unknown = fixture.post_empty("/api/v1/daemons/nightly/pause").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_calendar_run_requests_due_repositories() {
    let fixture = TestFixture::new().await;
    create(&fixture, "repo").await;

    // Never harvested and anchored at midnight, so due now
    let run = fixture.post_empty("/api/v1/calendar/run").await;
    assert_eq!(run.status, StatusCode::OK);
    assert_eq!(run.body["requested"], 1);

    let detail = fixture.get("/api/v1/repositories/repo").await;
    assert_eq!(detail.body["harvest_requested"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let metrics = fixture.get("/metrics").await;
    assert_eq!(metrics.status, StatusCode::OK);
    let text = metrics.body.as_str().unwrap();
    assert!(text.contains("harvester_records_by_status"));
    assert!(text.contains("harvester_http_requests_total"));
}

#[tokio::test]
async fn test_record_list_rejects_unknown_status() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/records?status=lost").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shutdown_closes_intake_before_draining() {
    let fixture = TestFixture::new().await;
    let repo = create(&fixture, "repo").await;
    let identifiers = ["oai:x:1", "oai:x:2", "oai:x:3", "oai:x:4"];
    let entries: Vec<(&str, bool)> = identifiers.iter().map(|id| (*id, false)).collect();
    fixture.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(&entries, None)),
    );
    for identifier in identifiers {
        fixture.fetcher.respond(
            &oai::get_record_url(BASE, identifier, "oai_dc"),
            FetchResponse::ok(fixtures::get_record(identifier)),
        );
    }
    fixture.post_empty("/api/v1/repositories/repo/harvest").await;
    fixture.run_identifier_harvests().await;
    assert_eq!(fixture.records.status_counts(None).unwrap().pending, 4);

    // A two-page re-harvest keeps the identifier daemon busy past the downloads
    let detail = fixture.get("/api/v1/repositories/repo").await;
    let repo: Repository = serde_json::from_value(detail.body).unwrap();
    fixture.fetcher.respond(
        &oai::list_identifiers_url(&repo),
        FetchResponse::ok(fixtures::list_identifiers(&entries[..2], Some("p2"))),
    );
    fixture.fetcher.respond(
        &oai::resume_url(BASE, "p2"),
        FetchResponse::ok(fixtures::list_identifiers(&entries[2..], None)),
    );
    fixture.fetcher.set_delay(Duration::from_millis(300));
    fixture.post_empty("/api/v1/repositories/repo/harvest").await;

    fixture.identifier_daemon.start().await;
    fixture.object_daemon.start().await;
    let mut started = false;
    for _ in 0..100 {
        if fixture.identifier_daemon.active_count().await == 1
            && fixture.records.status_counts(None).unwrap().processing == 2
        {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(started, "workers did not start");

    fixture.state.shutdown().await;

    assert!(!fixture.identifier_daemon.is_running());
    assert!(!fixture.object_daemon.is_running());
    assert!(!fixture.object_daemon.is_intake_running());
    let counts = fixture.records.status_counts(None).unwrap();
    assert_eq!(counts.done, 2);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.processing, 0);

    let detail = fixture.get("/api/v1/repositories/repo").await;
    assert_eq!(detail.body["state"], "idle");
}
