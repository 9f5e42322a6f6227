//! Dispatcher claim, retry-after-refresh and batch semantics.

mod test_utils;

use agency_sync::dispatcher::Dispatcher;
use agency_sync::jobs::{CalendarJob, EventUpsertInput, InvoicingJob, JobRequest};
use agency_sync::models::{JobStatus, Provider, sync_job};
use agency_sync::repositories::{EventRepository, SyncJobRepository};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use test_utils::*;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upsert(event_id: &str) -> JobRequest {
    JobRequest::Calendar(CalendarJob::EventUpsert(EventUpsertInput {
        event_id: event_id.to_string(),
        send_invites: false,
    }))
}

fn renew_all() -> JobRequest {
    JobRequest::Calendar(CalendarJob::WatchRenewAll)
}

#[tokio::test]
async fn claim_is_exclusive() {
    let db = setup_test_db().await.unwrap();
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs.enqueue(Uuid::new_v4(), &renew_all()).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending.as_str());

    let claimed = jobs.claim(job.id).await.unwrap().expect("first claim wins");
    assert_eq!(claimed.status, JobStatus::Running.as_str());
    assert!(claimed.started_at.is_some());

    assert!(jobs.claim(job.id).await.unwrap().is_none());
    assert!(jobs.pending_ids(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn terminal_write_only_applies_to_running_jobs() {
    let db = setup_test_db().await.unwrap();
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs.enqueue(Uuid::new_v4(), &renew_all()).await.unwrap();

    // Still pending: nothing to finish.
    assert!(!jobs.mark_succeeded(job.id, json!({})).await.unwrap());

    jobs.claim(job.id).await.unwrap();
    assert!(jobs.mark_succeeded(job.id, json!({"ok": true})).await.unwrap());
    assert!(
        !jobs
            .mark_failed(job.id, "late failure", agency_sync::adapters::SyncErrorKind::Transient)
            .await
            .unwrap()
    );

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded.as_str());
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_the_job_retried_once() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let dispatcher = Dispatcher::from_config(&test_config(&server.uri()), db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Calendar, "revoked-token", Duration::hours(1))
        .await
        .unwrap();
    insert_event(&db, agency_id, "E1", None, None, None)
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .and(header("authorization", "Bearer revoked-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": 401, "message": "Invalid Credentials" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "gcal-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs.enqueue(agency_id, &upsert("E1")).await.unwrap();
    let report = dispatcher.run_batch(None).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.results[0].status, JobStatus::Succeeded);

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded.as_str());

    let credential = credential_repository(&db)
        .find(agency_id, Provider::Calendar)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.version, 1);
}

#[tokio::test]
async fn second_rejection_fails_with_authentication_and_marks_event() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let dispatcher = Dispatcher::from_config(&test_config(&server.uri()), db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Calendar, "revoked-token", Duration::hours(1))
        .await
        .unwrap();
    insert_event(&db, agency_id, "E1", None, None, None)
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs.enqueue(agency_id, &upsert("E1")).await.unwrap();
    dispatcher.run_batch(None).await.unwrap();

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed.as_str());
    assert_eq!(stored.error_kind.as_deref(), Some("authentication"));
    assert!(stored.result.is_none());
    assert!(stored.finished_at.is_some());

    let event = EventRepository::new(db.clone())
        .find(agency_id, "E1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.calendar_sync_status.as_deref(), Some("error"));
    assert!(event.calendar_sync_error.is_some());
    assert!(event.google_event_id.is_none());
}

#[tokio::test]
async fn one_failing_job_does_not_abort_the_batch() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let dispatcher = Dispatcher::from_config(&test_config(&server.uri()), db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Calendar, "cal-token", Duration::hours(1))
        .await
        .unwrap();

    let jobs = SyncJobRepository::new(db.clone());
    let missing_event = jobs.enqueue(agency_id, &upsert("nope")).await.unwrap();
    let no_credentials = jobs
        .enqueue(agency_id, &JobRequest::Invoicing(InvoicingJob::ExpensesSync))
        .await
        .unwrap();
    let renewal = jobs.enqueue(agency_id, &renew_all()).await.unwrap();

    // A row whose kind no adapter understands.
    let unknown = sync_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        agency_id: Set(agency_id),
        provider: Set("calendar".to_string()),
        kind: Set("teleport".to_string()),
        status: Set(JobStatus::Pending.as_str().to_string()),
        payload: Set(json!({})),
        result: Set(None),
        last_error: Set(None),
        error_kind: Set(None),
        retry_of: Set(None),
        created_at: Set(Utc::now().fixed_offset()),
        started_at: Set(None),
        finished_at: Set(None),
    }
    .insert(&db)
    .await
    .unwrap();

    let report = dispatcher.run_batch(None).await.unwrap();
    assert_eq!(report.processed, 4);

    let status = |model: sync_job::Model| (model.status, model.error_kind);
    let find = |id| {
        let jobs = jobs.clone();
        async move { jobs.find(id).await.unwrap().unwrap() }
    };
    assert_eq!(
        status(find(missing_event.id).await),
        ("failed".to_string(), Some("validation".to_string()))
    );
    assert_eq!(
        status(find(no_credentials.id).await),
        ("failed".to_string(), Some("configuration".to_string()))
    );
    assert_eq!(
        status(find(unknown.id).await),
        ("failed".to_string(), Some("configuration".to_string()))
    );
    let renewal = find(renewal.id).await;
    assert_eq!(renewal.status, "succeeded");
    assert_eq!(renewal.result.unwrap()["total"], 0);

    // Nothing left to pick up.
    assert_eq!(dispatcher.run_batch(None).await.unwrap().processed, 0);
}

#[tokio::test]
async fn batch_size_is_clamped() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let mut config = test_config(&server.uri());
    config.dispatch.default_batch_size = 1;
    config.dispatch.max_batch_size = 2;
    let dispatcher = Dispatcher::from_config(&config, db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Calendar, "cal-token", Duration::hours(1))
        .await
        .unwrap();

    let jobs = SyncJobRepository::new(db.clone());
    for _ in 0..4 {
        jobs.enqueue(agency_id, &renew_all()).await.unwrap();
    }

    assert_eq!(dispatcher.run_batch(Some(10)).await.unwrap().processed, 2);
    assert_eq!(dispatcher.run_batch(None).await.unwrap().processed, 1);
    assert_eq!(dispatcher.run_batch(Some(0)).await.unwrap().processed, 1);
    assert_eq!(dispatcher.run_batch(Some(2)).await.unwrap().processed, 0);
}

#[tokio::test]
async fn long_errors_are_truncated() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let mut config = test_config(&server.uri());
    config.dispatch.max_error_length = 40;
    let dispatcher = Dispatcher::from_config(&config, db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Calendar, "cal-token", Duration::hours(1))
        .await
        .unwrap();

    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs
        .enqueue(agency_id, &upsert(&"x".repeat(300)))
        .await
        .unwrap();
    dispatcher.run_batch(None).await.unwrap();

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed.as_str());
    assert!(stored.last_error.unwrap().chars().count() <= 40);
}
