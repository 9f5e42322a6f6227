//! # Tests for Handlers
//!
//! Router-level tests against an in-memory SQLite store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use chrono::{Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::SECRET_HEADER;
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::jobs::{CalendarJob, ChannelScope, EventUpsertInput, JobRequest};
use crate::models::JobStatus;
use crate::repositories::webhook_channel::ChannelRegistration;
use crate::repositories::{SyncJobRepository, WebhookChannelRepository};
use crate::server::{AppState, create_app};

const SECRET: &str = "trigger-secret";

async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

async fn test_app() -> (Router, DatabaseConnection) {
    let db = test_db().await;
    let config = AppConfig {
        profile: "test".to_string(),
        trigger_secret: Some(SECRET.to_string()),
        crypto_key: Some(vec![7u8; 32]),
        ..AppConfig::default()
    };
    let dispatcher = Dispatcher::from_config(&config, db.clone()).unwrap();
    let state = AppState {
        config: Arc::new(config),
        db: db.clone(),
        dispatcher,
    };
    (create_app(state), db)
}

fn request(method: Method, uri: &str, secret: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn upsert_request(event_id: &str) -> JobRequest {
    JobRequest::Calendar(CalendarJob::EventUpsert(EventUpsertInput {
        event_id: event_id.to_string(),
        send_invites: true,
    }))
}

async fn insert_channel(
    db: &DatabaseConnection,
    agency_id: Uuid,
) -> crate::models::webhook_channel::Model {
    WebhookChannelRepository::new(db.clone())
        .upsert_for_calendar(
            agency_id,
            ChannelScope::Company,
            None,
            "primary",
            &ChannelRegistration {
                channel_id: "chan-1".to_string(),
                channel_token: "tok-1".to_string(),
                resource_id: Some("res-1".to_string()),
                expiration: (Utc::now() + Duration::days(7)).fixed_offset(),
            },
            "sync-1".to_string(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_root_returns_service_info() {
    let (app, _db) = test_app().await;
    let response = app
        .oneshot(request(Method::GET, "/", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "agency-sync");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_healthz_reports_database() {
    let (app, _db) = test_app().await;
    let response = app
        .oneshot(request(Method::GET, "/healthz", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-trace-id"));
    let body = json_body(response).await;
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_dispatch_without_secret_processes_nothing() {
    let (app, db) = test_app().await;
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs
        .enqueue(Uuid::new_v4(), &upsert_request("E1"))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/jobs/dispatch", None, Some(json!({"limit": 5}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );

    let response = app
        .oneshot(request(
            Method::POST,
            "/jobs/dispatch",
            Some("wrong"),
            Some(json!({"limit": 5})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending.as_str());
    assert!(stored.started_at.is_none());
}

#[tokio::test]
async fn test_dispatch_fails_job_without_credentials() {
    let (app, db) = test_app().await;
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs
        .enqueue(Uuid::new_v4(), &upsert_request("E1"))
        .await
        .unwrap();

    let response = app
        .oneshot(request(Method::POST, "/jobs/dispatch?secret=trigger-secret", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["processed"], 1);
    assert_eq!(body["results"][0]["id"], job.id.to_string());
    assert_eq!(body["results"][0]["status"], "failed");
    assert_eq!(body["results"][0]["errorKind"], "configuration");

    let stored = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed.as_str());
    assert_eq!(stored.error_kind.as_deref(), Some("configuration"));
}

#[tokio::test]
async fn test_create_job_validates_kind_and_payload() {
    let (app, _db) = test_app().await;
    let agency_id = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/jobs",
            Some(SECRET),
            Some(json!({"agencyId": agency_id, "provider": "calendar", "kind": "teleport"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/jobs",
            Some(SECRET),
            Some(json!({"agencyId": agency_id, "provider": "calendar", "kind": "event-upsert", "payload": {}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/jobs",
            Some(SECRET),
            Some(json!({
                "agencyId": agency_id,
                "provider": "calendar",
                "kind": "event-upsert",
                "payload": {"eventId": "E1"}
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["payload"]["eventId"], "E1");

    let uri = format!("/jobs?agency_id={agency_id}&status=pending");
    let response = app
        .oneshot(request(Method::GET, &uri, Some(SECRET), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    assert_eq!(listed["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(listed["jobs"][0]["id"], created["id"]);
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_status() {
    let (app, _db) = test_app().await;
    let response = app
        .oneshot(request(Method::GET, "/jobs?status=queued", Some(SECRET), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retry_only_failed_jobs() {
    let (app, db) = test_app().await;
    let jobs = SyncJobRepository::new(db.clone());
    let pending = jobs
        .enqueue(Uuid::new_v4(), &upsert_request("E1"))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            &format!("/jobs/{}/retry", pending.id),
            Some(SECRET),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            &format!("/jobs/{}/retry", Uuid::new_v4()),
            Some(SECRET),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    jobs.claim(pending.id).await.unwrap().unwrap();
    jobs.mark_failed(pending.id, "boom", crate::adapters::SyncErrorKind::Transient)
        .await
        .unwrap();

    let response = app
        .oneshot(request(
            Method::POST,
            &format!("/jobs/{}/retry", pending.id),
            Some(SECRET),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let retried = json_body(response).await;
    assert_eq!(retried["status"], "pending");
    assert_eq!(retried["retryOf"], pending.id.to_string());
    assert_ne!(retried["id"], pending.id.to_string());

    let original = jobs.find(pending.id).await.unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed.as_str());
}

#[tokio::test]
async fn test_reconcile_enqueues_one_sweep_per_agency() {
    let (app, db) = test_app().await;
    let agency_id = Uuid::new_v4();
    insert_channel(&db, agency_id).await;

    let response = app
        .oneshot(request(Method::POST, "/jobs/reconcile", Some(SECRET), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["enqueued"], 1);

    let job_id: Uuid = body["jobIds"][0].as_str().unwrap().parse().unwrap();
    let job = SyncJobRepository::new(db).find(job_id).await.unwrap().unwrap();
    assert_eq!(job.agency_id, agency_id);
    assert_eq!(job.kind, "watch-renew-all");
}

#[tokio::test]
async fn test_calendar_push_notifications() {
    let (app, db) = test_app().await;
    let agency_id = Uuid::new_v4();
    let channel = insert_channel(&db, agency_id).await;

    let push = |channel_id: &str, token: &str, state: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/webhooks/google-calendar")
            .header("X-Goog-Channel-ID", channel_id)
            .header("X-Goog-Channel-Token", token)
            .header("X-Goog-Resource-State", state)
            .body(Body::empty())
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(push("unknown", "tok-1", "exists"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(push("chan-1", "tok-2", "exists"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(push("chan-1", "tok-1", "sync"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let jobs = SyncJobRepository::new(db.clone());
    let pending = jobs.pending_ids(10).await.unwrap();
    assert!(pending.is_empty());

    let response = app
        .oneshot(push("chan-1", "tok-1", "exists"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

    let job = jobs.find(job_id).await.unwrap().unwrap();
    assert_eq!(job.kind, "calendar-pull");
    assert_eq!(job.agency_id, agency_id);
    assert_eq!(job.payload["channelId"], channel.id.to_string());
}
