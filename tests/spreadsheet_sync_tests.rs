//! Spreadsheet full resync against a mock Sheets API.

mod test_utils;

use agency_sync::dispatcher::Dispatcher;
use agency_sync::jobs::{JobRequest, KIND_UPSERT, SpreadsheetJob, SpreadsheetUpsertInput};
use agency_sync::models::{JobStatus, Provider, sync_job};
use agency_sync::repositories::integration_connection::{
    CONFIG_SPREADSHEET_ID, CONFIG_SPREADSHEET_URL, config_str,
};
use agency_sync::repositories::{IntegrationConnectionRepository, SyncJobRepository};
use chrono::Duration;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use test_utils::*;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHEET: &str = "sheet-1";

async fn setup() -> (MockServer, DatabaseConnection, Dispatcher, Uuid) {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let dispatcher = Dispatcher::from_config(&test_config(&server.uri()), db.clone()).unwrap();
    let agency_id = Uuid::new_v4();
    seed_oauth_credential(&db, agency_id, Provider::Spreadsheet, "sheets-token", Duration::hours(1))
        .await
        .unwrap();
    (server, db, dispatcher, agency_id)
}

async fn run(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    agency_id: Uuid,
    request: JobRequest,
) -> sync_job::Model {
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs.enqueue(agency_id, &request).await.unwrap();
    dispatcher.run_batch(Some(1)).await.unwrap();
    jobs.find(job.id).await.unwrap().unwrap()
}

async fn mount_tab_writes(server: &MockServer, expected_runs: u64) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/sheets/v4/spreadsheets/sheet-1/values/[A-Za-z]+:clear$"))
        .and(header("authorization", "Bearer sheets-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(4 * expected_runs)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/sheets/v4/spreadsheets/sheet-1/values/[A-Za-z]+!A1$"))
        .and(query_param("valueInputOption", "RAW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(4 * expected_runs)
        .mount(server)
        .await;
}

#[tokio::test]
async fn full_resync_creates_spreadsheet_once_and_overwrites_tabs() {
    let (server, db, dispatcher, agency_id) = setup().await;
    insert_client(&db, agency_id, "C1", "Acme Events", None)
        .await
        .unwrap();
    insert_artist(&db, agency_id, "A1", "The Quartet", None)
        .await
        .unwrap();
    insert_event(&db, agency_id, "E1", Some("C1"), Some("A1"), Some(1500.0))
        .await
        .unwrap();
    insert_event(&db, agency_id, "E2", Some("C1"), None, None)
        .await
        .unwrap();
    insert_expense(&db, agency_id, "X1", Some(99.9)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/sheets/v4/spreadsheets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": SHEET,
            "spreadsheetUrl": "https://docs.google.com/spreadsheets/d/sheet-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_tab_writes(&server, 2).await;

    let first = run(
        &db,
        &dispatcher,
        agency_id,
        JobRequest::Spreadsheet(SpreadsheetJob::FullResync),
    )
    .await;
    assert_eq!(first.status, JobStatus::Succeeded.as_str(), "{:?}", first.last_error);
    let result = first.result.unwrap();
    assert_eq!(result["spreadsheetId"], SHEET);
    assert_eq!(result["created"], true);
    assert_eq!(
        result["rows"],
        json!({ "Events": 2, "Clients": 1, "Artists": 1, "Expenses": 1 })
    );

    let connection = IntegrationConnectionRepository::new(db.clone())
        .find(agency_id, Provider::Spreadsheet)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config_str(&connection, CONFIG_SPREADSHEET_ID), Some(SHEET));
    assert_eq!(
        config_str(&connection, CONFIG_SPREADSHEET_URL),
        Some("https://docs.google.com/spreadsheets/d/sheet-1")
    );
    assert!(connection.last_synced_at.is_some());

    let second = run(
        &db,
        &dispatcher,
        agency_id,
        JobRequest::Spreadsheet(SpreadsheetJob::FullResync),
    )
    .await;
    let result = second.result.unwrap();
    assert_eq!(result["spreadsheetId"], SHEET);
    assert_eq!(result["created"], false);

    // Each tab is written as a header row followed by one row per entity.
    let requests = server.received_requests().await.unwrap();
    let events_write = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT" && r.url.path().ends_with("/Events!A1"))
        .unwrap();
    let body: JsonValue = serde_json::from_slice(&events_write.body).unwrap();
    assert_eq!(body["majorDimension"], "ROWS");
    let values = body["values"].as_array().unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[0][0], "id");
    assert_eq!(values[1][0], "E1");
    assert_eq!(values[1][7], 1500.0);
    assert_eq!(values[2][7], "");
}

#[tokio::test]
async fn targeted_upsert_runs_a_full_resync() {
    let (server, db, dispatcher, agency_id) = setup().await;
    IntegrationConnectionRepository::new(db.clone())
        .set_config_if_absent(agency_id, Provider::Spreadsheet, CONFIG_SPREADSHEET_ID, SHEET, &[])
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/sheets/v4/spreadsheets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "spreadsheetId": "other" })))
        .expect(0)
        .mount(&server)
        .await;
    mount_tab_writes(&server, 1).await;

    let job = run(
        &db,
        &dispatcher,
        agency_id,
        JobRequest::Spreadsheet(SpreadsheetJob::Upsert {
            kind: KIND_UPSERT,
            input: SpreadsheetUpsertInput {
                entity: Some("event".to_string()),
                entity_id: Some("E1".to_string()),
            },
        }),
    )
    .await;
    assert_eq!(job.status, JobStatus::Succeeded.as_str(), "{:?}", job.last_error);
    let result = job.result.unwrap();
    assert_eq!(result["spreadsheetId"], SHEET);
    assert_eq!(result["requestedKind"], "upsert");
    assert_eq!(result["requested"]["entityId"], "E1");
    assert_eq!(result["rows"]["Events"], 0);
}

#[tokio::test]
async fn failed_tab_write_fails_the_job() {
    let (server, db, dispatcher, agency_id) = setup().await;
    IntegrationConnectionRepository::new(db.clone())
        .set_config_if_absent(agency_id, Provider::Spreadsheet, CONFIG_SPREADSHEET_ID, SHEET, &[])
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path_regex(r":clear$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let job = run(
        &db,
        &dispatcher,
        agency_id,
        JobRequest::Spreadsheet(SpreadsheetJob::FullResync),
    )
    .await;
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert_eq!(job.error_kind.as_deref(), Some("transient"));
}
