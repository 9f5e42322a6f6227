//! # Spreadsheet Adapter
//!
//! Mirrors the agency's events, clients, artists and expenses into one
//! spreadsheet, one tab per entity. Every write is a full overwrite of each
//! tab; targeted upserts run the same full resync.

use async_trait::async_trait;
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};

use super::error::SyncError;
use super::http::{endpoint, ensure_success, read_json};
use super::{JobContext, ProviderAdapter, wrong_provider};
use crate::config::AppConfig;
use crate::jobs::{JobRequest, SpreadsheetJob};
use crate::models::{Provider, artist, client, event, expense};
use crate::repositories::integration_connection::{
    CONFIG_SPREADSHEET_ID, CONFIG_SPREADSHEET_URL, config_str,
};
use crate::repositories::{
    DirectoryRepository, EventRepository, ExpenseRepository, IntegrationConnectionRepository,
};

const PROVIDER: Provider = Provider::Spreadsheet;
const SPREADSHEET_TITLE: &str = "Agency Sync";

pub const TAB_EVENTS: &str = "Events";
pub const TAB_CLIENTS: &str = "Clients";
pub const TAB_ARTISTS: &str = "Artists";
pub const TAB_EXPENSES: &str = "Expenses";
pub const TABS: [&str; 4] = [TAB_EVENTS, TAB_CLIENTS, TAB_ARTISTS, TAB_EXPENSES];

pub const EVENT_COLUMNS: [&str; 13] = [
    "id",
    "event_date",
    "status",
    "client_id",
    "artist_id",
    "description",
    "location",
    "amount",
    "payment_date",
    "document_type",
    "calendar_sync_status",
    "invoice_document_number",
    "invoice_sync_status",
];
pub const CLIENT_COLUMNS: [&str; 6] = ["id", "name", "business_name", "email", "phone", "tax_id"];
pub const ARTIST_COLUMNS: [&str; 5] = ["id", "name", "email", "phone", "calendar_id"];
pub const EXPENSE_COLUMNS: [&str; 7] = [
    "id",
    "expense_date",
    "description",
    "supplier_name",
    "amount",
    "invoice_sync_status",
    "invoice_document_id",
];

type Row = Vec<JsonValue>;

fn text(value: Option<&str>) -> JsonValue {
    JsonValue::String(value.unwrap_or_default().to_string())
}

fn number(value: Option<f64>) -> JsonValue {
    value
        .filter(|v| v.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(String::new()))
}

fn header(columns: &[&str]) -> Row {
    columns.iter().map(|c| JsonValue::String(c.to_string())).collect()
}

pub fn event_rows(events: &[event::Model]) -> Vec<Row> {
    std::iter::once(header(&EVENT_COLUMNS))
        .chain(events.iter().map(|e| {
            vec![
                text(Some(&e.id)),
                JsonValue::String(e.event_date.to_string()),
                text(Some(&e.status)),
                text(e.client_id.as_deref()),
                text(e.artist_id.as_deref()),
                text(e.description.as_deref()),
                text(e.location.as_deref()),
                number(e.amount),
                text(e.payment_date.map(|d| d.to_string()).as_deref()),
                text(e.document_type.as_deref()),
                text(e.calendar_sync_status.as_deref()),
                text(e.invoice_document_number.as_deref()),
                text(e.invoice_sync_status.as_deref()),
            ]
        }))
        .collect()
}

pub fn client_rows(clients: &[client::Model]) -> Vec<Row> {
    std::iter::once(header(&CLIENT_COLUMNS))
        .chain(clients.iter().map(|c| {
            vec![
                text(Some(&c.id)),
                text(Some(&c.name)),
                text(c.business_name.as_deref()),
                text(c.email.as_deref()),
                text(c.phone.as_deref()),
                text(c.tax_id.as_deref()),
            ]
        }))
        .collect()
}

pub fn artist_rows(artists: &[artist::Model]) -> Vec<Row> {
    std::iter::once(header(&ARTIST_COLUMNS))
        .chain(artists.iter().map(|a| {
            vec![
                text(Some(&a.id)),
                text(Some(&a.name)),
                text(a.email.as_deref()),
                text(a.phone.as_deref()),
                text(a.calendar_id.as_deref()),
            ]
        }))
        .collect()
}

pub fn expense_rows(expenses: &[expense::Model]) -> Vec<Row> {
    std::iter::once(header(&EXPENSE_COLUMNS))
        .chain(expenses.iter().map(|x| {
            vec![
                text(Some(&x.id)),
                JsonValue::String(x.expense_date.to_string()),
                text(x.description.as_deref()),
                text(x.supplier_name.as_deref()),
                number(x.amount),
                text(Some(&x.invoice_sync_status)),
                text(x.invoice_document_id.as_deref()),
            ]
        }))
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Row],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
    #[serde(default)]
    spreadsheet_url: Option<String>,
}

#[derive(Clone)]
pub struct SpreadsheetAdapter {
    http: Client,
    api_base: String,
    events: EventRepository,
    directory: DirectoryRepository,
    expenses: ExpenseRepository,
    connections: IntegrationConnectionRepository,
}

impl SpreadsheetAdapter {
    pub fn new(http: Client, config: &AppConfig, db: DatabaseConnection) -> Self {
        Self {
            http,
            api_base: config.google.sheets_api_base.clone(),
            events: EventRepository::new(db.clone()),
            directory: DirectoryRepository::new(db.clone()),
            expenses: ExpenseRepository::new(db.clone()),
            connections: IntegrationConnectionRepository::new(db),
        }
    }

    /// Return the agency's spreadsheet id, creating the spreadsheet on first use.
    async fn ensure_spreadsheet(&self, ctx: &JobContext) -> Result<(String, bool), SyncError> {
        let connection = self.connections.get_or_create(ctx.agency_id, PROVIDER).await?;
        if let Some(existing) = config_str(&connection, CONFIG_SPREADSHEET_ID) {
            return Ok((existing.to_string(), false));
        }

        let sheets: Vec<JsonValue> = TABS
            .iter()
            .map(|tab| json!({ "properties": { "title": tab } }))
            .collect();
        let url = endpoint(&self.api_base, &["spreadsheets"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&ctx.access_token)
            .json(&json!({
                "properties": { "title": SPREADSHEET_TITLE },
                "sheets": sheets,
            }))
            .send()
            .await?;
        let created: CreatedSpreadsheet = read_json(PROVIDER, response).await?;

        let extra: Vec<(&str, &str)> = created
            .spreadsheet_url
            .as_deref()
            .map(|u| vec![(CONFIG_SPREADSHEET_URL, u)])
            .unwrap_or_default();
        let stored = self
            .connections
            .set_config_if_absent(
                ctx.agency_id,
                PROVIDER,
                CONFIG_SPREADSHEET_ID,
                &created.spreadsheet_id,
                &extra,
            )
            .await?;

        if stored != created.spreadsheet_id {
            warn!(
                created = %created.spreadsheet_id,
                stored = %stored,
                "Another writer stored a spreadsheet first; using theirs"
            );
            return Ok((stored, false));
        }
        info!(spreadsheet_id = %stored, "Spreadsheet created");
        Ok((stored, true))
    }

    async fn overwrite_tab(
        &self,
        ctx: &JobContext,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[Row],
    ) -> Result<(), SyncError> {
        let clear = endpoint(
            &self.api_base,
            &["spreadsheets", spreadsheet_id, "values", &format!("{tab}:clear")],
        )?;
        let response = self
            .http
            .post(clear)
            .bearer_auth(&ctx.access_token)
            .json(&json!({}))
            .send()
            .await?;
        ensure_success(PROVIDER, response).await?;

        let range = format!("{tab}!A1");
        let mut update = endpoint(
            &self.api_base,
            &["spreadsheets", spreadsheet_id, "values", &range],
        )?;
        update.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let response = self
            .http
            .put(update)
            .bearer_auth(&ctx.access_token)
            .json(&ValueRange {
                range: &range,
                major_dimension: "ROWS",
                values: rows,
            })
            .send()
            .await?;
        ensure_success(PROVIDER, response).await?;
        Ok(())
    }

    async fn full_resync(&self, ctx: &JobContext) -> Result<JsonValue, SyncError> {
        let (spreadsheet_id, created) = self.ensure_spreadsheet(ctx).await?;

        let tabs = [
            (
                TAB_EVENTS,
                event_rows(&self.events.list_for_agency(ctx.agency_id).await?),
            ),
            (
                TAB_CLIENTS,
                client_rows(&self.directory.list_clients(ctx.agency_id).await?),
            ),
            (
                TAB_ARTISTS,
                artist_rows(&self.directory.list_artists(ctx.agency_id).await?),
            ),
            (
                TAB_EXPENSES,
                expense_rows(&self.expenses.list_for_agency(ctx.agency_id).await?),
            ),
        ];

        let mut written = Map::new();
        for (tab, rows) in &tabs {
            self.overwrite_tab(ctx, &spreadsheet_id, tab, rows).await?;
            // header row excluded
            written.insert((*tab).to_string(), json!(rows.len() - 1));
        }

        self.connections.mark_synced(ctx.agency_id, PROVIDER).await?;
        info!(spreadsheet_id = %spreadsheet_id, "Spreadsheet resynced");

        Ok(json!({
            "spreadsheetId": spreadsheet_id,
            "created": created,
            "rows": written,
        }))
    }
}

#[async_trait]
impl ProviderAdapter for SpreadsheetAdapter {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    async fn execute(&self, ctx: &JobContext, request: JobRequest) -> Result<JsonValue, SyncError> {
        let JobRequest::Spreadsheet(job) = request else {
            return Err(wrong_provider(PROVIDER, &request));
        };
        match job {
            SpreadsheetJob::FullResync => self.full_resync(ctx).await,
            SpreadsheetJob::Upsert { kind, input } => {
                let mut result = self.full_resync(ctx).await?;
                if let Some(map) = result.as_object_mut() {
                    map.insert("requestedKind".into(), json!(kind));
                    map.insert("requested".into(), json!(input));
                }
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn test_header_matches_row_width() {
        let expense = expense::Model {
            id: "X1".into(),
            agency_id: Uuid::nil(),
            description: Some("Sound system".into()),
            supplier_name: None,
            amount: Some(250.0),
            expense_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            invoice_sync_status: "not-synced".into(),
            invoice_sync_error: None,
            invoice_document_id: None,
            invoice_synced_at: None,
        };
        let rows = expense_rows(&[expense]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), EXPENSE_COLUMNS.len());
        assert_eq!(rows[1].len(), EXPENSE_COLUMNS.len());
        assert_eq!(rows[1][1], json!("2025-02-01"));
        assert_eq!(rows[1][3], json!(""));
        assert_eq!(rows[1][4], json!(250.0));
    }

    #[test]
    fn test_empty_entity_list_still_writes_header() {
        let rows = client_rows(&[]);
        assert_eq!(rows, vec![header(&CLIENT_COLUMNS)]);
    }

    #[test]
    fn test_non_finite_amount_renders_blank() {
        assert_eq!(number(Some(f64::NAN)), json!(""));
        assert_eq!(number(None), json!(""));
    }
}
