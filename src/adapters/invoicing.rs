//! # Invoicing Adapter
//!
//! Issues income documents for events and records supplier expenses.
//!
//! The bearer token in the job context comes from the token manager's
//! id+secret exchange; this module only performs the document calls.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use super::error::{SyncError, SyncErrorKind, truncate_message};
use super::http::{endpoint, read_json};
use super::{JobContext, ProviderAdapter, wrong_provider};
use crate::config::AppConfig;
use crate::jobs::{DocumentCreateInput, InvoicingJob, JobRequest};
use crate::models::{Provider, client, event, expense};
use crate::repositories::event::IssuedDocument;
use crate::repositories::{
    DirectoryRepository, EventRepository, ExpenseRepository, IntegrationConnectionRepository,
};

const PROVIDER: Provider = Provider::Invoicing;

pub const DOC_QUOTE: u16 = 10;
pub const DOC_PROFORMA: u16 = 300;
pub const DOC_INVOICE: u16 = 305;
pub const DOC_INVOICE_RECEIPT: u16 = 320;
pub const DOC_CREDIT: u16 = 330;
pub const DOC_RECEIPT: u16 = 400;

const PAYMENT_TYPE_BANK_TRANSFER: u8 = 4;

/// Provider document-type code for an internal document type name.
/// Unknown or empty names issue a standard invoice.
pub fn document_type_code(document_type: Option<&str>) -> u16 {
    let normalized = document_type
        .map(|t| t.trim().to_ascii_lowercase().replace(['-', ' '], "_"))
        .unwrap_or_default();
    match normalized.as_str() {
        "quote" | "price_quote" => DOC_QUOTE,
        "proforma" | "proforma_invoice" => DOC_PROFORMA,
        "invoice" | "tax_invoice" => DOC_INVOICE,
        "invoice_receipt" | "tax_invoice_receipt" => DOC_INVOICE_RECEIPT,
        "credit" | "credit_invoice" => DOC_CREDIT,
        "receipt" => DOC_RECEIPT,
        _ => DOC_INVOICE,
    }
}

/// Document types that acknowledge a payment and therefore carry a payment line.
pub fn requires_payment_line(code: u16) -> bool {
    matches!(code, DOC_INVOICE_RECEIPT | DOC_RECEIPT)
}

/// Amounts must be finite and strictly positive.
pub fn validate_amount(amount: Option<f64>) -> Result<f64, SyncError> {
    match amount {
        Some(value) if value.is_finite() && value > 0.0 => Ok(value),
        Some(value) => Err(SyncError::validation(format!(
            "amount must be a positive number, got {value}"
        ))),
        None => Err(SyncError::validation("amount is missing")),
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentClient {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub add: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomeLine {
    pub description: String,
    pub quantity: u32,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    #[serde(rename = "type")]
    pub kind: u8,
    pub price: f64,
    pub currency: String,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    #[serde(rename = "type")]
    pub kind: u16,
    pub description: String,
    pub date: NaiveDate,
    pub lang: String,
    pub currency: String,
    pub client: DocumentClient,
    pub income: Vec<IncomeLine>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payment: Vec<PaymentLine>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Supplier<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ExpenseRequest<'a> {
    description: &'a str,
    supplier: Supplier<'a>,
    amount: f64,
    currency: &'a str,
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: String,
    #[serde(default)]
    number: Option<JsonValue>,
    /// Either a plain URL or a per-language map
    #[serde(default)]
    url: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CreatedExpense {
    id: String,
}

fn json_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl CreatedDocument {
    fn into_issued(self, language: &str) -> IssuedDocument {
        let url = self.url.as_ref().and_then(|url| match url {
            JsonValue::Object(by_language) => by_language
                .get(language)
                .or_else(|| by_language.get("origin"))
                .or_else(|| by_language.values().next())
                .and_then(json_text),
            other => json_text(other),
        });
        IssuedDocument {
            id: self.id,
            number: self.number.as_ref().and_then(json_text),
            url,
        }
    }
}

#[derive(Clone)]
pub struct InvoicingAdapter {
    http: Client,
    api_base: String,
    currency: String,
    language: String,
    events: EventRepository,
    directory: DirectoryRepository,
    expenses: ExpenseRepository,
    connections: IntegrationConnectionRepository,
}

impl InvoicingAdapter {
    pub fn new(http: Client, config: &AppConfig, db: DatabaseConnection) -> Self {
        Self {
            http,
            api_base: config.invoicing.api_base.clone(),
            currency: config.invoicing.currency.clone(),
            language: config.invoicing.language.clone(),
            events: EventRepository::new(db.clone()),
            directory: DirectoryRepository::new(db.clone()),
            expenses: ExpenseRepository::new(db.clone()),
            connections: IntegrationConnectionRepository::new(db),
        }
    }

    /// Build the document payload for an event.
    pub fn build_document(
        &self,
        event: &event::Model,
        client: Option<&client::Model>,
    ) -> Result<DocumentRequest, SyncError> {
        let amount = validate_amount(event.amount)
            .map_err(|e| SyncError::validation(format!("event {}: {e}", event.id)))?;
        let kind = document_type_code(event.document_type.as_deref());
        let description = event
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Event {}", event.event_date));

        let client = match client {
            Some(c) => DocumentClient {
                name: c.display_name().to_string(),
                emails: c
                    .email
                    .iter()
                    .map(|e| e.trim())
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect(),
                tax_id: c.tax_id.clone().filter(|t| !t.trim().is_empty()),
                phone: c.phone.clone().filter(|p| !p.trim().is_empty()),
                add: true,
            },
            None => {
                return Err(SyncError::validation(format!(
                    "event {} has no client to invoice",
                    event.id
                )));
            }
        };

        let payment = if requires_payment_line(kind) {
            vec![PaymentLine {
                kind: PAYMENT_TYPE_BANK_TRANSFER,
                price: amount,
                currency: self.currency.clone(),
                date: event.payment_date.unwrap_or(event.event_date),
            }]
        } else {
            Vec::new()
        };

        Ok(DocumentRequest {
            kind,
            description: description.clone(),
            date: event.event_date,
            lang: self.language.clone(),
            currency: self.currency.clone(),
            client,
            income: vec![IncomeLine {
                description,
                quantity: 1,
                price: amount,
                currency: self.currency.clone(),
            }],
            payment,
        })
    }

    async fn create_document(
        &self,
        ctx: &JobContext,
        input: DocumentCreateInput,
    ) -> Result<JsonValue, SyncError> {
        let event = self
            .events
            .find(ctx.agency_id, &input.event_id)
            .await?
            .ok_or_else(|| SyncError::validation(format!("event {} not found", input.event_id)))?;

        if let Some(existing) = event.invoice_document_id.as_deref().filter(|id| !id.is_empty()) {
            info!(event_id = %event.id, document_id = %existing, "Document already issued; skipping");
            return Ok(json!({
                "eventId": event.id,
                "documentId": existing,
                "documentNumber": event.invoice_document_number,
                "documentUrl": event.invoice_document_url,
                "skipped": true,
            }));
        }

        let client = match event.client_id.as_deref() {
            Some(id) => self.directory.find_client(ctx.agency_id, id).await?,
            None => None,
        };
        let request = self.build_document(&event, client.as_ref())?;

        let url = endpoint(&self.api_base, &["documents"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&ctx.access_token)
            .json(&request)
            .send()
            .await?;
        let created: CreatedDocument = read_json(PROVIDER, response).await?;
        let issued = created.into_issued(&self.language);

        self.events
            .record_invoice(ctx.agency_id, &event.id, &issued)
            .await?;
        self.connections.mark_synced(ctx.agency_id, PROVIDER).await?;
        info!(event_id = %event.id, document_id = %issued.id, kind = request.kind, "Document issued");

        Ok(json!({
            "eventId": event.id,
            "documentId": issued.id,
            "documentNumber": issued.number,
            "documentUrl": issued.url,
            "documentType": request.kind,
        }))
    }

    async fn create_expense(
        &self,
        ctx: &JobContext,
        expense: &expense::Model,
        amount: f64,
    ) -> Result<String, SyncError> {
        let description = expense
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("Expense");
        let supplier = expense
            .supplier_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Unknown supplier");

        let url = endpoint(&self.api_base, &["expenses"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&ctx.access_token)
            .json(&ExpenseRequest {
                description,
                supplier: Supplier { name: supplier },
                amount,
                currency: &self.currency,
                date: expense.expense_date,
            })
            .send()
            .await?;
        let created: CreatedExpense = read_json(PROVIDER, response).await?;
        Ok(created.id)
    }

    async fn sync_expenses(&self, ctx: &JobContext) -> Result<JsonValue, SyncError> {
        let pending = self.expenses.list_unsynced(ctx.agency_id).await?;
        let (mut synced, mut errored) = (0usize, 0usize);
        let mut errors = Vec::new();

        for expense in &pending {
            let outcome = match validate_amount(expense.amount) {
                Ok(amount) => self.create_expense(ctx, expense, amount).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(document_id) => {
                    self.expenses
                        .mark_synced(ctx.agency_id, &expense.id, &document_id)
                        .await?;
                    synced += 1;
                }
                // A rejected token fails every remaining call; the dispatcher refreshes.
                Err(err) if err.kind() == SyncErrorKind::Authentication => return Err(err),
                Err(err) => {
                    let message = truncate_message(&err.to_string(), 500);
                    warn!(expense_id = %expense.id, error = %message, "Expense sync failed");
                    self.expenses
                        .mark_error(ctx.agency_id, &expense.id, &message)
                        .await?;
                    errors.push(json!({ "expenseId": expense.id, "error": message }));
                    errored += 1;
                }
            }
        }

        if synced > 0 {
            self.connections.mark_synced(ctx.agency_id, PROVIDER).await?;
        }
        info!(synced, errored, total = pending.len(), "Expenses sync finished");

        Ok(json!({
            "synced": synced,
            "errored": errored,
            "total": pending.len(),
            "errors": errors,
        }))
    }
}

#[async_trait]
impl ProviderAdapter for InvoicingAdapter {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    async fn execute(&self, ctx: &JobContext, request: JobRequest) -> Result<JsonValue, SyncError> {
        let JobRequest::Invoicing(job) = request else {
            return Err(wrong_provider(PROVIDER, &request));
        };
        match job {
            InvoicingJob::DocumentCreate(input) => self.create_document(ctx, input).await,
            InvoicingJob::ExpensesSync => self.sync_expenses(ctx).await,
        }
    }
}
