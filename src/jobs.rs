//! Typed job requests.
//!
//! A job row stores `(provider, kind, payload)` as loose columns. At dispatch
//! time the triple is parsed into a [`JobRequest`], so each adapter operation
//! receives a strongly-typed input and shape mismatches fail fast.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::error::SyncError;
use crate::models::Provider;

pub const KIND_EVENT_UPSERT: &str = "event-upsert";
pub const KIND_CALENDAR_PULL: &str = "calendar-pull";
pub const KIND_WATCH_CREATE: &str = "watch-create";
pub const KIND_WATCH_RENEW_ALL: &str = "watch-renew-all";
pub const KIND_ARTIST_CALENDAR_PROVISION: &str = "artist-calendar-provision";
pub const KIND_DOCUMENT_CREATE: &str = "document-create";
pub const KIND_EXPENSES_SYNC: &str = "expenses-sync";
pub const KIND_FULL_RESYNC: &str = "full-resync";
pub const KIND_UPSERT: &str = "upsert";

fn default_true() -> bool {
    true
}

/// Input for calendar `event-upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventUpsertInput {
    pub event_id: String,
    /// Ask the provider to notify attendees. Defaults to true; opting out must be explicit.
    #[serde(default = "default_true")]
    pub send_invites: bool,
}

/// Input for `calendar-pull`. `channel_id` is the channel row id, which is
/// stable across renewals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarPullInput {
    pub channel_id: Uuid,
}

/// Owner of a watched calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChannelScope {
    /// The agency's main calendar
    Company,
    /// A secondary calendar owned by one artist
    Artist,
}

impl ChannelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelScope::Company => "company",
            ChannelScope::Artist => "artist",
        }
    }
}

/// Input for `watch-create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchCreateInput {
    pub calendar_id: String,
    #[serde(default = "default_scope")]
    pub scope: ChannelScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_entity_id: Option<String>,
}

fn default_scope() -> ChannelScope {
    ChannelScope::Company
}

/// Input for `artist-calendar-provision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtistCalendarInput {
    pub artist_id: String,
}

/// Input for invoicing `document-create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCreateInput {
    pub event_id: String,
}

/// Input for a targeted spreadsheet write. Targets are accepted for the
/// record and otherwise ignored: every spreadsheet write is a full resync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetUpsertInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalendarJob {
    EventUpsert(EventUpsertInput),
    Pull(CalendarPullInput),
    WatchCreate(WatchCreateInput),
    WatchRenewAll,
    ProvisionArtistCalendar(ArtistCalendarInput),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvoicingJob {
    DocumentCreate(DocumentCreateInput),
    ExpensesSync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpreadsheetJob {
    FullResync,
    /// `kind` is kept so the stored job round-trips unchanged.
    Upsert {
        kind: &'static str,
        input: SpreadsheetUpsertInput,
    },
}

/// A job's operation and input, keyed by `(provider, kind)`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Calendar(CalendarJob),
    Invoicing(InvoicingJob),
    Spreadsheet(SpreadsheetJob),
}

/// Internal entity whose sync marker reflects a job's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityMarker {
    EventCalendar { event_id: String },
    EventInvoice { event_id: String },
}

fn decode<T: serde::de::DeserializeOwned>(
    provider: Provider,
    kind: &str,
    payload: &JsonValue,
) -> Result<T, SyncError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::validation(format!("invalid payload for {provider}/{kind}: {e}")))
}

impl JobRequest {
    /// Parse a stored job into its typed request.
    ///
    /// Unknown `(provider, kind)` pairs are configuration errors; payloads that do
    /// not match the operation's input shape are validation errors.
    pub fn parse(provider: Provider, kind: &str, payload: &JsonValue) -> Result<Self, SyncError> {
        let request = match (provider, kind) {
            (Provider::Calendar, KIND_EVENT_UPSERT) => JobRequest::Calendar(
                CalendarJob::EventUpsert(decode(provider, kind, payload)?),
            ),
            (Provider::Calendar, KIND_CALENDAR_PULL) => {
                JobRequest::Calendar(CalendarJob::Pull(decode(provider, kind, payload)?))
            }
            (Provider::Calendar, KIND_WATCH_CREATE) => {
                JobRequest::Calendar(CalendarJob::WatchCreate(decode(provider, kind, payload)?))
            }
            (Provider::Calendar, KIND_WATCH_RENEW_ALL) => {
                JobRequest::Calendar(CalendarJob::WatchRenewAll)
            }
            (Provider::Calendar, KIND_ARTIST_CALENDAR_PROVISION) => JobRequest::Calendar(
                CalendarJob::ProvisionArtistCalendar(decode(provider, kind, payload)?),
            ),
            (Provider::Invoicing, KIND_DOCUMENT_CREATE) => JobRequest::Invoicing(
                InvoicingJob::DocumentCreate(decode(provider, kind, payload)?),
            ),
            (Provider::Invoicing, KIND_EXPENSES_SYNC) => {
                JobRequest::Invoicing(InvoicingJob::ExpensesSync)
            }
            (Provider::Spreadsheet, KIND_FULL_RESYNC) => {
                JobRequest::Spreadsheet(SpreadsheetJob::FullResync)
            }
            (Provider::Spreadsheet, KIND_EVENT_UPSERT) => {
                JobRequest::Spreadsheet(SpreadsheetJob::Upsert {
                    kind: KIND_EVENT_UPSERT,
                    input: decode_optional(provider, kind, payload)?,
                })
            }
            (Provider::Spreadsheet, KIND_UPSERT) => {
                JobRequest::Spreadsheet(SpreadsheetJob::Upsert {
                    kind: KIND_UPSERT,
                    input: decode_optional(provider, kind, payload)?,
                })
            }
            (provider, kind) => {
                return Err(SyncError::configuration(format!(
                    "unsupported job kind '{kind}' for provider {provider}"
                )));
            }
        };
        Ok(request)
    }

    pub fn provider(&self) -> Provider {
        match self {
            JobRequest::Calendar(_) => Provider::Calendar,
            JobRequest::Invoicing(_) => Provider::Invoicing,
            JobRequest::Spreadsheet(_) => Provider::Spreadsheet,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::Calendar(CalendarJob::EventUpsert(_)) => KIND_EVENT_UPSERT,
            JobRequest::Calendar(CalendarJob::Pull(_)) => KIND_CALENDAR_PULL,
            JobRequest::Calendar(CalendarJob::WatchCreate(_)) => KIND_WATCH_CREATE,
            JobRequest::Calendar(CalendarJob::WatchRenewAll) => KIND_WATCH_RENEW_ALL,
            JobRequest::Calendar(CalendarJob::ProvisionArtistCalendar(_)) => {
                KIND_ARTIST_CALENDAR_PROVISION
            }
            JobRequest::Invoicing(InvoicingJob::DocumentCreate(_)) => KIND_DOCUMENT_CREATE,
            JobRequest::Invoicing(InvoicingJob::ExpensesSync) => KIND_EXPENSES_SYNC,
            JobRequest::Spreadsheet(SpreadsheetJob::FullResync) => KIND_FULL_RESYNC,
            JobRequest::Spreadsheet(SpreadsheetJob::Upsert { kind, .. }) => *kind,
        }
    }

    /// Payload to persist on the job row.
    pub fn payload(&self) -> JsonValue {
        let encoded = match self {
            JobRequest::Calendar(CalendarJob::EventUpsert(input)) => serde_json::to_value(input),
            JobRequest::Calendar(CalendarJob::Pull(input)) => serde_json::to_value(input),
            JobRequest::Calendar(CalendarJob::WatchCreate(input)) => serde_json::to_value(input),
            JobRequest::Calendar(CalendarJob::ProvisionArtistCalendar(input)) => {
                serde_json::to_value(input)
            }
            JobRequest::Invoicing(InvoicingJob::DocumentCreate(input)) => {
                serde_json::to_value(input)
            }
            JobRequest::Spreadsheet(SpreadsheetJob::Upsert { input, .. }) => {
                serde_json::to_value(input)
            }
            JobRequest::Calendar(CalendarJob::WatchRenewAll)
            | JobRequest::Invoicing(InvoicingJob::ExpensesSync)
            | JobRequest::Spreadsheet(SpreadsheetJob::FullResync) => {
                Ok(JsonValue::Object(Default::default()))
            }
        };
        encoded.unwrap_or_else(|_| JsonValue::Object(Default::default()))
    }

    /// The entity whose visible sync state should carry this job's failure.
    pub fn entity_marker(&self) -> Option<EntityMarker> {
        match self {
            JobRequest::Calendar(CalendarJob::EventUpsert(input)) => {
                Some(EntityMarker::EventCalendar {
                    event_id: input.event_id.clone(),
                })
            }
            JobRequest::Invoicing(InvoicingJob::DocumentCreate(input)) => {
                Some(EntityMarker::EventInvoice {
                    event_id: input.event_id.clone(),
                })
            }
            _ => None,
        }
    }
}

fn decode_optional(
    provider: Provider,
    kind: &str,
    payload: &JsonValue,
) -> Result<SpreadsheetUpsertInput, SyncError> {
    if payload.is_null() {
        return Ok(SpreadsheetUpsertInput::default());
    }
    decode(provider, kind, payload)
}
