//! Calendar v3 wire calls and payload shapes.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::adapters::error::SyncError;
use crate::adapters::http::{endpoint, ensure_success, read_json};
use crate::models::Provider;

/// Private extended-property keys binding a provider event to the internal event.
pub const PROP_AGENCY_ID: &str = "agencyId";
pub const PROP_EVENT_ID: &str = "eventId";

pub const STATUS_CANCELLED: &str = "cancelled";

const PROVIDER: Provider = Provider::Calendar;
const MAX_PAGE_SIZE: &str = "2500";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventDate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
}

impl EventDate {
    pub fn whole_day(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            date_time: None,
        }
    }

    /// Calendar day of this boundary; timed events use the offset they carry.
    pub fn calendar_day(&self) -> Option<NaiveDate> {
        self.date.or_else(|| {
            self.date_time
                .as_deref()
                .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                .map(|dt| dt.date_naive())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtendedProperties {
    #[serde(default)]
    pub private: HashMap<String, String>,
}

/// Event body written on insert and patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDate,
    pub end: EventDate,
    pub attendees: Vec<Attendee>,
    pub extended_properties: ExtendedProperties,
}

/// Event as returned by the provider. Deleted items may carry only `id` and `status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub start: Option<EventDate>,
    #[serde(default)]
    pub extended_properties: Option<ExtendedProperties>,
}

impl RemoteEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some(STATUS_CANCELLED)
    }

    pub fn private_property(&self, key: &str) -> Option<&str> {
        self.extended_properties
            .as_ref()
            .and_then(|props| props.private.get(key))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn start_day(&self) -> Option<NaiveDate> {
        self.start.as_ref().and_then(EventDate::calendar_day)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    #[serde(default)]
    pub items: Vec<RemoteEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct WatchParams {
    ttl: String,
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    address: &'a str,
    token: &'a str,
    params: WatchParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub id: String,
    pub resource_id: Option<String>,
    /// Milliseconds since the epoch, as a decimal string
    pub expiration: Option<String>,
}

impl WatchResponse {
    pub fn expiration_millis(&self) -> Option<i64> {
        self.expiration.as_deref().and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct NewCalendar<'a> {
    summary: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedCalendar {
    id: String,
}

/// `sendUpdates` query value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendUpdates {
    All,
    None,
}

impl SendUpdates {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendUpdates::All => "all",
            SendUpdates::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalendarApi {
    http: Client,
    base: String,
}

impl CalendarApi {
    pub fn new(http: Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }

    pub async fn insert_event(
        &self,
        token: &str,
        calendar_id: &str,
        body: &EventBody,
        send_updates: SendUpdates,
    ) -> Result<RemoteEvent, SyncError> {
        let mut url = endpoint(&self.base, &["calendars", calendar_id, "events"])?;
        url.query_pairs_mut()
            .append_pair("sendUpdates", send_updates.as_str());
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        read_json(PROVIDER, response).await
    }

    pub async fn patch_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
        body: &EventBody,
        send_updates: SendUpdates,
    ) -> Result<RemoteEvent, SyncError> {
        let mut url = endpoint(&self.base, &["calendars", calendar_id, "events", event_id])?;
        url.query_pairs_mut()
            .append_pair("sendUpdates", send_updates.as_str());
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        read_json(PROVIDER, response).await
    }

    /// One page of changes since `sync_token`. A 410 means the cursor is stale.
    pub async fn list_changes(
        &self,
        token: &str,
        calendar_id: &str,
        sync_token: &str,
        page_token: Option<&str>,
    ) -> Result<EventPage, SyncError> {
        let mut url = endpoint(&self.base, &["calendars", calendar_id, "events"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("syncToken", sync_token)
                .append_pair("showDeleted", "true")
                .append_pair("maxResults", MAX_PAGE_SIZE);
            if let Some(page_token) = page_token {
                query.append_pair("pageToken", page_token);
            }
        }
        let response = self.http.get(url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::GONE {
            return Err(SyncError::StaleCursor);
        }
        read_json(PROVIDER, response).await
    }

    /// Page through a minimal listing to obtain a fresh sync token.
    pub async fn fresh_sync_token(
        &self,
        token: &str,
        calendar_id: &str,
    ) -> Result<String, SyncError> {
        let mut page_token: Option<String> = None;
        loop {
            let mut url = endpoint(&self.base, &["calendars", calendar_id, "events"])?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("maxResults", MAX_PAGE_SIZE)
                    .append_pair("fields", "nextPageToken,nextSyncToken");
                if let Some(ref page_token) = page_token {
                    query.append_pair("pageToken", page_token);
                }
            }
            let response = self.http.get(url).bearer_auth(token).send().await?;
            let page: EventPage = read_json(PROVIDER, response).await?;

            match (page.next_page_token, page.next_sync_token) {
                (Some(next), _) => page_token = Some(next),
                (None, Some(sync_token)) if !sync_token.is_empty() => return Ok(sync_token),
                (None, _) => {
                    return Err(SyncError::transient(
                        "calendar listing ended without a sync token",
                    ));
                }
            }
        }
    }

    pub async fn watch(
        &self,
        token: &str,
        calendar_id: &str,
        channel_id: &str,
        channel_token: &str,
        address: &str,
        ttl_seconds: u64,
    ) -> Result<WatchResponse, SyncError> {
        let url = endpoint(&self.base, &["calendars", calendar_id, "events", "watch"])?;
        let request = WatchRequest {
            id: channel_id,
            kind: "web_hook",
            address,
            token: channel_token,
            params: WatchParams {
                ttl: ttl_seconds.to_string(),
            },
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        read_json(PROVIDER, response).await
    }

    pub async fn stop_channel(
        &self,
        token: &str,
        channel_id: &str,
        resource_id: Option<&str>,
    ) -> Result<(), SyncError> {
        let url = endpoint(&self.base, &["channels", "stop"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&StopRequest {
                id: channel_id,
                resource_id,
            })
            .send()
            .await?;
        ensure_success(PROVIDER, response).await?;
        Ok(())
    }

    /// Create a secondary calendar and return its id.
    pub async fn create_calendar(&self, token: &str, summary: &str) -> Result<String, SyncError> {
        let url = endpoint(&self.base, &["calendars"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&NewCalendar { summary })
            .send()
            .await?;
        let created: CreatedCalendar = read_json(PROVIDER, response).await?;
        Ok(created.id)
    }
}
