//! Event push.
//!
//! The stored provider event id makes the write idempotent: with an id the
//! event is patched in place, without one it is inserted and the new id is
//! written back. The artist-calendar mirror has its own stored id.

use std::collections::HashMap;

use chrono::Days;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use super::api::{
    Attendee, EventBody, EventDate, ExtendedProperties, PROP_AGENCY_ID, PROP_EVENT_ID,
    RemoteEvent, SendUpdates,
};
use super::{CalendarAdapter, DEFAULT_CALENDAR_ID};
use crate::adapters::JobContext;
use crate::adapters::error::SyncError;
use crate::jobs::EventUpsertInput;
use crate::models::{Provider, artist, client, event};
use crate::repositories::integration_connection::{CONFIG_CALENDAR_ID, config_str};

/// Outcome of one idempotent write.
struct Written {
    event: RemoteEvent,
    created: bool,
}

/// Title shown in the calendar: counterparty then artist.
pub fn event_title(client: Option<&client::Model>, artist: Option<&artist::Model>) -> String {
    let parts: Vec<&str> = [
        client.map(client::Model::display_name),
        artist.map(|a| a.name.trim()),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.is_empty())
    .collect();

    if parts.is_empty() {
        "Event".to_string()
    } else {
        parts.join(" - ")
    }
}

/// Build the provider body for an internal event.
pub fn build_event_body(
    event: &event::Model,
    client: Option<&client::Model>,
    artist: Option<&artist::Model>,
) -> Result<EventBody, SyncError> {
    let end = event
        .event_date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| SyncError::validation(format!("event {} has no valid end date", event.id)))?;

    let attendees = [
        client.and_then(|c| c.email.as_deref()),
        artist.and_then(|a| a.email.as_deref()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|email| !email.is_empty())
    .map(|email| Attendee {
        email: email.to_string(),
    })
    .collect();

    let mut private = HashMap::new();
    private.insert(PROP_AGENCY_ID.to_string(), event.agency_id.to_string());
    private.insert(PROP_EVENT_ID.to_string(), event.id.clone());

    Ok(EventBody {
        summary: event_title(client, artist),
        description: event.description.clone(),
        location: event.location.clone(),
        start: EventDate::whole_day(event.event_date),
        end: EventDate::whole_day(end),
        attendees,
        extended_properties: ExtendedProperties { private },
    })
}

impl CalendarAdapter {
    pub(super) async fn upsert_event(
        &self,
        ctx: &JobContext,
        input: EventUpsertInput,
    ) -> Result<JsonValue, SyncError> {
        let agency_id = ctx.agency_id;
        let event = self
            .events
            .find(agency_id, &input.event_id)
            .await?
            .ok_or_else(|| SyncError::validation(format!("event {} not found", input.event_id)))?;

        let client = match event.client_id.as_deref() {
            Some(id) => self.directory.find_client(agency_id, id).await?,
            None => None,
        };
        let artist = match event.artist_id.as_deref() {
            Some(id) => self.directory.find_artist(agency_id, id).await?,
            None => None,
        };

        let calendar_id = self
            .connections
            .find(agency_id, Provider::Calendar)
            .await?
            .as_ref()
            .and_then(|conn| config_str(conn, CONFIG_CALENDAR_ID).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string());

        let body = build_event_body(&event, client.as_ref(), artist.as_ref())?;
        let send_updates = if input.send_invites {
            SendUpdates::All
        } else {
            SendUpdates::None
        };

        let primary = self
            .write_event(
                ctx,
                &calendar_id,
                event.google_event_id.as_deref(),
                &body,
                send_updates,
            )
            .await?;
        self.events
            .record_calendar_push(
                agency_id,
                &event.id,
                &primary.event.id,
                primary.event.html_link.as_deref(),
            )
            .await?;
        info!(
            event_id = %event.id,
            external_event_id = %primary.event.id,
            created = primary.created,
            "Calendar event written"
        );

        let mirror = match artist
            .as_ref()
            .and_then(|a| a.calendar_id.as_deref())
            .filter(|id| !id.is_empty() && *id != calendar_id)
        {
            Some(artist_calendar) => {
                // Attendees were already notified by the primary write.
                match self
                    .write_event(
                        ctx,
                        artist_calendar,
                        event.artist_google_event_id.as_deref(),
                        &body,
                        SendUpdates::None,
                    )
                    .await
                {
                    Ok(written) => {
                        self.events
                            .record_artist_mirror(agency_id, &event.id, &written.event.id)
                            .await?;
                        json!({
                            "calendarId": artist_calendar,
                            "externalEventId": written.event.id,
                            "created": written.created,
                        })
                    }
                    Err(err) => {
                        warn!(
                            event_id = %event.id,
                            calendar_id = %artist_calendar,
                            error = %err,
                            "Artist calendar mirror failed"
                        );
                        json!({ "calendarId": artist_calendar, "error": err.to_string() })
                    }
                }
            }
            None => JsonValue::Null,
        };

        self.connections
            .mark_synced(agency_id, Provider::Calendar)
            .await?;

        Ok(json!({
            "eventId": event.id,
            "calendarId": calendar_id,
            "externalEventId": primary.event.id,
            "htmlLink": primary.event.html_link,
            "created": primary.created,
            "mirror": mirror,
        }))
    }

    /// Patch when an id is known, insert otherwise. A patch that hits a
    /// deleted event falls back to insert.
    async fn write_event(
        &self,
        ctx: &JobContext,
        calendar_id: &str,
        existing_id: Option<&str>,
        body: &EventBody,
        send_updates: SendUpdates,
    ) -> Result<Written, SyncError> {
        if let Some(existing_id) = existing_id.filter(|id| !id.is_empty()) {
            match self
                .api
                .patch_event(&ctx.access_token, calendar_id, existing_id, body, send_updates)
                .await
            {
                Ok(event) => {
                    return Ok(Written {
                        event,
                        created: false,
                    });
                }
                Err(err) if err.is_not_found() => {
                    warn!(
                        calendar_id = %calendar_id,
                        external_event_id = %existing_id,
                        "Stored calendar event no longer exists; recreating"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let event = self
            .api
            .insert_event(&ctx.access_token, calendar_id, body, send_updates)
            .await?;
        Ok(Written {
            event,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn sample_event() -> event::Model {
        event::Model {
            id: "E1".into(),
            agency_id: Uuid::nil(),
            client_id: Some("C1".into()),
            artist_id: Some("A1".into()),
            event_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            status: "scheduled".into(),
            description: Some("Gala".into()),
            location: None,
            amount: Some(1000.0),
            payment_date: None,
            document_type: None,
            google_event_id: None,
            google_event_link: None,
            artist_google_event_id: None,
            calendar_sync_status: None,
            calendar_sync_error: None,
            calendar_synced_at: None,
            invoice_document_id: None,
            invoice_document_number: None,
            invoice_document_url: None,
            invoice_sync_status: None,
            invoice_sync_error: None,
            updated_at: Utc::now().fixed_offset(),
        }
    }

    fn sample_client(business: Option<&str>, email: Option<&str>) -> client::Model {
        client::Model {
            id: "C1".into(),
            agency_id: Uuid::nil(),
            name: "Dana Levi".into(),
            business_name: business.map(str::to_string),
            email: email.map(str::to_string),
            phone: None,
            tax_id: None,
        }
    }

    fn sample_artist(email: Option<&str>) -> artist::Model {
        artist::Model {
            id: "A1".into(),
            agency_id: Uuid::nil(),
            name: "The Band".into(),
            email: email.map(str::to_string),
            phone: None,
            calendar_id: None,
        }
    }

    #[test]
    fn test_whole_day_range_crosses_year_end() {
        let body = build_event_body(&sample_event(), None, None).unwrap();
        assert_eq!(body.start.date, NaiveDate::from_ymd_opt(2025, 12, 31));
        assert_eq!(body.end.date, NaiveDate::from_ymd_opt(2026, 1, 1));
    }

    #[test]
    fn test_title_prefers_business_name() {
        let client = sample_client(Some("Acme Events"), None);
        let artist = sample_artist(None);
        assert_eq!(
            event_title(Some(&client), Some(&artist)),
            "Acme Events - The Band"
        );

        let client = sample_client(Some("  "), None);
        assert_eq!(event_title(Some(&client), None), "Dana Levi");
        assert_eq!(event_title(None, None), "Event");
    }

    #[test]
    fn test_attendees_skip_blank_emails() {
        let client = sample_client(None, Some("  "));
        let artist = sample_artist(Some("band@example.com"));
        let body = build_event_body(&sample_event(), Some(&client), Some(&artist)).unwrap();
        assert_eq!(
            body.attendees,
            vec![Attendee {
                email: "band@example.com".into()
            }]
        );
    }

    #[test]
    fn test_private_properties_link_back() {
        let body = build_event_body(&sample_event(), None, None).unwrap();
        assert_eq!(
            body.extended_properties.private.get(PROP_EVENT_ID),
            Some(&"E1".to_string())
        );
        assert_eq!(
            body.extended_properties.private.get(PROP_AGENCY_ID),
            Some(&Uuid::nil().to_string())
        );
    }
}
