//! Incremental pull.
//!
//! Lists changes since the channel's stored sync token and applies the
//! provider-sourced fields back onto linked internal events. A stale token is
//! reset with one fresh listing instead of failing the job.

use metrics::counter;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::CalendarAdapter;
use super::api::{PROP_AGENCY_ID, PROP_EVENT_ID, RemoteEvent};
use crate::adapters::JobContext;
use crate::adapters::error::SyncError;
use crate::jobs::CalendarPullInput;
use crate::models::{Provider, event};

pub const OUTCOME_SYNCED: &str = "synced";
pub const OUTCOME_NOT_INITIALIZED: &str = "not_initialized";
pub const OUTCOME_RESET: &str = "reset";

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullCounts {
    pub changed: usize,
    pub updated: usize,
    pub cancelled: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl CalendarAdapter {
    pub(super) async fn pull_changes(
        &self,
        ctx: &JobContext,
        input: CalendarPullInput,
    ) -> Result<JsonValue, SyncError> {
        let channel = self
            .channels
            .find(ctx.agency_id, input.channel_id)
            .await?
            .ok_or_else(|| {
                SyncError::validation(format!("webhook channel {} not found", input.channel_id))
            })?;

        let Some(sync_token) = channel.sync_token.clone().filter(|t| !t.is_empty()) else {
            info!(channel_row_id = %channel.id, "Pull skipped: channel has no sync token yet");
            return Ok(json!({
                "outcome": OUTCOME_NOT_INITIALIZED,
                "channelId": channel.id,
            }));
        };

        let mut items: Vec<RemoteEvent> = Vec::new();
        let mut page_token: Option<String> = None;
        let next_sync_token = loop {
            let page = match self
                .api
                .list_changes(
                    &ctx.access_token,
                    &channel.calendar_id,
                    &sync_token,
                    page_token.as_deref(),
                )
                .await
            {
                Ok(page) => page,
                Err(SyncError::StaleCursor) => {
                    return self
                        .reset_cursor(ctx, channel.id, &channel.calendar_id)
                        .await;
                }
                Err(err) => return Err(err),
            };

            items.extend(page.items);
            match (page.next_page_token, page.next_sync_token) {
                (Some(next), _) => page_token = Some(next),
                (None, Some(token)) if !token.is_empty() => break token,
                (None, _) => {
                    return Err(SyncError::transient(
                        "calendar change listing ended without a sync token",
                    ));
                }
            }
        };

        let mut counts = PullCounts {
            changed: items.len(),
            ..PullCounts::default()
        };
        for item in &items {
            self.apply_change(ctx.agency_id, item, &mut counts).await?;
        }

        self.channels.record_pull(channel.id, &next_sync_token).await?;
        self.connections
            .mark_synced(ctx.agency_id, Provider::Calendar)
            .await?;

        info!(
            channel_row_id = %channel.id,
            changed = counts.changed,
            updated = counts.updated,
            cancelled = counts.cancelled,
            skipped = counts.skipped,
            "Calendar pull applied"
        );

        Ok(json!({
            "outcome": OUTCOME_SYNCED,
            "channelId": channel.id,
            "counts": counts,
        }))
    }

    async fn reset_cursor(
        &self,
        ctx: &JobContext,
        channel_row_id: Uuid,
        calendar_id: &str,
    ) -> Result<JsonValue, SyncError> {
        warn!(channel_row_id = %channel_row_id, "Sync token rejected as stale; resetting cursor");
        let fresh = self
            .api
            .fresh_sync_token(&ctx.access_token, calendar_id)
            .await?;
        self.channels.record_pull(channel_row_id, &fresh).await?;
        counter!("calendar_pull_resets_total").increment(1);
        Ok(json!({
            "outcome": OUTCOME_RESET,
            "channelId": channel_row_id,
        }))
    }

    /// Resolve the internal event a changed item belongs to, if any.
    async fn linked_event(
        &self,
        agency_id: Uuid,
        item: &RemoteEvent,
    ) -> Result<Option<event::Model>, SyncError> {
        if let Some(event_id) = item.private_property(PROP_EVENT_ID) {
            let same_agency = item
                .private_property(PROP_AGENCY_ID)
                .is_some_and(|owner| owner == agency_id.to_string());
            if !same_agency {
                return Ok(None);
            }
            return Ok(self.events.find(agency_id, event_id).await?);
        }

        // Deleted items come back stripped to id and status.
        if item.is_cancelled() {
            return Ok(self
                .events
                .find_by_provider_event_id(agency_id, &item.id)
                .await?);
        }
        Ok(None)
    }

    async fn apply_change(
        &self,
        agency_id: Uuid,
        item: &RemoteEvent,
        counts: &mut PullCounts,
    ) -> Result<(), SyncError> {
        let Some(event) = self.linked_event(agency_id, item).await? else {
            debug!(external_event_id = %item.id, "Skipping calendar item not linked to an event");
            counts.skipped += 1;
            return Ok(());
        };

        if item.is_cancelled() {
            self.events
                .mark_cancelled_from_calendar(agency_id, &event.id)
                .await?;
            counts.cancelled += 1;
            return Ok(());
        }

        match item.start_day() {
            Some(day) if day != event.event_date => {
                self.events
                    .apply_calendar_date(agency_id, &event.id, day)
                    .await?;
                counts.updated += 1;
            }
            _ => counts.unchanged += 1,
        }
        Ok(())
    }
}
