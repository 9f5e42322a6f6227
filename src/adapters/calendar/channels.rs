//! Push-channel management.
//!
//! A calendar has at most one live channel. Creating or renewing a channel
//! stops the previous one first; renewal swaps the stored channel fields in a
//! single update so the row id, and every queued pull that references it,
//! stays valid.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::CalendarAdapter;
use crate::adapters::JobContext;
use crate::adapters::error::{SyncError, SyncErrorKind, truncate_message};
use crate::jobs::{ArtistCalendarInput, ChannelScope, WatchCreateInput};
use crate::models::{Provider, webhook_channel};
use crate::repositories::integration_connection::CONFIG_CALENDAR_ID;
use crate::repositories::webhook_channel::ChannelRegistration;

const CHANNEL_TOKEN_LEN: usize = 32;

fn new_channel_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CHANNEL_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Whether a channel expiring at `expiration` is due for renewal at `now`.
pub fn renewal_due(
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    match expiration {
        Some(expiration) => expiration - now <= threshold,
        None => true,
    }
}

impl CalendarAdapter {
    fn callback_url(&self) -> Result<&str, SyncError> {
        self.webhook
            .callback_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SyncError::configuration("webhook callback URL is not configured"))
    }

    /// Register a new channel on `calendar_id` under a never-used channel id.
    async fn register_channel(
        &self,
        ctx: &JobContext,
        calendar_id: &str,
    ) -> Result<ChannelRegistration, SyncError> {
        let address = self.callback_url()?;
        let channel_id = Uuid::new_v4().to_string();
        let channel_token = new_channel_token();
        let ttl = self.webhook.channel_ttl_seconds;

        let response = self
            .api
            .watch(
                &ctx.access_token,
                calendar_id,
                &channel_id,
                &channel_token,
                address,
                ttl,
            )
            .await?;

        let expiration = response
            .expiration_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(|| Utc::now() + Duration::seconds(ttl as i64));

        if response.id != channel_id {
            warn!(requested = %channel_id, returned = %response.id, "Provider echoed a different channel id");
        }

        Ok(ChannelRegistration {
            channel_id,
            channel_token,
            resource_id: response.resource_id,
            expiration: expiration.fixed_offset(),
        })
    }

    async fn stop_quietly(&self, ctx: &JobContext, channel_id: &str, resource_id: Option<&str>) {
        if let Err(err) = self
            .api
            .stop_channel(&ctx.access_token, channel_id, resource_id)
            .await
        {
            debug!(channel_id = %channel_id, error = %err, "Ignoring failure to stop channel");
        }
    }

    pub(super) async fn create_watch(
        &self,
        ctx: &JobContext,
        input: WatchCreateInput,
    ) -> Result<JsonValue, SyncError> {
        // Fail before touching the provider when no callback is configured.
        self.callback_url()?;

        let sync_token = self
            .api
            .fresh_sync_token(&ctx.access_token, &input.calendar_id)
            .await?;

        let existing = self
            .channels
            .find_by_calendar(ctx.agency_id, &input.calendar_id)
            .await?;
        if let Some(existing) = &existing {
            info!(
                calendar_id = %input.calendar_id,
                channel_id = %existing.channel_id,
                "Stopping existing channel before creating a new one"
            );
            self.stop_quietly(ctx, &existing.channel_id, existing.resource_id.as_deref())
                .await;
        }

        let registration = match self.register_channel(ctx, &input.calendar_id).await {
            Ok(registration) => registration,
            Err(err) => {
                // The stored channel is stopped; make the next sweep renew it.
                if let Some(existing) = &existing {
                    self.channels.clear_expiration(existing.id).await?;
                }
                return Err(err);
            }
        };
        let row = self
            .channels
            .upsert_for_calendar(
                ctx.agency_id,
                input.scope,
                input.owner_entity_id.clone(),
                &input.calendar_id,
                &registration,
                sync_token,
            )
            .await?;

        if input.scope == ChannelScope::Company {
            self.connections
                .set_config_if_absent(
                    ctx.agency_id,
                    Provider::Calendar,
                    CONFIG_CALENDAR_ID,
                    &input.calendar_id,
                    &[],
                )
                .await?;
        }

        info!(
            channel_row_id = %row.id,
            channel_id = %row.channel_id,
            calendar_id = %row.calendar_id,
            "Calendar watch created"
        );

        Ok(json!({
            "channelRowId": row.id,
            "channelId": row.channel_id,
            "calendarId": row.calendar_id,
            "scope": row.scope,
            "expiration": registration.expiration.to_rfc3339(),
        }))
    }

    #[instrument(skip(self, ctx), fields(agency_id = %ctx.agency_id))]
    pub(super) async fn renew_all(&self, ctx: &JobContext) -> Result<JsonValue, SyncError> {
        let threshold = Duration::seconds(self.webhook.renewal_threshold_seconds as i64);
        let channels = self.channels.list_for_agency(ctx.agency_id).await?;

        let (mut renewed, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        let mut failures = Vec::new();

        for channel in &channels {
            let expiration = channel.expiration.map(|e| e.with_timezone(&Utc));
            if !renewal_due(expiration, Utc::now(), threshold) {
                skipped += 1;
                continue;
            }

            match self.renew_channel(ctx, channel, threshold).await {
                Ok(registration) => {
                    renewed += 1;
                    counter!("webhook_channel_renewals_total", "outcome" => "renewed").increment(1);
                    info!(
                        channel_row_id = %channel.id,
                        old_channel_id = %channel.channel_id,
                        new_channel_id = %registration.channel_id,
                        expiration = %registration.expiration,
                        "Calendar channel renewed"
                    );
                }
                Err(err) if err.kind() == SyncErrorKind::Authentication => {
                    // The dispatcher refreshes the token and reruns the sweep.
                    warn!(channel_row_id = %channel.id, error = %err, "Renewal token rejected");
                    return Err(err);
                }
                Err(err) => {
                    failed += 1;
                    counter!("webhook_channel_renewals_total", "outcome" => "failed").increment(1);
                    warn!(channel_row_id = %channel.id, error = %err, "Calendar channel renewal failed");
                    failures.push(json!({
                        "channelRowId": channel.id,
                        "error": truncate_message(&err.to_string(), 200),
                    }));
                }
            }
        }

        Ok(json!({
            "renewed": renewed,
            "skipped": skipped,
            "failed": failed,
            "total": channels.len(),
            "failures": failures,
        }))
    }

    async fn renew_channel(
        &self,
        ctx: &JobContext,
        channel: &webhook_channel::Model,
        threshold: Duration,
    ) -> Result<ChannelRegistration, SyncError> {
        self.callback_url()?;
        self.stop_quietly(ctx, &channel.channel_id, channel.resource_id.as_deref())
            .await;

        // A stored cursor belongs to the pull path and is left untouched.
        let fresh_sync_token = match channel.sync_token.as_deref().filter(|t| !t.is_empty()) {
            Some(_) => None,
            None => Some(
                self.api
                    .fresh_sync_token(&ctx.access_token, &channel.calendar_id)
                    .await?,
            ),
        };

        let registration = self.register_channel(ctx, &channel.calendar_id).await?;
        if registration.expiration.with_timezone(&Utc) <= Utc::now() + threshold {
            self.stop_quietly(
                ctx,
                &registration.channel_id,
                registration.resource_id.as_deref(),
            )
            .await;
            return Err(SyncError::configuration(format!(
                "renewed channel expires at {}, inside the renewal threshold; raise the channel TTL",
                registration.expiration
            )));
        }

        if !self
            .channels
            .replace_registration(channel.id, &registration, fresh_sync_token.as_deref())
            .await?
        {
            self.stop_quietly(
                ctx,
                &registration.channel_id,
                registration.resource_id.as_deref(),
            )
            .await;
            return Err(SyncError::validation(format!(
                "webhook channel {} disappeared during renewal",
                channel.id
            )));
        }

        Ok(registration)
    }

    pub(super) async fn provision_artist_calendar(
        &self,
        ctx: &JobContext,
        input: ArtistCalendarInput,
    ) -> Result<JsonValue, SyncError> {
        let artist = self
            .directory
            .find_artist(ctx.agency_id, &input.artist_id)
            .await?
            .ok_or_else(|| SyncError::validation(format!("artist {} not found", input.artist_id)))?;

        let (calendar_id, created) = match artist.calendar_id.as_deref().filter(|c| !c.is_empty()) {
            Some(existing) => (existing.to_string(), false),
            None => {
                let summary = artist.name.trim();
                let summary = if summary.is_empty() { "Artist" } else { summary };
                let calendar_id = self
                    .api
                    .create_calendar(&ctx.access_token, summary)
                    .await?;
                self.directory
                    .set_artist_calendar(ctx.agency_id, &artist.id, &calendar_id)
                    .await?;
                info!(artist_id = %artist.id, calendar_id = %calendar_id, "Artist calendar created");
                (calendar_id, true)
            }
        };

        let channel = self
            .create_watch(
                ctx,
                WatchCreateInput {
                    calendar_id: calendar_id.clone(),
                    scope: ChannelScope::Artist,
                    owner_entity_id: Some(artist.id.clone()),
                },
            )
            .await?;

        Ok(json!({
            "artistId": artist.id,
            "calendarId": calendar_id,
            "created": created,
            "channel": channel,
        }))
    }
}
