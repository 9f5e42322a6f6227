//! # Calendar Adapter
//!
//! Event push, incremental pull and push-channel management against a
//! calendar v3 API.
//!
//! - [`push`]: idempotent event upsert keyed by the stored provider event id
//! - [`pull`]: sync-token driven change listing with stale-cursor reset
//! - [`channels`]: watch creation, forced renewal, artist calendar provisioning

pub mod api;
pub mod channels;
pub mod pull;
pub mod push;

use async_trait::async_trait;
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde_json::Value as JsonValue;

use self::api::CalendarApi;
use super::error::SyncError;
use super::{JobContext, ProviderAdapter, wrong_provider};
use crate::config::{AppConfig, WebhookConfig};
use crate::jobs::{CalendarJob, JobRequest};
use crate::models::Provider;
use crate::repositories::{
    DirectoryRepository, EventRepository, IntegrationConnectionRepository,
    WebhookChannelRepository,
};

/// Calendar written to when the agency has not configured one.
pub const DEFAULT_CALENDAR_ID: &str = "primary";

#[derive(Clone)]
pub struct CalendarAdapter {
    api: CalendarApi,
    events: EventRepository,
    directory: DirectoryRepository,
    channels: WebhookChannelRepository,
    connections: IntegrationConnectionRepository,
    webhook: WebhookConfig,
}

impl CalendarAdapter {
    pub fn new(http: Client, config: &AppConfig, db: DatabaseConnection) -> Self {
        Self {
            api: CalendarApi::new(http, config.google.calendar_api_base.clone()),
            events: EventRepository::new(db.clone()),
            directory: DirectoryRepository::new(db.clone()),
            channels: WebhookChannelRepository::new(db.clone()),
            connections: IntegrationConnectionRepository::new(db),
            webhook: config.webhook.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CalendarAdapter {
    fn provider(&self) -> Provider {
        Provider::Calendar
    }

    async fn execute(&self, ctx: &JobContext, request: JobRequest) -> Result<JsonValue, SyncError> {
        let JobRequest::Calendar(job) = request else {
            return Err(wrong_provider(self.provider(), &request));
        };
        match job {
            CalendarJob::EventUpsert(input) => self.upsert_event(ctx, input).await,
            CalendarJob::Pull(input) => self.pull_changes(ctx, input).await,
            CalendarJob::WatchCreate(input) => self.create_watch(ctx, input).await,
            CalendarJob::WatchRenewAll => self.renew_all(ctx).await,
            CalendarJob::ProvisionArtistCalendar(input) => {
                self.provision_artist_calendar(ctx, input).await
            }
        }
    }
}
