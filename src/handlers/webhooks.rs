//! # Webhook Handlers
//!
//! Receiver for Google Calendar push notifications. The notification itself
//! carries no event data; a change enqueues a `calendar-pull` job for the
//! channel and the dispatcher does the actual work.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, not_found, unauthorized, validation_error};
use crate::jobs::{CalendarJob, CalendarPullInput, JobRequest};
use crate::repositories::{SyncJobRepository, WebhookChannelRepository};
use crate::server::AppState;

pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

/// Handshake sent once right after a channel is registered.
const STATE_SYNC: &str = "sync";

/// Push notification headers
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Header)]
pub struct CalendarPushHeaders {
    /// Channel id chosen when the watch was registered
    #[serde(rename = "X-Goog-Channel-ID")]
    #[param(rename = "X-Goog-Channel-ID", value_type = String)]
    pub channel_id: String,
    /// Verification token stored with the channel
    #[serde(rename = "X-Goog-Channel-Token")]
    #[param(rename = "X-Goog-Channel-Token", value_type = String)]
    pub channel_token: String,
    /// `sync`, `exists` or `not_exists`
    #[serde(rename = "X-Goog-Resource-State")]
    #[param(rename = "X-Goog-Resource-State", value_type = String)]
    pub resource_state: String,
}

/// Acknowledgement returned to the push sender
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    #[schema(example = "queued")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[utoipa::path(
    post,
    path = "/webhooks/google-calendar",
    params(CalendarPushHeaders),
    responses(
        (status = 200, description = "Sync handshake acknowledged", body = WebhookAck),
        (status = 202, description = "Pull job enqueued", body = WebhookAck),
        (status = 400, description = "Missing channel headers", body = ApiError),
        (status = 401, description = "Channel token mismatch", body = ApiError),
        (status = 404, description = "Unknown channel", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn google_calendar_push(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let channel_id = header(&headers, CHANNEL_ID_HEADER)
        .ok_or_else(|| validation_error("Missing X-Goog-Channel-ID header"))?;
    let resource_state = header(&headers, RESOURCE_STATE_HEADER).unwrap_or_default();

    let channel = WebhookChannelRepository::new(state.db.clone())
        .find_by_channel_id(channel_id)
        .await?
        .ok_or_else(|| {
            warn!(channel_id, "Push notification for unknown channel");
            not_found("Unknown channel")
        })?;

    let presented = header(&headers, CHANNEL_TOKEN_HEADER).unwrap_or_default();
    if !bool::from(channel.channel_token.as_bytes().ct_eq(presented.as_bytes())) {
        warn!(channel_id, agency_id = %channel.agency_id, "Push notification with wrong channel token");
        return Err(unauthorized(Some("Invalid channel token")));
    }

    if resource_state == STATE_SYNC {
        debug!(channel_id, "Channel sync handshake");
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                status: "acknowledged".to_string(),
                job_id: None,
            }),
        ));
    }

    let request = JobRequest::Calendar(CalendarJob::Pull(CalendarPullInput {
        channel_id: channel.id,
    }));
    let job = SyncJobRepository::new(state.db.clone())
        .enqueue(channel.agency_id, &request)
        .await?;
    info!(
        channel_id,
        agency_id = %channel.agency_id,
        job_id = %job.id,
        resource_state,
        "Calendar pull enqueued from push notification"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAck {
            status: "queued".to_string(),
            job_id: Some(job.id),
        }),
    ))
}
