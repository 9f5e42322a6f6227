//! # Jobs API Handlers
//!
//! Operator endpoints for inspecting and enqueuing sync jobs. All of them
//! require the trigger secret.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::TriggerAuth;
use crate::error::{ApiError, conflict, not_found, validation_error};
use crate::jobs::JobRequest;
use crate::models::{JobStatus, Provider, sync_job};
use crate::repositories::sync_job::JobListFilter;
use crate::repositories::{SyncJobRepository, WebhookChannelRepository};
use crate::server::AppState;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 200;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status (one of: pending, running, succeeded, failed)
    pub status: Option<String>,
    /// Filter by provider (one of: calendar, invoicing, spreadsheet)
    pub provider: Option<String>,
    /// Filter by agency
    pub agency_id: Option<Uuid>,
    /// Maximum number of jobs to return (default: 50, max: 200)
    pub limit: Option<u64>,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "550e8400-e29b-41d4-a716-446655440001")]
    pub agency_id: Uuid,
    #[schema(example = "calendar")]
    pub provider: String,
    #[schema(example = "event-upsert")]
    pub kind: String,
    #[schema(example = "pending")]
    pub status: String,
    #[schema(value_type = Object)]
    pub payload: JsonValue,
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    pub last_error: Option<String>,
    /// Error class of a failed job; only `transient` failures are worth retrying
    #[schema(example = "transient")]
    pub error_kind: Option<String>,
    /// The failed job this one was created from
    pub retry_of: Option<Uuid>,
    #[schema(example = "2024-01-15T10:30:00+00:00")]
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id,
            agency_id: model.agency_id,
            provider: model.provider,
            kind: model.kind,
            status: model.status,
            payload: model.payload,
            result: model.result,
            last_error: model.last_error,
            error_kind: model.error_kind,
            retry_of: model.retry_of,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Response payload for jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
}

/// Request body for enqueuing a job
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub agency_id: Uuid,
    pub provider: Provider,
    #[schema(example = "event-upsert")]
    pub kind: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>, example = json!({ "eventId": "E1" }))]
    pub payload: Option<JsonValue>,
}

/// Jobs enqueued by a reconciliation sweep
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub enqueued: usize,
    pub job_ids: Vec<Uuid>,
}

fn list_filter(params: ListJobsQuery) -> Result<JobListFilter, ApiError> {
    let status = params
        .status
        .map(|s| s.parse::<JobStatus>().map(|status| status.as_str().to_string()))
        .transpose()
        .map_err(validation_error)?;
    let provider = params
        .provider
        .map(|p| p.parse::<Provider>().map(|provider| provider.as_str().to_string()))
        .transpose()
        .map_err(validation_error)?;

    let limit = match params.limit {
        None => DEFAULT_LIST_LIMIT,
        Some(0) => return Err(validation_error("limit must be at least 1")),
        Some(limit) if limit > MAX_LIST_LIMIT => {
            return Err(validation_error(format!(
                "limit must not exceed {MAX_LIST_LIMIT}"
            )));
        }
        Some(limit) => limit,
    };

    Ok(JobListFilter {
        agency_id: params.agency_id,
        provider,
        status,
        limit,
    })
}

/// List recent jobs, newest first
#[utoipa::path(
    get,
    path = "/jobs",
    security(("trigger_secret" = [])),
    params(
        ("status" = Option<JobStatus>, Query, description = "Filter by job status"),
        ("provider" = Option<Provider>, Query, description = "Filter by provider"),
        ("agency_id" = Option<Uuid>, Query, description = "Filter by agency"),
        ("limit" = Option<u64>, Query, description = "Maximum number of jobs to return (default 50, max 200)")
    ),
    responses(
        (status = 200, description = "Matching jobs", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    params: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<JobsResponse>, ApiError> {
    let Query(params) = params?;
    let filter = list_filter(params)?;

    let jobs = SyncJobRepository::new(state.db.clone())
        .list(filter)
        .await?
        .into_iter()
        .map(JobInfo::from)
        .collect();

    Ok(Json(JobsResponse { jobs }))
}

/// Enqueue a job after validating its payload against the job kind
#[utoipa::path(
    post,
    path = "/jobs",
    security(("trigger_secret" = [])),
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job enqueued", body = JobInfo),
        (status = 400, description = "Unknown kind or payload shape mismatch", body = ApiError),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let Json(body) = body?;
    let payload = body
        .payload
        .unwrap_or_else(|| JsonValue::Object(Default::default()));
    let request = JobRequest::parse(body.provider, &body.kind, &payload)?;

    let job = SyncJobRepository::new(state.db.clone())
        .enqueue(body.agency_id, &request)
        .await?;
    tracing::info!(
        job_id = %job.id,
        agency_id = %job.agency_id,
        provider = %job.provider,
        kind = %job.kind,
        "Job enqueued"
    );

    Ok((StatusCode::CREATED, Json(job.into())))
}

/// Create a fresh pending job from a failed one
#[utoipa::path(
    post,
    path = "/jobs/{id}/retry",
    security(("trigger_secret" = [])),
    params(("id" = Uuid, Path, description = "Failed job to retry")),
    responses(
        (status = 201, description = "Retry job enqueued", body = JobInfo),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is not in failed state", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn retry_job(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let jobs = SyncJobRepository::new(state.db.clone());
    let failed = jobs
        .find(id)
        .await?
        .ok_or_else(|| not_found(format!("Job {id} not found")))?;

    if failed.status != JobStatus::Failed.as_str() {
        return Err(conflict(format!(
            "Only failed jobs can be retried; job {id} is {}",
            failed.status
        )));
    }

    let job = jobs.enqueue_retry(&failed).await?;
    tracing::info!(job_id = %job.id, retry_of = %id, "Retry job enqueued");
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// Enqueue one channel renewal sweep per agency that owns channels
#[utoipa::path(
    post,
    path = "/jobs/reconcile",
    security(("trigger_secret" = [])),
    responses(
        (status = 202, description = "Renewal sweeps enqueued", body = ReconcileResponse),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn reconcile_channels(
    State(state): State<AppState>,
    _auth: TriggerAuth,
) -> Result<(StatusCode, Json<ReconcileResponse>), ApiError> {
    let agencies = WebhookChannelRepository::new(state.db.clone())
        .agencies_with_channels()
        .await?;
    let jobs = SyncJobRepository::new(state.db.clone());
    let request = JobRequest::Calendar(crate::jobs::CalendarJob::WatchRenewAll);

    let mut job_ids = Vec::with_capacity(agencies.len());
    for agency_id in agencies {
        job_ids.push(jobs.enqueue(agency_id, &request).await?.id);
    }
    tracing::info!(enqueued = job_ids.len(), "Channel renewal sweeps enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(ReconcileResponse {
            enqueued: job_ids.len(),
            job_ids,
        }),
    ))
}
