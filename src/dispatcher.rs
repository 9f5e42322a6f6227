//! # Job Dispatcher
//!
//! Runs one bounded batch of pending jobs per call. Each job is claimed with
//! the conditional pending -> running update before any work starts, then
//! executed against its provider adapter and finished with exactly one
//! terminal write. Jobs are processed sequentially and independently: a
//! failing job never aborts the rest of the batch.

use std::time::Instant;

use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::error::{SyncError, SyncErrorKind, truncate_message};
use crate::adapters::{AdapterRegistry, JobContext};
use crate::config::{AppConfig, DispatchConfig};
use crate::crypto::CryptoKey;
use crate::jobs::{EntityMarker, JobRequest};
use crate::models::{JobStatus, Provider, sync_job};
use crate::repositories::{CredentialRepository, EventRepository, SyncJobRepository};
use crate::token_manager::TokenManager;

/// Terminal outcome of one job in a batch.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub id: Uuid,
    /// `succeeded` or `failed`
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SyncErrorKind>,
}

/// Response of one dispatch batch.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchReport {
    pub processed: usize,
    pub results: Vec<JobOutcome>,
}

#[derive(Clone)]
pub struct Dispatcher {
    jobs: SyncJobRepository,
    events: EventRepository,
    tokens: TokenManager,
    adapters: AdapterRegistry,
    settings: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        db: DatabaseConnection,
        tokens: TokenManager,
        adapters: AdapterRegistry,
        settings: DispatchConfig,
    ) -> Self {
        Self {
            jobs: SyncJobRepository::new(db.clone()),
            events: EventRepository::new(db),
            tokens,
            adapters,
            settings,
        }
    }

    /// Wire the token manager and production adapters from configuration.
    pub fn from_config(config: &AppConfig, db: DatabaseConnection) -> Result<Self, SyncError> {
        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| SyncError::configuration("crypto key is not configured"))?;
        let crypto_key =
            CryptoKey::new(key_bytes).map_err(|e| SyncError::configuration(e.to_string()))?;
        let credentials = CredentialRepository::new(db.clone(), crypto_key);
        let tokens = TokenManager::new(config, credentials)?;
        let adapters = AdapterRegistry::from_config(config, db.clone())?;
        Ok(Self::new(db, tokens, adapters, config.dispatch.clone()))
    }

    /// Claim and run up to `limit` pending jobs, oldest first.
    pub async fn run_batch(&self, limit: Option<u64>) -> Result<BatchReport, DbErr> {
        let limit = self.settings.clamp_limit(limit);
        let candidates = self.jobs.pending_ids(limit).await?;
        let mut results = Vec::with_capacity(candidates.len());

        for job_id in candidates {
            match self.jobs.claim(job_id).await {
                Ok(Some(job)) => results.push(self.process(job).await),
                Ok(None) => continue,
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "Failed to claim job");
                }
            }
        }

        info!(processed = results.len(), limit, "Dispatch batch finished");
        Ok(BatchReport {
            processed: results.len(),
            results,
        })
    }

    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, agency_id = %job.agency_id, provider = %job.provider, kind = %job.kind)
    )]
    async fn process(&self, job: sync_job::Model) -> JobOutcome {
        let started = Instant::now();
        let outcome = self.execute(&job).await;
        histogram!("sync_job_duration_ms", "provider" => job.provider.clone())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(result) => {
                if let Err(err) = self.jobs.mark_succeeded(job.id, result.clone()).await {
                    error!(error = %err, "Failed to record job success");
                }
                counter!("sync_jobs_processed_total", "provider" => job.provider.clone(), "status" => "succeeded")
                    .increment(1);
                info!("Job succeeded");
                JobOutcome {
                    id: job.id,
                    status: JobStatus::Succeeded,
                    result: Some(result),
                    error: None,
                    error_kind: None,
                }
            }
            Err(err) => {
                let kind = err.kind();
                let message = truncate_message(&err.to_string(), self.settings.max_error_length);
                if let Err(db_err) = self.jobs.mark_failed(job.id, &message, kind).await {
                    error!(error = %db_err, "Failed to record job failure");
                }
                // The terminal write above never depends on this side write.
                self.mark_entity(&job, &message).await;

                counter!("sync_jobs_processed_total", "provider" => job.provider.clone(), "status" => "failed")
                    .increment(1);
                warn!(error_kind = kind.as_str(), error = %message, "Job failed");
                JobOutcome {
                    id: job.id,
                    status: JobStatus::Failed,
                    result: None,
                    error: Some(message),
                    error_kind: Some(kind),
                }
            }
        }
    }

    async fn execute(&self, job: &sync_job::Model) -> Result<JsonValue, SyncError> {
        let provider: Provider = job.provider.parse().map_err(SyncError::Configuration)?;
        let request = JobRequest::parse(provider, &job.kind, &job.payload)?;
        let adapter = self.adapters.get(provider).ok_or_else(|| {
            SyncError::configuration(format!("no adapter registered for {provider}"))
        })?;

        let access_token = self
            .tokens
            .get_valid_access_token(job.agency_id, provider)
            .await?;
        let mut ctx = JobContext {
            job_id: job.id,
            agency_id: job.agency_id,
            access_token,
        };

        match adapter.execute(&ctx, request.clone()).await {
            Err(SyncError::Authentication(reason)) => {
                warn!(reason = %reason, "Provider rejected the access token; forcing a refresh");
                ctx.access_token = self
                    .tokens
                    .force_refresh(job.agency_id, provider)
                    .await
                    .map_err(|e| {
                        SyncError::configuration(format!(
                            "access token rejected ({reason}) and refresh failed: {e}"
                        ))
                    })?;
                adapter.execute(&ctx, request).await
            }
            other => other,
        }
    }

    /// Best-effort error marker on the entity that owns the job.
    async fn mark_entity(&self, job: &sync_job::Model, message: &str) {
        let marker = job
            .provider
            .parse::<Provider>()
            .ok()
            .and_then(|provider| JobRequest::parse(provider, &job.kind, &job.payload).ok())
            .and_then(|request| request.entity_marker());

        let written = match marker {
            Some(EntityMarker::EventCalendar { event_id }) => {
                self.events
                    .mark_calendar_error(job.agency_id, &event_id, message)
                    .await
            }
            Some(EntityMarker::EventInvoice { event_id }) => {
                self.events
                    .mark_invoice_error(job.agency_id, &event_id, message)
                    .await
            }
            None => return,
        };

        if let Err(err) = written {
            warn!(error = %err, "Could not write error marker onto entity");
        }
    }
}
