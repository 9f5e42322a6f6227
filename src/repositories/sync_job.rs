//! # SyncJob Repository
//!
//! Durable job store. Status only moves forward; the pending -> running
//! transition is a conditional update and acts as the claim that keeps two
//! concurrent dispatchers off the same job.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::adapters::error::SyncErrorKind;
use crate::jobs::JobRequest;
use crate::models::JobStatus;
use crate::models::sync_job::{ActiveModel, Column, Entity, Model};

/// Optional filters for operator job listings.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub agency_id: Option<Uuid>,
    pub provider: Option<String>,
    pub status: Option<String>,
    pub limit: u64,
}

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a pending job for `request`.
    pub async fn enqueue(&self, agency_id: Uuid, request: &JobRequest) -> Result<Model, DbErr> {
        self.insert_pending(
            agency_id,
            request.provider().as_str(),
            request.kind(),
            request.payload(),
            None,
        )
        .await
    }

    /// Insert a fresh pending copy of a failed job. The failed row is left untouched.
    pub async fn enqueue_retry(&self, failed: &Model) -> Result<Model, DbErr> {
        self.insert_pending(
            failed.agency_id,
            &failed.provider,
            &failed.kind,
            failed.payload.clone(),
            Some(failed.id),
        )
        .await
    }

    async fn insert_pending(
        &self,
        agency_id: Uuid,
        provider: &str,
        kind: &str,
        payload: JsonValue,
        retry_of: Option<Uuid>,
    ) -> Result<Model, DbErr> {
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            agency_id: Set(agency_id),
            provider: Set(provider.to_string()),
            kind: Set(kind.to_string()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            payload: Set(payload),
            result: Set(None),
            last_error: Set(None),
            error_kind: Set(None),
            retry_of: Set(retry_of),
            created_at: Set(Utc::now().fixed_offset()),
            started_at: Set(None),
            finished_at: Set(None),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            job_id = %job.id,
            agency_id = %agency_id,
            provider = %job.provider,
            kind = %job.kind,
            retry_of = ?retry_of,
            "Sync job enqueued"
        );

        Ok(job)
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(job_id).one(&self.db).await
    }

    /// Most recent jobs first.
    pub async fn list(&self, filter: JobListFilter) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);
        if let Some(agency_id) = filter.agency_id {
            query = query.filter(Column::AgencyId.eq(agency_id));
        }
        if let Some(provider) = filter.provider {
            query = query.filter(Column::Provider.eq(provider));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }
        query.limit(filter.limit).all(&self.db).await
    }

    /// Ids of up to `limit` pending jobs, oldest first.
    pub async fn pending_ids(&self, limit: u64) -> Result<Vec<Uuid>, DbErr> {
        Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .into_tuple::<Uuid>()
            .all(&self.db)
            .await
    }

    /// Atomically move a job from pending to running.
    ///
    /// Returns `None` when another dispatcher claimed it first.
    pub async fn claim(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        let claimed = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(Column::StartedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if claimed.rows_affected == 0 {
            tracing::debug!(job_id = %job_id, "Job already claimed by another dispatcher");
            return Ok(None);
        }

        self.find(job_id).await
    }

    /// Record success for a running job.
    pub async fn mark_succeeded(&self, job_id: Uuid, result: JsonValue) -> Result<bool, DbErr> {
        let updated = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Succeeded.as_str()))
            .col_expr(Column::Result, Expr::value(result))
            .col_expr(Column::FinishedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(updated.rows_affected == 1)
    }

    /// Record failure for a running job. `message` must already be truncated.
    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        message: &str,
        kind: SyncErrorKind,
    ) -> Result<bool, DbErr> {
        let updated = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(Column::LastError, Expr::value(message.to_string()))
            .col_expr(Column::ErrorKind, Expr::value(kind.as_str()))
            .col_expr(Column::FinishedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(updated.rows_affected == 1)
    }
}
