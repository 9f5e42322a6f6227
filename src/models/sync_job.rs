//! SyncJob entity model
//!
//! One row per unit of integration work. Rows are append-only from the
//! engine's point of view: status moves forward and retries are new rows.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Agency (tenant) the job belongs to
    pub agency_id: Uuid,

    /// Provider slug (`calendar`, `invoicing`, `spreadsheet`)
    pub provider: String,

    /// Provider-specific operation name, e.g. `event-upsert`
    pub kind: String,

    /// pending, running, succeeded or failed
    pub status: String,

    /// Operation input, validated against the typed job request at dispatch
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Operation output, set only on success
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<JsonValue>,

    /// Truncated failure message, set only on failure
    pub last_error: Option<String>,

    /// Error classification for failed jobs (configuration, transient, ...)
    pub error_kind: Option<String>,

    /// The failed job this row was created to retry, if any
    pub retry_of: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
