//! IntegrationConnection entity model
//!
//! Per-agency, per-provider connection metadata. `config` holds provider
//! settings such as `calendarId` or `spreadsheetId`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "integration_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub agency_id: Uuid,

    pub provider: String,

    /// `active` or `error`
    pub status: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Bumped on every config write; used for set-if-absent semantics
    pub version: i32,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
