//! WebhookChannel entity model
//!
//! A calendar push subscription plus the incremental-sync cursor for the
//! calendar it watches.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_channels")]
pub struct Model {
    /// Stable row id; survives channel renewals
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub agency_id: Uuid,

    /// `company` for the agency calendar, `artist` for a per-artist calendar
    pub scope: String,

    /// Owning internal entity for per-entity channels
    pub target_id: Option<String>,

    pub calendar_id: String,

    /// Provider channel id; replaced on every renewal
    pub channel_id: String,

    /// Shared token echoed back on inbound pushes
    pub channel_token: String,

    pub resource_id: Option<String>,

    pub expiration: Option<DateTimeWithTimeZone>,

    /// Resumption cursor from the last successful list call; empty until initialized
    pub sync_token: Option<String>,

    pub last_pulled_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
