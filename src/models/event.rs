//! Event entity model
//!
//! Business fields are owned by the CRUD layer; the `google_*`,
//! `calendar_sync_*` and `invoice_*` columns are written by the sync engine.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::{Date, DateTimeWithTimeZone};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub agency_id: Uuid,

    pub client_id: Option<String>,

    pub artist_id: Option<String>,

    /// Whole-day event date
    pub event_date: Date,

    /// Business status; set to `cancelled` when the calendar event is deleted
    pub status: String,

    pub description: Option<String>,

    pub location: Option<String>,

    #[sea_orm(column_type = "Double", nullable)]
    pub amount: Option<f64>,

    pub payment_date: Option<Date>,

    /// Internal document type name, mapped to the invoicing provider's codes
    pub document_type: Option<String>,

    /// Provider event id in the agency calendar
    pub google_event_id: Option<String>,

    pub google_event_link: Option<String>,

    /// Provider event id of the mirror in the artist's own calendar
    pub artist_google_event_id: Option<String>,

    /// `synced` or `error`
    pub calendar_sync_status: Option<String>,

    pub calendar_sync_error: Option<String>,

    pub calendar_synced_at: Option<DateTimeWithTimeZone>,

    pub invoice_document_id: Option<String>,

    pub invoice_document_number: Option<String>,

    pub invoice_document_url: Option<String>,

    /// `synced` or `error`
    pub invoice_sync_status: Option<String>,

    pub invoice_sync_error: Option<String>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
