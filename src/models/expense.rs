//! Expense entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::{Date, DateTimeWithTimeZone};
use uuid::Uuid;

/// Sync status values for `invoice_sync_status`.
pub const STATUS_NOT_SYNCED: &str = "not-synced";
pub const STATUS_SYNCED: &str = "synced";
pub const STATUS_ERROR: &str = "error";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub agency_id: Uuid,
    pub description: Option<String>,
    pub supplier_name: Option<String>,
    #[sea_orm(column_type = "Double", nullable)]
    pub amount: Option<f64>,
    pub expense_date: Date,
    /// `not-synced`, `synced` or `error`
    pub invoice_sync_status: String,
    pub invoice_sync_error: Option<String>,
    pub invoice_document_id: Option<String>,
    pub invoice_synced_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
