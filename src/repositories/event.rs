//! Event repository
//!
//! Reads events for payload building and writes back the sync-owned columns.
//! Every query is scoped by agency.

use chrono::Utc;
use sea_orm::prelude::Date;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::event::{Column, Entity, Model};

pub const SYNC_STATUS_SYNCED: &str = "synced";
pub const SYNC_STATUS_ERROR: &str = "error";
pub const EVENT_STATUS_CANCELLED: &str = "cancelled";

/// Document fields returned by the invoicing provider.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedDocument {
    pub id: String,
    pub number: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventRepository {
    db: DatabaseConnection,
}

impl EventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, agency_id: Uuid, event_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(event_id.to_string())
            .filter(Column::AgencyId.eq(agency_id))
            .one(&self.db)
            .await
    }

    /// Find the event a provider event id was written for, in either calendar.
    pub async fn find_by_provider_event_id(
        &self,
        agency_id: Uuid,
        provider_event_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .filter(
                Condition::any()
                    .add(Column::GoogleEventId.eq(provider_event_id))
                    .add(Column::ArtistGoogleEventId.eq(provider_event_id)),
            )
            .one(&self.db)
            .await
    }

    pub async fn list_for_agency(&self, agency_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .order_by_asc(Column::EventDate)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
    }

    async fn update_columns(
        &self,
        agency_id: Uuid,
        event_id: &str,
        columns: Vec<(Column, SimpleExpr)>,
    ) -> Result<bool, DbErr> {
        let mut update = Entity::update_many();
        for (column, value) in columns {
            update = update.col_expr(column, value);
        }
        let result = update
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(event_id))
            .filter(Column::AgencyId.eq(agency_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Store the agency-calendar event id and link and clear any error marker.
    pub async fn record_calendar_push(
        &self,
        agency_id: Uuid,
        event_id: &str,
        provider_event_id: &str,
        link: Option<&str>,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::GoogleEventId, Expr::value(provider_event_id.to_string())),
                (Column::GoogleEventLink, Expr::value(link.map(str::to_string))),
                (Column::CalendarSyncStatus, Expr::value(SYNC_STATUS_SYNCED)),
                (Column::CalendarSyncError, Expr::value(Option::<String>::None)),
                (Column::CalendarSyncedAt, Expr::value(Utc::now().fixed_offset())),
            ],
        )
        .await
    }

    /// Store the id of the mirror event in the artist's calendar.
    pub async fn record_artist_mirror(
        &self,
        agency_id: Uuid,
        event_id: &str,
        provider_event_id: &str,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![(
                Column::ArtistGoogleEventId,
                Expr::value(provider_event_id.to_string()),
            )],
        )
        .await
    }

    pub async fn mark_calendar_error(
        &self,
        agency_id: Uuid,
        event_id: &str,
        message: &str,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::CalendarSyncStatus, Expr::value(SYNC_STATUS_ERROR)),
                (Column::CalendarSyncError, Expr::value(message.to_string())),
            ],
        )
        .await
    }

    /// The calendar event was deleted upstream. The local row is kept.
    pub async fn mark_cancelled_from_calendar(
        &self,
        agency_id: Uuid,
        event_id: &str,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::Status, Expr::value(EVENT_STATUS_CANCELLED)),
                (Column::CalendarSyncStatus, Expr::value(SYNC_STATUS_SYNCED)),
                (Column::CalendarSyncError, Expr::value(Option::<String>::None)),
                (Column::CalendarSyncedAt, Expr::value(Utc::now().fixed_offset())),
            ],
        )
        .await
    }

    /// Apply the provider-sourced date of a changed calendar event.
    pub async fn apply_calendar_date(
        &self,
        agency_id: Uuid,
        event_id: &str,
        date: Date,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::EventDate, Expr::value(date)),
                (Column::CalendarSyncStatus, Expr::value(SYNC_STATUS_SYNCED)),
                (Column::CalendarSyncError, Expr::value(Option::<String>::None)),
                (Column::CalendarSyncedAt, Expr::value(Utc::now().fixed_offset())),
            ],
        )
        .await
    }

    /// Store the issued document and clear any error marker.
    pub async fn record_invoice(
        &self,
        agency_id: Uuid,
        event_id: &str,
        document: &IssuedDocument,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::InvoiceDocumentId, Expr::value(document.id.clone())),
                (Column::InvoiceDocumentNumber, Expr::value(document.number.clone())),
                (Column::InvoiceDocumentUrl, Expr::value(document.url.clone())),
                (Column::InvoiceSyncStatus, Expr::value(SYNC_STATUS_SYNCED)),
                (Column::InvoiceSyncError, Expr::value(Option::<String>::None)),
            ],
        )
        .await
    }

    pub async fn mark_invoice_error(
        &self,
        agency_id: Uuid,
        event_id: &str,
        message: &str,
    ) -> Result<bool, DbErr> {
        self.update_columns(
            agency_id,
            event_id,
            vec![
                (Column::InvoiceSyncStatus, Expr::value(SYNC_STATUS_ERROR)),
                (Column::InvoiceSyncError, Expr::value(message.to_string())),
            ],
        )
        .await
    }
}
