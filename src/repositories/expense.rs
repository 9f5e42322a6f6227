//! Expense repository

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::models::expense::{Column, Entity, Model, STATUS_ERROR, STATUS_NOT_SYNCED, STATUS_SYNCED};

#[derive(Debug, Clone)]
pub struct ExpenseRepository {
    db: DatabaseConnection,
}

impl ExpenseRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list_for_agency(&self, agency_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .order_by_asc(Column::ExpenseDate)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
    }

    /// Expenses never synced or whose last attempt failed.
    pub async fn list_unsynced(&self, agency_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .filter(Column::InvoiceSyncStatus.is_in([STATUS_NOT_SYNCED, STATUS_ERROR]))
            .order_by_asc(Column::ExpenseDate)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn mark_synced(
        &self,
        agency_id: Uuid,
        expense_id: &str,
        document_id: &str,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::InvoiceSyncStatus, Expr::value(STATUS_SYNCED))
            .col_expr(Column::InvoiceSyncError, Expr::value(Option::<String>::None))
            .col_expr(Column::InvoiceDocumentId, Expr::value(document_id.to_string()))
            .col_expr(Column::InvoiceSyncedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(expense_id))
            .filter(Column::AgencyId.eq(agency_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_error(
        &self,
        agency_id: Uuid,
        expense_id: &str,
        message: &str,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::InvoiceSyncStatus, Expr::value(STATUS_ERROR))
            .col_expr(Column::InvoiceSyncError, Expr::value(message.to_string()))
            .filter(Column::Id.eq(expense_id))
            .filter(Column::AgencyId.eq(agency_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
