//! Migration to create the business tables the sync engine reads and writes back to.
//!
//! Only the columns the engine touches are modeled here: identity, agency
//! scoping, the fields used to build provider payloads, and the sync-status and
//! external-id columns the engine owns.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Clients::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Clients::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Clients::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(Clients::Name).text().not_null())
                    .col(ColumnDef::new(Clients::BusinessName).text().null())
                    .col(ColumnDef::new(Clients::Email).text().null())
                    .col(ColumnDef::new(Clients::Phone).text().null())
                    .col(ColumnDef::new(Clients::TaxId).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Artists::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Artists::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Artists::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(Artists::Name).text().not_null())
                    .col(ColumnDef::new(Artists::Email).text().null())
                    .col(ColumnDef::new(Artists::Phone).text().null())
                    .col(ColumnDef::new(Artists::CalendarId).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Events::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(Events::ClientId).text().null())
                    .col(ColumnDef::new(Events::ArtistId).text().null())
                    .col(ColumnDef::new(Events::EventDate).date().not_null())
                    .col(
                        ColumnDef::new(Events::Status)
                            .text()
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(ColumnDef::new(Events::Description).text().null())
                    .col(ColumnDef::new(Events::Location).text().null())
                    .col(ColumnDef::new(Events::Amount).double().null())
                    .col(ColumnDef::new(Events::PaymentDate).date().null())
                    .col(ColumnDef::new(Events::DocumentType).text().null())
                    .col(ColumnDef::new(Events::GoogleEventId).text().null())
                    .col(ColumnDef::new(Events::GoogleEventLink).text().null())
                    .col(ColumnDef::new(Events::ArtistGoogleEventId).text().null())
                    .col(ColumnDef::new(Events::CalendarSyncStatus).text().null())
                    .col(ColumnDef::new(Events::CalendarSyncError).text().null())
                    .col(
                        ColumnDef::new(Events::CalendarSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Events::InvoiceDocumentId).text().null())
                    .col(ColumnDef::new(Events::InvoiceDocumentNumber).text().null())
                    .col(ColumnDef::new(Events::InvoiceDocumentUrl).text().null())
                    .col(ColumnDef::new(Events::InvoiceSyncStatus).text().null())
                    .col(ColumnDef::new(Events::InvoiceSyncError).text().null())
                    .col(
                        ColumnDef::new(Events::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_events_agency_google_event")
                    .table(Events::Table)
                    .col(Events::AgencyId)
                    .col(Events::GoogleEventId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Expenses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Expenses::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Expenses::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(Expenses::Description).text().null())
                    .col(ColumnDef::new(Expenses::SupplierName).text().null())
                    .col(ColumnDef::new(Expenses::Amount).double().null())
                    .col(ColumnDef::new(Expenses::ExpenseDate).date().not_null())
                    .col(
                        ColumnDef::new(Expenses::InvoiceSyncStatus)
                            .text()
                            .not_null()
                            .default("not-synced"),
                    )
                    .col(ColumnDef::new(Expenses::InvoiceSyncError).text().null())
                    .col(ColumnDef::new(Expenses::InvoiceDocumentId).text().null())
                    .col(
                        ColumnDef::new(Expenses::InvoiceSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_expenses_agency_sync_status")
                    .table(Expenses::Table)
                    .col(Expenses::AgencyId)
                    .col(Expenses::InvoiceSyncStatus)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_expenses_agency_sync_status").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_events_agency_google_event").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Expenses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Artists::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Clients::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
    AgencyId,
    Name,
    BusinessName,
    Email,
    Phone,
    TaxId,
}

#[derive(DeriveIden)]
enum Artists {
    Table,
    Id,
    AgencyId,
    Name,
    Email,
    Phone,
    CalendarId,
}

#[derive(DeriveIden)]
enum Events {
    Table,
    Id,
    AgencyId,
    ClientId,
    ArtistId,
    EventDate,
    Status,
    Description,
    Location,
    Amount,
    PaymentDate,
    DocumentType,
    GoogleEventId,
    GoogleEventLink,
    ArtistGoogleEventId,
    CalendarSyncStatus,
    CalendarSyncError,
    CalendarSyncedAt,
    InvoiceDocumentId,
    InvoiceDocumentNumber,
    InvoiceDocumentUrl,
    InvoiceSyncStatus,
    InvoiceSyncError,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Expenses {
    Table,
    Id,
    AgencyId,
    Description,
    SupplierName,
    Amount,
    ExpenseDate,
    InvoiceSyncStatus,
    InvoiceSyncError,
    InvoiceDocumentId,
    InvoiceSyncedAt,
}
