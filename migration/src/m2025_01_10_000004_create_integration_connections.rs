//! Migration to create the integration_connections table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IntegrationConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::AgencyId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::Provider)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::Config)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(IntegrationConnections::UpdatedAt)
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
                    .name("uq_integration_connections_agency_provider")
                    .table(IntegrationConnections::Table)
                    .col(IntegrationConnections::AgencyId)
                    .col(IntegrationConnections::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_integration_connections_agency_provider")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(IntegrationConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IntegrationConnections {
    Table,
    Id,
    AgencyId,
    Provider,
    Status,
    Config,
    LastSyncedAt,
    Version,
    CreatedAt,
    UpdatedAt,
}
