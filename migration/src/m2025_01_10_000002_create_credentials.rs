//! Migration to create the credentials table.
//!
//! One row per (agency, provider). Token and secret columns hold AES-GCM
//! ciphertext; `version` backs the conditional write used by token refresh.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(Credentials::Provider).text().not_null())
                    .col(ColumnDef::new(Credentials::AccessToken).binary().null())
                    .col(ColumnDef::new(Credentials::RefreshToken).binary().null())
                    .col(ColumnDef::new(Credentials::ApiKeyId).text().null())
                    .col(ColumnDef::new(Credentials::ApiKeySecret).binary().null())
                    .col(ColumnDef::new(Credentials::Scope).text().null())
                    .col(ColumnDef::new(Credentials::TokenType).text().null())
                    .col(
                        ColumnDef::new(Credentials::ExpiryTimestamp)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Credentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Credentials::UpdatedAt)
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
                    .name("uq_credentials_agency_provider")
                    .table(Credentials::Table)
                    .col(Credentials::AgencyId)
                    .col(Credentials::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_credentials_agency_provider").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Credentials {
    Table,
    Id,
    AgencyId,
    Provider,
    AccessToken,
    RefreshToken,
    ApiKeyId,
    ApiKeySecret,
    Scope,
    TokenType,
    ExpiryTimestamp,
    Version,
    CreatedAt,
    UpdatedAt,
}
