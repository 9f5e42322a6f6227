//! Migration to create the webhook_channels table.
//!
//! Tracks calendar push subscriptions and the incremental sync cursor for
//! each watched calendar. At most one row per (agency, calendar).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookChannels::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookChannels::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookChannels::AgencyId).uuid().not_null())
                    .col(ColumnDef::new(WebhookChannels::Scope).text().not_null())
                    .col(ColumnDef::new(WebhookChannels::TargetId).text().null())
                    .col(ColumnDef::new(WebhookChannels::CalendarId).text().not_null())
                    .col(ColumnDef::new(WebhookChannels::ChannelId).text().not_null())
                    .col(ColumnDef::new(WebhookChannels::ChannelToken).text().not_null())
                    .col(ColumnDef::new(WebhookChannels::ResourceId).text().null())
                    .col(
                        ColumnDef::new(WebhookChannels::Expiration)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookChannels::SyncToken).text().null())
                    .col(
                        ColumnDef::new(WebhookChannels::LastPulledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookChannels::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookChannels::UpdatedAt)
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
                    .name("uq_webhook_channels_agency_calendar")
                    .table(WebhookChannels::Table)
                    .col(WebhookChannels::AgencyId)
                    .col(WebhookChannels::CalendarId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Inbound pushes are resolved by provider channel id
        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_channels_channel_id")
                    .table(WebhookChannels::Table)
                    .col(WebhookChannels::ChannelId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_webhook_channels_channel_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("uq_webhook_channels_agency_calendar")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookChannels::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookChannels {
    Table,
    Id,
    AgencyId,
    Scope,
    TargetId,
    CalendarId,
    ChannelId,
    ChannelToken,
    ResourceId,
    Expiration,
    SyncToken,
    LastPulledAt,
    CreatedAt,
    UpdatedAt,
}
