//! Webhook channel repository

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::jobs::ChannelScope;
use crate::models::webhook_channel::{ActiveModel, Column, Entity, Model};

/// Fields returned by the provider when a push channel is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRegistration {
    pub channel_id: String,
    pub channel_token: String,
    pub resource_id: Option<String>,
    pub expiration: DateTimeWithTimeZone,
}

#[derive(Debug, Clone)]
pub struct WebhookChannelRepository {
    db: DatabaseConnection,
}

impl WebhookChannelRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, agency_id: Uuid, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id)
            .filter(Column::AgencyId.eq(agency_id))
            .one(&self.db)
            .await
    }

    /// Resolve an inbound push by the provider channel id it carries.
    pub async fn find_by_channel_id(&self, channel_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::ChannelId.eq(channel_id))
            .one(&self.db)
            .await
    }

    pub async fn find_by_calendar(
        &self,
        agency_id: Uuid,
        calendar_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .filter(Column::CalendarId.eq(calendar_id))
            .one(&self.db)
            .await
    }

    pub async fn list_for_agency(&self, agency_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Agencies owning at least one channel.
    pub async fn agencies_with_channels(&self) -> Result<Vec<Uuid>, DbErr> {
        Entity::find()
            .select_only()
            .column(Column::AgencyId)
            .distinct()
            .into_tuple::<Uuid>()
            .all(&self.db)
            .await
    }

    /// Store a new channel for a calendar, overwriting the row already held for it.
    pub async fn upsert_for_calendar(
        &self,
        agency_id: Uuid,
        scope: ChannelScope,
        target_id: Option<String>,
        calendar_id: &str,
        registration: &ChannelRegistration,
        sync_token: String,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();

        if let Some(existing) = self.find_by_calendar(agency_id, calendar_id).await? {
            let mut active: ActiveModel = existing.into();
            active.scope = Set(scope.as_str().to_string());
            active.target_id = Set(target_id);
            active.channel_id = Set(registration.channel_id.clone());
            active.channel_token = Set(registration.channel_token.clone());
            active.resource_id = Set(registration.resource_id.clone());
            active.expiration = Set(Some(registration.expiration));
            active.sync_token = Set(Some(sync_token));
            active.updated_at = Set(now);
            return active.update(&self.db).await;
        }

        ActiveModel {
            id: Set(Uuid::new_v4()),
            agency_id: Set(agency_id),
            scope: Set(scope.as_str().to_string()),
            target_id: Set(target_id),
            calendar_id: Set(calendar_id.to_string()),
            channel_id: Set(registration.channel_id.clone()),
            channel_token: Set(registration.channel_token.clone()),
            resource_id: Set(registration.resource_id.clone()),
            expiration: Set(Some(registration.expiration)),
            sync_token: Set(Some(sync_token)),
            last_pulled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
    }

    /// Swap in a renewed registration with a single update.
    ///
    /// `sync_token` is only written when given, so a cursor advanced by a
    /// concurrent pull is never rolled back.
    pub async fn replace_registration(
        &self,
        id: Uuid,
        registration: &ChannelRegistration,
        sync_token: Option<&str>,
    ) -> Result<bool, DbErr> {
        let mut update = Entity::update_many()
            .col_expr(Column::ChannelId, Expr::value(registration.channel_id.clone()))
            .col_expr(
                Column::ChannelToken,
                Expr::value(registration.channel_token.clone()),
            )
            .col_expr(Column::ResourceId, Expr::value(registration.resource_id.clone()))
            .col_expr(Column::Expiration, Expr::value(registration.expiration))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()));
        if let Some(sync_token) = sync_token {
            update = update.col_expr(Column::SyncToken, Expr::value(sync_token.to_string()));
        }
        let result = update.filter(Column::Id.eq(id)).exec(&self.db).await?;
        Ok(result.rows_affected == 1)
    }

    /// Forget the expiry of a channel that is no longer live, so renewal picks it up.
    pub async fn clear_expiration(&self, id: Uuid) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::Expiration, Expr::value(Option::<DateTimeWithTimeZone>::None))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Advance the pull cursor after a successful list (or a reset).
    pub async fn record_pull(&self, id: Uuid, sync_token: &str) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::SyncToken, Expr::value(sync_token.to_string()))
            .col_expr(Column::LastPulledAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
