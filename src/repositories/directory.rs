//! Read access to clients and artists, plus the one artist column the
//! engine owns (`calendar_id`).

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::models::{artist, client};

#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    db: DatabaseConnection,
}

impl DirectoryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_client(
        &self,
        agency_id: Uuid,
        client_id: &str,
    ) -> Result<Option<client::Model>, DbErr> {
        client::Entity::find_by_id(client_id.to_string())
            .filter(client::Column::AgencyId.eq(agency_id))
            .one(&self.db)
            .await
    }

    pub async fn find_artist(
        &self,
        agency_id: Uuid,
        artist_id: &str,
    ) -> Result<Option<artist::Model>, DbErr> {
        artist::Entity::find_by_id(artist_id.to_string())
            .filter(artist::Column::AgencyId.eq(agency_id))
            .one(&self.db)
            .await
    }

    pub async fn list_clients(&self, agency_id: Uuid) -> Result<Vec<client::Model>, DbErr> {
        client::Entity::find()
            .filter(client::Column::AgencyId.eq(agency_id))
            .order_by_asc(client::Column::Name)
            .order_by_asc(client::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn list_artists(&self, agency_id: Uuid) -> Result<Vec<artist::Model>, DbErr> {
        artist::Entity::find()
            .filter(artist::Column::AgencyId.eq(agency_id))
            .order_by_asc(artist::Column::Name)
            .order_by_asc(artist::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn set_artist_calendar(
        &self,
        agency_id: Uuid,
        artist_id: &str,
        calendar_id: &str,
    ) -> Result<(), DbErr> {
        artist::Entity::update_many()
            .col_expr(artist::Column::CalendarId, Expr::value(calendar_id.to_string()))
            .filter(artist::Column::Id.eq(artist_id))
            .filter(artist::Column::AgencyId.eq(agency_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
