//! Integration connection repository
//!
//! Connection rows are created lazily by the adapters. Config keys that must
//! converge across concurrent writers (the spreadsheet id) are written with
//! [`IntegrationConnectionRepository::set_config_if_absent`].

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::models::Provider;
use crate::models::integration_connection::{ActiveModel, Column, Entity, Model};

pub const CONFIG_CALENDAR_ID: &str = "calendarId";
pub const CONFIG_SPREADSHEET_ID: &str = "spreadsheetId";
pub const CONFIG_SPREADSHEET_URL: &str = "spreadsheetUrl";

const STATUS_ACTIVE: &str = "active";
const MAX_CONFIG_WRITE_ATTEMPTS: usize = 3;

/// Read a string value from a connection's config.
pub fn config_str<'a>(model: &'a Model, key: &str) -> Option<&'a str> {
    model
        .config
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct IntegrationConnectionRepository {
    db: DatabaseConnection,
}

impl IntegrationConnectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, agency_id: Uuid, provider: Provider) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .one(&self.db)
            .await
    }

    /// Fetch the connection row, inserting an empty one on first use.
    pub async fn get_or_create(&self, agency_id: Uuid, provider: Provider) -> Result<Model, DbErr> {
        if let Some(existing) = self.find(agency_id, provider).await? {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let inserted = ActiveModel {
            id: Set(Uuid::new_v4()),
            agency_id: Set(agency_id),
            provider: Set(provider.as_str().to_string()),
            status: Set(STATUS_ACTIVE.to_string()),
            config: Set(JsonValue::Object(Map::new())),
            last_synced_at: Set(None),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await;

        match inserted {
            Ok(model) => Ok(model),
            // A concurrent caller inserted the row between our read and write.
            Err(err) => self.find(agency_id, provider).await?.ok_or(err),
        }
    }

    /// Write `key = value` unless the key already holds a value.
    ///
    /// Returns the value stored after the call, which is the other writer's
    /// value when this caller lost the race.
    pub async fn set_config_if_absent(
        &self,
        agency_id: Uuid,
        provider: Provider,
        key: &str,
        value: &str,
        extra: &[(&str, &str)],
    ) -> Result<String, DbErr> {
        for _ in 0..MAX_CONFIG_WRITE_ATTEMPTS {
            let row = self.get_or_create(agency_id, provider).await?;
            if let Some(existing) = config_str(&row, key) {
                return Ok(existing.to_string());
            }

            let mut config = row.config.as_object().cloned().unwrap_or_default();
            config.insert(key.to_string(), JsonValue::String(value.to_string()));
            for (extra_key, extra_value) in extra {
                config.insert(
                    (*extra_key).to_string(),
                    JsonValue::String((*extra_value).to_string()),
                );
            }

            let result = Entity::update_many()
                .col_expr(Column::Config, Expr::value(JsonValue::Object(config)))
                .col_expr(Column::Version, Expr::value(row.version + 1))
                .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
                .filter(Column::Id.eq(row.id))
                .filter(Column::Version.eq(row.version))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                return Ok(value.to_string());
            }
        }

        let row = self.get_or_create(agency_id, provider).await?;
        config_str(&row, key).map(str::to_string).ok_or_else(|| {
            DbErr::Custom(format!(
                "could not write {key} for {provider} connection of agency {agency_id}"
            ))
        })
    }

    /// Mark the connection active and stamp its last successful sync.
    pub async fn mark_synced(&self, agency_id: Uuid, provider: Provider) -> Result<(), DbErr> {
        let row = self.get_or_create(agency_id, provider).await?;
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(STATUS_ACTIVE))
            .col_expr(Column::LastSyncedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(row.id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
