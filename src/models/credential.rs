//! Credential entity model
//!
//! OAuth token set (or API key pair) for one agency and provider. Secret
//! columns are stored encrypted; see [`crate::crypto`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub agency_id: Uuid,

    pub provider: String,

    /// Encrypted access token
    pub access_token: Option<Vec<u8>>,

    /// Encrypted refresh token
    pub refresh_token: Option<Vec<u8>>,

    /// Client id used for the invoicing key exchange
    pub api_key_id: Option<String>,

    /// Encrypted client secret used for the invoicing key exchange
    pub api_key_secret: Option<Vec<u8>>,

    pub scope: Option<String>,

    pub token_type: Option<String>,

    /// When the access token stops being valid
    pub expiry_timestamp: Option<DateTimeWithTimeZone>,

    /// Bumped on every token write; refresh writes are conditional on it
    pub version: i32,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
