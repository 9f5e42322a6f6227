//! Credential repository
//!
//! Owns sealing and unsealing of stored secrets. Token writes made by a
//! refresh are conditional on the row version observed before the refresh
//! call, so two racing refreshers cannot silently overwrite each other.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::{CryptoError, CryptoKey, credential_aad, open_str, seal_str};
use crate::models::Provider;
use crate::models::credential::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("credential secret could not be read: {0}")]
    Crypto(#[from] CryptoError),
}

/// Plaintext view of a credential row.
#[derive(Clone, Default)]
pub struct CredentialSecrets {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub api_key_id: Option<String>,
    pub api_key_secret: Option<String>,
}

impl std::fmt::Debug for CredentialSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSecrets")
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &self.api_key_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Token set written by the consent flow.
#[derive(Debug, Clone)]
pub struct OAuthGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expiry: Option<DateTimeWithTimeZone>,
}

/// Result of a successful refresh exchange.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present when the provider rotated the refresh token
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expiry: DateTimeWithTimeZone,
}

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

impl CredentialRepository {
    pub fn new(db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn find(
        &self,
        agency_id: Uuid,
        provider: Provider,
    ) -> Result<Option<Model>, CredentialError> {
        Ok(Entity::find()
            .filter(Column::AgencyId.eq(agency_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .one(&self.db)
            .await?)
    }

    /// Decrypt every secret column of `row`.
    pub fn secrets(&self, row: &Model) -> Result<CredentialSecrets, CredentialError> {
        let provider: Provider = row
            .provider
            .parse()
            .map_err(|e: String| CryptoError::DecryptionFailed(e))?;
        let aad = credential_aad(row.agency_id, provider);
        let open = |sealed: &Option<Vec<u8>>| {
            sealed
                .as_deref()
                .map(|bytes| open_str(&self.crypto_key, &aad, bytes))
                .transpose()
        };

        let secrets = CredentialSecrets {
            access_token: open(&row.access_token)?,
            refresh_token: open(&row.refresh_token)?,
            api_key_id: row.api_key_id.clone(),
            api_key_secret: open(&row.api_key_secret)?,
        };

        if secrets.access_token.is_none() && secrets.refresh_token.is_none() {
            tracing::debug!(
                agency_id = %row.agency_id,
                provider = %row.provider,
                "Credential row carries no OAuth tokens"
            );
        }

        Ok(secrets)
    }

    fn seal(
        &self,
        agency_id: Uuid,
        provider: Provider,
        secret: Option<&str>,
    ) -> Result<Option<Vec<u8>>, CredentialError> {
        let aad = credential_aad(agency_id, provider);
        Ok(secret
            .map(|value| seal_str(&self.crypto_key, &aad, value))
            .transpose()?)
    }

    /// Store tokens obtained from a consent flow, replacing any existing row.
    pub async fn upsert_oauth(
        &self,
        agency_id: Uuid,
        provider: Provider,
        grant: OAuthGrant,
    ) -> Result<Model, CredentialError> {
        let access = self.seal(agency_id, provider, Some(&grant.access_token))?;
        let refresh = self.seal(agency_id, provider, grant.refresh_token.as_deref())?;
        let now = Utc::now().fixed_offset();

        let model = match self.find(agency_id, provider).await? {
            Some(existing) => {
                let version = existing.version + 1;
                let mut active: ActiveModel = existing.into();
                active.access_token = Set(access);
                active.refresh_token = Set(refresh);
                active.scope = Set(grant.scope);
                active.token_type = Set(grant.token_type);
                active.expiry_timestamp = Set(grant.expiry);
                active.version = Set(version);
                active.updated_at = Set(now);
                active.update(&self.db).await?
            }
            None => {
                ActiveModel {
                    id: Set(Uuid::new_v4()),
                    agency_id: Set(agency_id),
                    provider: Set(provider.as_str().to_string()),
                    access_token: Set(access),
                    refresh_token: Set(refresh),
                    api_key_id: Set(None),
                    api_key_secret: Set(None),
                    scope: Set(grant.scope),
                    token_type: Set(grant.token_type),
                    expiry_timestamp: Set(grant.expiry),
                    version: Set(0),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?
            }
        };

        tracing::info!(agency_id = %agency_id, provider = %provider, "OAuth credential stored");
        Ok(model)
    }

    /// Store an API key pair used for client-credential exchanges.
    pub async fn upsert_api_key(
        &self,
        agency_id: Uuid,
        provider: Provider,
        key_id: &str,
        key_secret: &str,
    ) -> Result<Model, CredentialError> {
        let sealed_secret = self.seal(agency_id, provider, Some(key_secret))?;
        let now = Utc::now().fixed_offset();

        let model = match self.find(agency_id, provider).await? {
            Some(existing) => {
                let version = existing.version + 1;
                let mut active: ActiveModel = existing.into();
                active.api_key_id = Set(Some(key_id.to_string()));
                active.api_key_secret = Set(sealed_secret);
                // A new key invalidates whatever token the old key produced.
                active.access_token = Set(None);
                active.expiry_timestamp = Set(None);
                active.version = Set(version);
                active.updated_at = Set(now);
                active.update(&self.db).await?
            }
            None => {
                ActiveModel {
                    id: Set(Uuid::new_v4()),
                    agency_id: Set(agency_id),
                    provider: Set(provider.as_str().to_string()),
                    access_token: Set(None),
                    refresh_token: Set(None),
                    api_key_id: Set(Some(key_id.to_string())),
                    api_key_secret: Set(sealed_secret),
                    scope: Set(None),
                    token_type: Set(None),
                    expiry_timestamp: Set(None),
                    version: Set(0),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?
            }
        };

        tracing::info!(agency_id = %agency_id, provider = %provider, "API key credential stored");
        Ok(model)
    }

    /// Persist a refreshed token if the row still has the version `observed` was read at.
    ///
    /// Returns `false` when another writer got there first; the caller should
    /// re-read the row and use the winner's token.
    pub async fn store_refreshed(
        &self,
        observed: &Model,
        token: &RefreshedToken,
    ) -> Result<bool, CredentialError> {
        let provider: Provider = observed
            .provider
            .parse()
            .map_err(|e: String| CryptoError::EncryptionFailed(e))?;
        let access = self.seal(observed.agency_id, provider, Some(&token.access_token))?;

        let mut update = Entity::update_many()
            .col_expr(Column::AccessToken, Expr::value(access))
            .col_expr(Column::ExpiryTimestamp, Expr::value(token.expiry))
            .col_expr(Column::Version, Expr::value(observed.version + 1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()));

        if let Some(ref rotated) = token.refresh_token {
            let sealed = self.seal(observed.agency_id, provider, Some(rotated))?;
            update = update.col_expr(Column::RefreshToken, Expr::value(sealed));
        }
        if let Some(ref scope) = token.scope {
            update = update.col_expr(Column::Scope, Expr::value(scope.clone()));
        }
        if let Some(ref token_type) = token.token_type {
            update = update.col_expr(Column::TokenType, Expr::value(token_type.clone()));
        }

        let result = update
            .filter(Column::Id.eq(observed.id))
            .filter(Column::Version.eq(observed.version))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
