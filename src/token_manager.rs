//! # Token Manager
//!
//! Hands out access tokens that stay valid for at least the configured skew,
//! refreshing them on demand.
//!
//! Google credentials (calendar, spreadsheet) are refreshed with the OAuth
//! refresh-token grant. Invoicing credentials are exchanged from a stored
//! client id and secret. Refreshes for one `(agency, provider)` are serialized
//! in-process, and the write back is conditional on the row version read
//! before the exchange; a writer that loses the race adopts the stored token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use oauth2::basic::{BasicClient, BasicErrorResponseType};
use oauth2::{ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl};
use reqwest::StatusCode;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::error::{SyncError, truncate_message};
use crate::config::{AppConfig, GoogleConfig, TokenRefreshConfig};
use crate::models::Provider;
use crate::repositories::credential::{
    CredentialError, CredentialRepository, CredentialSecrets, RefreshedToken,
};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no usable {provider} credentials stored for agency {agency_id}")]
    MissingCredentials { agency_id: Uuid, provider: Provider },

    #[error("{provider} credentials were rejected: {message}")]
    InvalidCredentials { provider: Provider, message: String },

    #[error("{provider} token refresh failed: {message}")]
    Transient { provider: Provider, message: String },

    #[error(transparent)]
    Store(#[from] CredentialError),
}

impl From<TokenError> for SyncError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::MissingCredentials { .. } | TokenError::InvalidCredentials { .. } => {
                SyncError::Configuration(err.to_string())
            }
            TokenError::Transient { .. } => SyncError::Transient(err.to_string()),
            TokenError::Store(CredentialError::Database(db)) => SyncError::Storage(db),
            TokenError::Store(CredentialError::Crypto(_)) => {
                SyncError::Configuration(err.to_string())
            }
        }
    }
}

/// True when a token expiring at `expiry` must be refreshed before use at `now`.
/// Tokens with an unknown expiry are never trusted.
pub fn needs_refresh(
    expiry: Option<DateTimeWithTimeZone>,
    now: DateTime<Utc>,
    skew: Duration,
) -> bool {
    match expiry {
        Some(expiry) => expiry.with_timezone(&Utc) - now <= skew,
        None => true,
    }
}

enum RefreshGrant {
    OAuth {
        refresh_token: String,
        client_id: String,
        client_secret: String,
    },
    ApiKey {
        key_id: String,
        key_secret: String,
    },
}

#[derive(Serialize)]
struct ApiKeyRequest<'a> {
    id: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct ApiKeyResponse {
    token: String,
    /// Unix timestamp (seconds)
    #[serde(default)]
    expires: Option<i64>,
}

#[derive(Clone)]
pub struct TokenManager {
    credentials: CredentialRepository,
    http: reqwest::Client,
    google: GoogleConfig,
    invoicing_api_base: String,
    settings: TokenRefreshConfig,
    key_locks: Arc<Mutex<HashMap<(Uuid, Provider), Arc<Mutex<()>>>>>,
}

impl TokenManager {
    pub fn new(config: &AppConfig, credentials: CredentialRepository) -> Result<Self, SyncError> {
        // Token endpoints must not be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| SyncError::configuration(format!("failed to build token client: {e}")))?;

        Ok(Self {
            credentials,
            http,
            google: config.google.clone(),
            invoicing_api_base: config.invoicing.api_base.clone(),
            settings: config.token_refresh.clone(),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Return an access token usable for at least the skew window.
    pub async fn get_valid_access_token(
        &self,
        agency_id: Uuid,
        provider: Provider,
    ) -> Result<String, TokenError> {
        self.acquire(agency_id, provider, false).await
    }

    /// Refresh regardless of the stored expiry. Used after the provider rejected a token.
    pub async fn force_refresh(
        &self,
        agency_id: Uuid,
        provider: Provider,
    ) -> Result<String, TokenError> {
        self.acquire(agency_id, provider, true).await
    }

    async fn key_lock(&self, agency_id: Uuid, provider: Provider) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry((agency_id, provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[instrument(skip(self), fields(agency_id = %agency_id, provider = %provider))]
    async fn acquire(
        &self,
        agency_id: Uuid,
        provider: Provider,
        force: bool,
    ) -> Result<String, TokenError> {
        let lock = self.key_lock(agency_id, provider).await;
        let _guard = lock.lock().await;

        let row = self
            .credentials
            .find(agency_id, provider)
            .await?
            .ok_or(TokenError::MissingCredentials {
                agency_id,
                provider,
            })?;
        let secrets = self.credentials.secrets(&row)?;

        let skew = Duration::seconds(self.settings.skew_seconds as i64);
        if !force && !needs_refresh(row.expiry_timestamp, Utc::now(), skew) {
            if let Some(token) = secrets.access_token {
                debug!("Stored access token still valid");
                return Ok(token);
            }
        }

        let Some(grant) = self.refresh_grant(provider, &secrets) else {
            if force {
                return Err(TokenError::InvalidCredentials {
                    provider,
                    message: "token was rejected and no refresh grant is available".to_string(),
                });
            }
            debug!("No refresh grant available; using stored access token");
            return secrets
                .access_token
                .ok_or(TokenError::MissingCredentials {
                    agency_id,
                    provider,
                });
        };

        let started = Instant::now();
        let outcome = match grant {
            RefreshGrant::OAuth {
                refresh_token,
                client_id,
                client_secret,
            } => {
                self.exchange_refresh_token(provider, refresh_token, client_id, client_secret)
                    .await
            }
            RefreshGrant::ApiKey { key_id, key_secret } => {
                self.exchange_api_key(provider, &key_id, &key_secret).await
            }
        };
        histogram!("token_refresh_duration_ms", "provider" => provider.as_str())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        let refreshed = match outcome {
            Ok(refreshed) => refreshed,
            Err(err) => {
                let outcome = match err {
                    TokenError::InvalidCredentials { .. } => "rejected",
                    _ => "failed",
                };
                counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => outcome)
                    .increment(1);
                warn!(error = %err, forced = force, "Token refresh failed");
                return Err(err);
            }
        };

        if self.credentials.store_refreshed(&row, &refreshed).await? {
            counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => "success")
                .increment(1);
            info!(
                expires_at = %refreshed.expiry,
                forced = force,
                "Access token refreshed"
            );
            return Ok(refreshed.access_token);
        }

        // Another process refreshed between our read and our write.
        counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => "superseded")
            .increment(1);
        warn!("Concurrent refresh already stored a token; adopting it");
        let current = self
            .credentials
            .find(agency_id, provider)
            .await?
            .ok_or(TokenError::MissingCredentials {
                agency_id,
                provider,
            })?;
        self.credentials
            .secrets(&current)?
            .access_token
            .ok_or(TokenError::MissingCredentials {
                agency_id,
                provider,
            })
    }

    fn refresh_grant(
        &self,
        provider: Provider,
        secrets: &CredentialSecrets,
    ) -> Option<RefreshGrant> {
        match provider {
            Provider::Calendar | Provider::Spreadsheet => Some(RefreshGrant::OAuth {
                refresh_token: secrets.refresh_token.clone()?,
                client_id: self.google.client_id.clone()?,
                client_secret: self.google.client_secret.clone()?,
            }),
            Provider::Invoicing => Some(RefreshGrant::ApiKey {
                key_id: secrets.api_key_id.clone()?,
                key_secret: secrets.api_key_secret.clone()?,
            }),
        }
    }

    fn expiry_after(&self, lifetime: Option<std::time::Duration>) -> DateTimeWithTimeZone {
        let seconds = lifetime
            .map(|d| d.as_secs())
            .unwrap_or(self.settings.default_lifetime_seconds);
        (Utc::now() + Duration::seconds(seconds as i64)).fixed_offset()
    }

    async fn exchange_refresh_token(
        &self,
        provider: Provider,
        refresh_token: String,
        client_id: String,
        client_secret: String,
    ) -> Result<RefreshedToken, TokenError> {
        let token_url = TokenUrl::new(self.google.token_url.clone()).map_err(|e| {
            TokenError::InvalidCredentials {
                provider,
                message: format!("invalid token endpoint: {e}"),
            }
        })?;
        let client = BasicClient::new(ClientId::new(client_id))
            .set_client_secret(ClientSecret::new(client_secret))
            .set_token_uri(token_url);

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.http)
            .await
            .map_err(|err| match err {
                RequestTokenError::ServerResponse(response) => {
                    let message = match response.error_description() {
                        Some(description) => format!("{}: {description}", response.error()),
                        None => response.error().to_string(),
                    };
                    match response.error() {
                        BasicErrorResponseType::InvalidGrant
                        | BasicErrorResponseType::InvalidClient
                        | BasicErrorResponseType::UnauthorizedClient
                        | BasicErrorResponseType::InvalidScope
                        | BasicErrorResponseType::UnsupportedGrantType => {
                            TokenError::InvalidCredentials { provider, message }
                        }
                        _ => TokenError::Transient { provider, message },
                    }
                }
                other => TokenError::Transient {
                    provider,
                    message: truncate_message(&other.to_string(), 200),
                },
            })?;

        Ok(RefreshedToken {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            scope: response.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|scope| scope.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
            token_type: Some("Bearer".to_string()),
            expiry: self.expiry_after(response.expires_in()),
        })
    }

    async fn exchange_api_key(
        &self,
        provider: Provider,
        key_id: &str,
        key_secret: &str,
    ) -> Result<RefreshedToken, TokenError> {
        let url = format!("{}/account/token", self.invoicing_api_base.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .json(&ApiKeyRequest {
                id: key_id,
                secret: key_secret,
            })
            .send()
            .await
            .map_err(|e| TokenError::Transient {
                provider,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = truncate_message(&format!("{status}: {}", body.trim()), 200);
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    TokenError::Transient { provider, message }
                } else {
                    TokenError::InvalidCredentials { provider, message }
                },
            );
        }

        let body: ApiKeyResponse = response.json().await.map_err(|e| TokenError::Transient {
            provider,
            message: format!("unreadable token response: {e}"),
        })?;

        let expiry = body
            .expires
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|dt| dt.fixed_offset())
            .unwrap_or_else(|| self.expiry_after(None));

        Ok(RefreshedToken {
            access_token: body.token,
            refresh_token: None,
            scope: None,
            token_type: Some("Bearer".to_string()),
            expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_refresh_inside_skew() {
        let now = Utc::now();
        let skew = Duration::seconds(120);
        let soon = (now + Duration::seconds(60)).fixed_offset();
        let later = (now + Duration::hours(1)).fixed_offset();
        let boundary = (now + Duration::seconds(120)).fixed_offset();

        assert!(needs_refresh(Some(soon), now, skew));
        assert!(needs_refresh(Some(boundary), now, skew));
        assert!(!needs_refresh(Some(later), now, skew));
        assert!(needs_refresh(None, now, skew));
    }

    #[test]
    fn test_token_errors_map_to_sync_kinds() {
        use crate::adapters::error::SyncErrorKind;

        let missing: SyncError = TokenError::MissingCredentials {
            agency_id: Uuid::new_v4(),
            provider: Provider::Calendar,
        }
        .into();
        assert_eq!(missing.kind(), SyncErrorKind::Configuration);

        let revoked: SyncError = TokenError::InvalidCredentials {
            provider: Provider::Calendar,
            message: "invalid_grant".into(),
        }
        .into();
        assert_eq!(revoked.kind(), SyncErrorKind::Configuration);

        let network: SyncError = TokenError::Transient {
            provider: Provider::Invoicing,
            message: "connection reset".into(),
        }
        .into();
        assert_eq!(network.kind(), SyncErrorKind::Transient);
    }
}
