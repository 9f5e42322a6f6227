//! Configuration loading for the agency sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `AGENCY_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix every recognized environment variable carries.
pub const ENV_PREFIX: &str = "AGENCY_SYNC_";

const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `AGENCY_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Shared secret guarding the trigger and operator endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// Upper bound for every outbound provider call
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub invoicing: InvoicingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Google OAuth client and API endpoints (calendar and spreadsheet providers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GoogleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_calendar_api_base")]
    pub calendar_api_base: String,
    #[serde(default = "default_google_sheets_api_base")]
    pub sheets_api_base: String,
}

/// Invoicing provider endpoint and document defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InvoicingConfig {
    #[serde(default = "default_invoicing_api_base")]
    pub api_base: String,
    /// ISO currency code applied to income and payment lines (default: ILS)
    #[serde(default = "default_invoicing_currency")]
    pub currency: String,
    /// Document language (default: he)
    #[serde(default = "default_invoicing_language")]
    pub language: String,
}

/// Dispatch batch sizing and failure message bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DispatchConfig {
    /// Batch size used when the trigger omits `limit` (default: 10)
    #[serde(default = "default_dispatch_default_batch_size")]
    pub default_batch_size: u64,

    /// Requested limits are clamped to this value (default: 50)
    #[serde(default = "default_dispatch_max_batch_size")]
    pub max_batch_size: u64,

    /// Maximum characters kept in `last_error` and entity error markers (default: 500)
    #[serde(default = "default_dispatch_max_error_length")]
    pub max_error_length: usize,
}

/// On-demand token refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Tokens expiring within this window are refreshed before use (default: 120)
    #[serde(default = "default_token_refresh_skew_seconds")]
    pub skew_seconds: u64,

    /// Lifetime assumed when a token response omits `expires_in` (default: 3600)
    #[serde(default = "default_token_refresh_default_lifetime_seconds")]
    pub default_lifetime_seconds: u64,
}

/// Calendar push channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WebhookConfig {
    /// Public URL the calendar provider delivers push notifications to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// Requested channel time-to-live (default: 7 days)
    #[serde(default = "default_webhook_channel_ttl_seconds")]
    pub channel_ttl_seconds: u64,

    /// Channels expiring within this window are renewed (default: 12 hours)
    #[serde(default = "default_webhook_renewal_threshold_seconds")]
    pub renewal_threshold_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            trigger_secret: None,
            crypto_key: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            google: GoogleConfig::default(),
            invoicing: InvoicingConfig::default(),
            dispatch: DispatchConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: default_google_token_url(),
            calendar_api_base: default_google_calendar_api_base(),
            sheets_api_base: default_google_sheets_api_base(),
        }
    }
}

impl Default for InvoicingConfig {
    fn default() -> Self {
        Self {
            api_base: default_invoicing_api_base(),
            currency: default_invoicing_currency(),
            language: default_invoicing_language(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_dispatch_default_batch_size(),
            max_batch_size: default_dispatch_max_batch_size(),
            max_error_length: default_dispatch_max_error_length(),
        }
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            skew_seconds: default_token_refresh_skew_seconds(),
            default_lifetime_seconds: default_token_refresh_default_lifetime_seconds(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            callback_url: None,
            channel_ttl_seconds: default_webhook_channel_ttl_seconds(),
            renewal_threshold_seconds: default_webhook_renewal_threshold_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Per-call timeout applied to every provider HTTP client.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.trigger_secret.is_some() {
            config.trigger_secret = Some(REDACTED.to_string());
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        if config.google.client_secret.is_some() {
            config.google.client_secret = Some(REDACTED.to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    fn is_relaxed_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if !self.is_relaxed_profile()
            && self
                .trigger_secret
                .as_deref()
                .is_none_or(|secret| secret.trim().is_empty())
        {
            return Err(ConfigError::MissingTriggerSecret);
        }

        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_seconds,
            });
        }

        self.dispatch.validate()?;
        self.token_refresh.validate()?;
        self.webhook.validate()?;

        Ok(())
    }
}

impl DispatchConfig {
    /// Validate batch bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 || self.default_batch_size > self.max_batch_size {
            return Err(ConfigError::InvalidDispatchBatchBounds {
                default: self.default_batch_size,
                max: self.max_batch_size,
            });
        }
        if self.max_error_length < 16 {
            return Err(ConfigError::InvalidDispatchErrorLength {
                value: self.max_error_length,
            });
        }
        Ok(())
    }

    /// Resolve a requested batch size: missing or zero falls back to the default,
    /// anything above the maximum is clamped.
    pub fn clamp_limit(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(0) | None => self.default_batch_size,
            Some(limit) => limit.min(self.max_batch_size),
        }
    }
}

impl TokenRefreshConfig {
    /// Validate token refresh bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.skew_seconds > 3600 {
            return Err(ConfigError::InvalidTokenRefreshSkew {
                value: self.skew_seconds,
            });
        }
        if self.default_lifetime_seconds <= self.skew_seconds {
            return Err(ConfigError::InvalidTokenRefreshLifetime {
                value: self.default_lifetime_seconds,
                skew: self.skew_seconds,
            });
        }
        Ok(())
    }
}

impl WebhookConfig {
    /// A channel must outlive the renewal threshold, otherwise every renewal is
    /// immediately due again.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_ttl_seconds <= self.renewal_threshold_seconds {
            return Err(ConfigError::InvalidWebhookTtl {
                ttl: self.channel_ttl_seconds,
                threshold: self.renewal_threshold_seconds,
            });
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/agency_sync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_calendar_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_google_sheets_api_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_invoicing_api_base() -> String {
    "https://api.greeninvoice.co.il/api/v1".to_string()
}

fn default_invoicing_currency() -> String {
    "ILS".to_string()
}

fn default_invoicing_language() -> String {
    "he".to_string()
}

fn default_dispatch_default_batch_size() -> u64 {
    10
}

fn default_dispatch_max_batch_size() -> u64 {
    50
}

fn default_dispatch_max_error_length() -> usize {
    500
}

fn default_token_refresh_skew_seconds() -> u64 {
    120
}

fn default_token_refresh_default_lifetime_seconds() -> u64 {
    3600
}

fn default_webhook_channel_ttl_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_webhook_renewal_threshold_seconds() -> u64 {
    12 * 60 * 60
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for AGENCY_SYNC_{key}")]
    InvalidValue { key: String, value: String },
    #[error("trigger secret is missing; set AGENCY_SYNC_TRIGGER_SECRET")]
    MissingTriggerSecret,
    #[error("crypto key is missing; set AGENCY_SYNC_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("http timeout must be positive, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("dispatch default batch size ({default}) must be between 1 and max batch size ({max})")]
    InvalidDispatchBatchBounds { default: u64, max: u64 },
    #[error("dispatch max error length must be at least 16 characters, got {value}")]
    InvalidDispatchErrorLength { value: usize },
    #[error("token refresh skew must not exceed 3600 seconds, got {value}")]
    InvalidTokenRefreshSkew { value: u64 },
    #[error("token refresh default lifetime ({value}s) must exceed the skew ({skew}s)")]
    InvalidTokenRefreshLifetime { value: u64, skew: u64 },
    #[error("webhook channel ttl ({ttl}s) must exceed the renewal threshold ({threshold}s)")]
    InvalidWebhookTtl { ttl: u64, threshold: u64 },
}

/// Loads configuration using layered `.env` files and `AGENCY_SYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local` and then
    /// the process environment, later layers overriding earlier ones.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);

        let crypto_key = match take_string(&mut layered, "CRYPTO_KEY") {
            Some(encoded) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let google = GoogleConfig {
            client_id: take_string(&mut layered, "GOOGLE_CLIENT_ID"),
            client_secret: take_string(&mut layered, "GOOGLE_CLIENT_SECRET"),
            token_url: take_string(&mut layered, "GOOGLE_TOKEN_URL")
                .unwrap_or_else(default_google_token_url),
            calendar_api_base: take_string(&mut layered, "GOOGLE_CALENDAR_API_BASE")
                .unwrap_or_else(default_google_calendar_api_base),
            sheets_api_base: take_string(&mut layered, "GOOGLE_SHEETS_API_BASE")
                .unwrap_or_else(default_google_sheets_api_base),
        };

        let invoicing = InvoicingConfig {
            api_base: take_string(&mut layered, "INVOICING_API_BASE")
                .unwrap_or_else(default_invoicing_api_base),
            currency: take_string(&mut layered, "INVOICING_CURRENCY")
                .unwrap_or_else(default_invoicing_currency),
            language: take_string(&mut layered, "INVOICING_LANGUAGE")
                .unwrap_or_else(default_invoicing_language),
        };

        let dispatch = DispatchConfig {
            default_batch_size: take_parsed(&mut layered, "DISPATCH_DEFAULT_BATCH_SIZE")?
                .unwrap_or_else(default_dispatch_default_batch_size),
            max_batch_size: take_parsed(&mut layered, "DISPATCH_MAX_BATCH_SIZE")?
                .unwrap_or_else(default_dispatch_max_batch_size),
            max_error_length: take_parsed(&mut layered, "DISPATCH_MAX_ERROR_LENGTH")?
                .unwrap_or_else(default_dispatch_max_error_length),
        };

        let token_refresh = TokenRefreshConfig {
            skew_seconds: take_parsed(&mut layered, "TOKEN_REFRESH_SKEW_SECONDS")?
                .unwrap_or_else(default_token_refresh_skew_seconds),
            default_lifetime_seconds: take_parsed(
                &mut layered,
                "TOKEN_REFRESH_DEFAULT_LIFETIME_SECONDS",
            )?
            .unwrap_or_else(default_token_refresh_default_lifetime_seconds),
        };

        let webhook = WebhookConfig {
            callback_url: take_string(&mut layered, "WEBHOOK_CALLBACK_URL"),
            channel_ttl_seconds: take_parsed(&mut layered, "WEBHOOK_CHANNEL_TTL_SECONDS")?
                .unwrap_or_else(default_webhook_channel_ttl_seconds),
            renewal_threshold_seconds: take_parsed(
                &mut layered,
                "WEBHOOK_RENEWAL_THRESHOLD_SECONDS",
            )?
            .unwrap_or_else(default_webhook_renewal_threshold_seconds),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: take_string(&mut layered, "API_BIND_ADDR")
                .unwrap_or_else(default_api_bind_addr),
            log_level: take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take_string(&mut layered, "LOG_FORMAT")
                .unwrap_or_else(default_log_format),
            database_url: take_string(&mut layered, "DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms),
            trigger_secret: take_string(&mut layered, "TRIGGER_SECRET"),
            crypto_key,
            http_timeout_seconds: take_parsed(&mut layered, "HTTP_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_http_timeout_seconds),
            google,
            invoicing,
            dispatch,
            token_refresh,
            webhook,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![7u8; 32]),
            trigger_secret: Some("secret".to_string()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate_with_key_and_secret() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_crypto_key_rejected() {
        let config = AppConfig {
            crypto_key: None,
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingCryptoKey)));
    }

    #[test]
    fn test_trigger_secret_required_outside_local_profiles() {
        let local = AppConfig {
            trigger_secret: None,
            ..valid_config()
        };
        assert!(local.validate().is_ok());

        let production = AppConfig {
            profile: "production".to_string(),
            trigger_secret: Some("   ".to_string()),
            ..valid_config()
        };
        assert!(matches!(
            production.validate(),
            Err(ConfigError::MissingTriggerSecret)
        ));
    }

    #[test]
    fn test_webhook_ttl_must_exceed_threshold() {
        let mut config = valid_config();
        config.webhook.channel_ttl_seconds = 3600;
        config.webhook.renewal_threshold_seconds = 3600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWebhookTtl { .. })
        ));
    }

    #[test]
    fn test_clamp_limit() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.clamp_limit(None), 10);
        assert_eq!(dispatch.clamp_limit(Some(0)), 10);
        assert_eq!(dispatch.clamp_limit(Some(3)), 3);
        assert_eq!(dispatch.clamp_limit(Some(10_000)), 50);
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.google.client_secret = Some("google-secret".to_string());
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("google-secret"));
        assert!(!json.contains("\"secret\""));
        assert!(json.contains(REDACTED));
    }
}
