//! Test utilities for database testing.
//!
//! In-memory SQLite with all migrations applied, a configuration pointing
//! every provider at one mock server, and fixtures for the business tables
//! and credentials the engine reads.

#![allow(dead_code)]

use agency_sync::config::AppConfig;
use agency_sync::crypto::CryptoKey;
use agency_sync::models::{Provider, artist, client, event, expense};
use agency_sync::repositories::CredentialRepository;
use agency_sync::repositories::credential::OAuthGrant;
use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-trigger-secret";
pub const CALLBACK_URL: &str = "https://sync.example.com/webhooks/google-calendar";

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// A single pooled connection keeps every query on the same in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

pub fn test_key() -> Vec<u8> {
    vec![42u8; 32]
}

/// Configuration with every provider base URL on `mock_uri`.
pub fn test_config(mock_uri: &str) -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        trigger_secret: Some(TEST_SECRET.to_string()),
        crypto_key: Some(test_key()),
        http_timeout_seconds: 5,
        ..AppConfig::default()
    };
    config.google.client_id = Some("client-id".to_string());
    config.google.client_secret = Some("client-secret".to_string());
    config.google.token_url = format!("{mock_uri}/token");
    config.google.calendar_api_base = format!("{mock_uri}/calendar/v3");
    config.google.sheets_api_base = format!("{mock_uri}/sheets/v4");
    config.invoicing.api_base = format!("{mock_uri}/invoicing/api");
    config.webhook.callback_url = Some(CALLBACK_URL.to_string());
    config
}

pub fn credential_repository(db: &DatabaseConnection) -> CredentialRepository {
    let key = CryptoKey::new(test_key()).expect("test key is 32 bytes");
    CredentialRepository::new(db.clone(), key)
}

/// Store an OAuth credential whose access token expires `expires_in` from now.
pub async fn seed_oauth_credential(
    db: &DatabaseConnection,
    agency_id: Uuid,
    provider: Provider,
    access_token: &str,
    expires_in: Duration,
) -> Result<()> {
    credential_repository(db)
        .upsert_oauth(
            agency_id,
            provider,
            OAuthGrant {
                access_token: access_token.to_string(),
                refresh_token: Some("refresh-token".to_string()),
                scope: None,
                token_type: Some("Bearer".to_string()),
                expiry: Some((Utc::now() + expires_in).fixed_offset()),
            },
        )
        .await?;
    Ok(())
}

pub async fn seed_api_key_credential(db: &DatabaseConnection, agency_id: Uuid) -> Result<()> {
    credential_repository(db)
        .upsert_api_key(agency_id, Provider::Invoicing, "key-id", "key-secret")
        .await?;
    Ok(())
}

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid test date")
}

pub async fn insert_client(
    db: &DatabaseConnection,
    agency_id: Uuid,
    id: &str,
    name: &str,
    email: Option<&str>,
) -> Result<client::Model> {
    Ok(client::ActiveModel {
        id: Set(id.to_string()),
        agency_id: Set(agency_id),
        name: Set(name.to_string()),
        business_name: Set(None),
        email: Set(email.map(str::to_string)),
        phone: Set(None),
        tax_id: Set(Some("123456789".to_string())),
    }
    .insert(db)
    .await?)
}

pub async fn insert_artist(
    db: &DatabaseConnection,
    agency_id: Uuid,
    id: &str,
    name: &str,
    calendar_id: Option<&str>,
) -> Result<artist::Model> {
    Ok(artist::ActiveModel {
        id: Set(id.to_string()),
        agency_id: Set(agency_id),
        name: Set(name.to_string()),
        email: Set(Some(format!("{id}@artists.example.com"))),
        phone: Set(None),
        calendar_id: Set(calendar_id.map(str::to_string)),
    }
    .insert(db)
    .await?)
}

/// Insert an event on 2025-03-14 with no calendar or invoice sync state.
pub async fn insert_event(
    db: &DatabaseConnection,
    agency_id: Uuid,
    id: &str,
    client_id: Option<&str>,
    artist_id: Option<&str>,
    amount: Option<f64>,
) -> Result<event::Model> {
    Ok(event::ActiveModel {
        id: Set(id.to_string()),
        agency_id: Set(agency_id),
        client_id: Set(client_id.map(str::to_string)),
        artist_id: Set(artist_id.map(str::to_string)),
        event_date: Set(date("2025-03-14")),
        status: Set("scheduled".to_string()),
        description: Set(Some("Gala dinner".to_string())),
        location: Set(Some("Lisbon".to_string())),
        amount: Set(amount),
        payment_date: Set(None),
        document_type: Set(None),
        google_event_id: Set(None),
        google_event_link: Set(None),
        artist_google_event_id: Set(None),
        calendar_sync_status: Set(None),
        calendar_sync_error: Set(None),
        calendar_synced_at: Set(None),
        invoice_document_id: Set(None),
        invoice_document_number: Set(None),
        invoice_document_url: Set(None),
        invoice_sync_status: Set(None),
        invoice_sync_error: Set(None),
        updated_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?)
}

pub async fn insert_expense(
    db: &DatabaseConnection,
    agency_id: Uuid,
    id: &str,
    amount: Option<f64>,
) -> Result<expense::Model> {
    Ok(expense::ActiveModel {
        id: Set(id.to_string()),
        agency_id: Set(agency_id),
        description: Set(Some(format!("Expense {id}"))),
        supplier_name: Set(Some("Sound & Light Lda".to_string())),
        amount: Set(amount),
        expense_date: Set(date("2025-02-20")),
        invoice_sync_status: Set("not-synced".to_string()),
        invoice_sync_error: Set(None),
        invoice_document_id: Set(None),
        invoice_synced_at: Set(None),
    }
    .insert(db)
    .await?)
}
