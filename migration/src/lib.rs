//! Database migrations for the agency sync engine.
//!
//! Covers the engine's own tables (jobs, credentials, webhook channels,
//! integration connections) and the slice of the business store the engine
//! reads from and writes sync state back onto.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_sync_jobs;
mod m2025_01_10_000002_create_credentials;
mod m2025_01_10_000003_create_webhook_channels;
mod m2025_01_10_000004_create_integration_connections;
mod m2025_01_10_000005_create_business_entities;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_sync_jobs::Migration),
            Box::new(m2025_01_10_000002_create_credentials::Migration),
            Box::new(m2025_01_10_000003_create_webhook_channels::Migration),
            Box::new(m2025_01_10_000004_create_integration_connections::Migration),
            Box::new(m2025_01_10_000005_create_business_entities::Migration),
        ]
    }
}
