//! # Agency Sync Main Entry Point

use agency_sync::{
    config::ConfigLoader, db::init_pool, dispatcher::Dispatcher, server::run_server, telemetry,
};
use migration::{Migrator, MigratorTrait};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables; loading validates it
    let config = ConfigLoader::new().load()?;

    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    Migrator::up(&db, None).await?;

    let dispatcher = Dispatcher::from_config(&config, db.clone())?;

    run_server(config, db, dispatcher).await
}
