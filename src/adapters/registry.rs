//! Adapter registry
//!
//! Maps each provider to the adapter that serves it.

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::info;

use super::error::SyncError;
use super::{CalendarAdapter, InvoicingAdapter, ProviderAdapter, SpreadsheetAdapter, http};
use crate::config::AppConfig;
use crate::models::Provider;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with the three production adapters sharing one HTTP client.
    pub fn from_config(config: &AppConfig, db: DatabaseConnection) -> Result<Self, SyncError> {
        let client = http::build_client(config.http_timeout())?;
        let mut registry = Self::new();
        registry.register(Arc::new(CalendarAdapter::new(
            client.clone(),
            config,
            db.clone(),
        )));
        registry.register(Arc::new(InvoicingAdapter::new(
            client.clone(),
            config,
            db.clone(),
        )));
        registry.register(Arc::new(SpreadsheetAdapter::new(client, config, db)));
        info!(providers = registry.adapters.len(), "Provider adapters registered");
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
