//! # Provider Adapters
//!
//! One adapter per external system. The dispatcher hands each adapter a typed
//! [`JobRequest`] together with a valid access token; the adapter performs the
//! provider calls and writes provider-assigned identifiers back onto the
//! internal entities.

pub mod calendar;
pub mod error;
pub mod http;
pub mod invoicing;
pub mod registry;
pub mod spreadsheet;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::JobRequest;
use crate::models::Provider;

pub use calendar::CalendarAdapter;
pub use error::{SyncError, SyncErrorKind};
pub use invoicing::InvoicingAdapter;
pub use registry::AdapterRegistry;
pub use spreadsheet::SpreadsheetAdapter;

/// Per-job execution context.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub agency_id: Uuid,
    pub access_token: String,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("agency_id", &self.agency_id)
            .field("access_token", &"***")
            .finish()
    }
}

/// Operations every provider adapter exposes to the dispatcher.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Run one job and return its result document.
    ///
    /// Requests addressed to another provider are configuration errors.
    async fn execute(&self, ctx: &JobContext, request: JobRequest) -> Result<JsonValue, SyncError>;
}

pub(crate) fn wrong_provider(adapter: Provider, request: &JobRequest) -> SyncError {
    SyncError::configuration(format!(
        "{adapter} adapter cannot run {}/{}",
        request.provider(),
        request.kind()
    ))
}
