//! # Data Models
//!
//! SeaORM entities for the sync engine's tables and the business tables it
//! writes back to, plus the small enums shared across layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod artist;
pub mod client;
pub mod credential;
pub mod event;
pub mod expense;
pub mod integration_connection;
pub mod sync_job;
pub mod webhook_channel;

pub use artist::Entity as Artist;
pub use client::Entity as Client;
pub use credential::Entity as Credential;
pub use event::Entity as Event;
pub use expense::Entity as Expense;
pub use integration_connection::Entity as IntegrationConnection;
pub use sync_job::Entity as SyncJob;
pub use webhook_channel::Entity as WebhookChannel;

/// External system a job or credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Calendar,
    Invoicing,
    Spreadsheet,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Calendar, Provider::Invoicing, Provider::Spreadsheet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Calendar => "calendar",
            Provider::Invoicing => "invoicing",
            Provider::Spreadsheet => "spreadsheet",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(Provider::Calendar),
            "invoicing" => Ok(Provider::Invoicing),
            "spreadsheet" => Ok(Provider::Spreadsheet),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Lifecycle of a sync job. Transitions only move forward:
/// pending -> running -> succeeded | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "agency-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_str() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("gmail".parse::<Provider>().is_err());
    }
}
