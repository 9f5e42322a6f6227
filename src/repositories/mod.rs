//! # Repository Layer
//!
//! SeaORM access for the engine's tables and the business tables it writes
//! sync state back onto. All business-table access is agency-scoped.

pub mod credential;
pub mod directory;
pub mod event;
pub mod expense;
pub mod integration_connection;
pub mod sync_job;
pub mod webhook_channel;

pub use credential::CredentialRepository;
pub use directory::DirectoryRepository;
pub use event::EventRepository;
pub use expense::ExpenseRepository;
pub use integration_connection::IntegrationConnectionRepository;
pub use sync_job::SyncJobRepository;
pub use webhook_channel::WebhookChannelRepository;
