//! # Agency Sync Library
//!
//! Job-driven synchronization engine: a durable job store, a batch
//! dispatcher, an OAuth token manager and adapters for the calendar,
//! invoicing and spreadsheet providers, served over an axum HTTP surface.

pub mod adapters;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_manager;
pub use migration;
