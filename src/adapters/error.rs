//! Error taxonomy shared by the token manager, adapters and dispatcher.

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::Provider;

/// Failure raised while executing a job.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or revoked credentials, unsupported job, missing settings.
    /// Non-retryable until an operator intervenes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the access token.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Malformed or out-of-range input on the entity being synced.
    #[error("validation error: {0}")]
    Validation(String),

    /// The provider refused a well-formed request (4xx other than auth).
    #[error("{provider} rejected request with status {status}: {message}")]
    ProviderRejected {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Network failure, timeout, rate limit or 5xx.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The incremental sync cursor is no longer accepted by the provider.
    #[error("sync token is no longer valid")]
    StaleCursor,

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),
}

/// Error classification persisted on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Configuration,
    Authentication,
    Validation,
    Transient,
    StaleCursor,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Configuration => "configuration",
            SyncErrorKind::Authentication => "authentication",
            SyncErrorKind::Validation => "validation",
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::StaleCursor => "stale_cursor",
        }
    }

    /// Whether a fresh job with the same input may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncErrorKind::Transient | SyncErrorKind::StaleCursor)
    }
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Configuration(_) => SyncErrorKind::Configuration,
            SyncError::Authentication(_) => SyncErrorKind::Authentication,
            SyncError::Validation(_) | SyncError::ProviderRejected { .. } => {
                SyncErrorKind::Validation
            }
            SyncError::Transient(_) | SyncError::Storage(_) => SyncErrorKind::Transient,
            SyncError::StaleCursor => SyncErrorKind::StaleCursor,
        }
    }

    /// The provider no longer knows the addressed resource.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::ProviderRejected {
                status: 404 | 410,
                ..
            }
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::Transient(message.into())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Transient(format!("provider call timed out: {err}"))
        } else if err.is_decode() {
            SyncError::Transient(format!("unreadable provider response: {err}"))
        } else {
            SyncError::Transient(format!("provider call failed: {err}"))
        }
    }
}

/// Cut `message` to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_projection() {
        assert_eq!(
            SyncError::configuration("missing").kind(),
            SyncErrorKind::Configuration
        );
        assert_eq!(
            SyncError::ProviderRejected {
                provider: Provider::Invoicing,
                status: 422,
                message: "bad".into()
            }
            .kind(),
            SyncErrorKind::Validation
        );
        assert_eq!(
            SyncError::Storage(DbErr::Custom("x".into())).kind(),
            SyncErrorKind::Transient
        );
        assert!(SyncErrorKind::Transient.is_retryable());
        assert!(!SyncErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SyncErrorKind::StaleCursor).unwrap(),
            serde_json::json!("stale_cursor")
        );
    }

    #[test]
    fn test_not_found_detection() {
        let gone = SyncError::ProviderRejected {
            provider: Provider::Calendar,
            status: 410,
            message: "deleted".into(),
        };
        assert!(gone.is_not_found());
        assert!(!SyncError::transient("503").is_not_found());
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        let long = "x".repeat(600);
        let cut = truncate_message(&long, 500);
        assert_eq!(cut.chars().count(), 500);
        assert!(cut.ends_with("..."));
        // multi-byte characters are never split
        let hebrew = "ש".repeat(20);
        assert_eq!(truncate_message(&hebrew, 10).chars().count(), 10);
    }
}
