//! # Trigger Authentication
//!
//! The dispatch trigger and the operator job endpoints share one secret. It
//! may arrive as an `X-Sync-Secret` header, an `Authorization: Bearer` header
//! or a `secret` query parameter, and is compared in constant time.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};

pub const SECRET_HEADER: &str = "x-sync-secret";
pub const SECRET_QUERY_PARAM: &str = "secret";

/// Marker extracted only when the request carried the trigger secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerAuth;

/// Secret presented by the caller, in header > bearer > query order.
pub fn presented_secret(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }

    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == SECRET_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
    })
}

/// Constant-time comparison against the configured secret. No configured
/// secret rejects everything.
pub fn secret_matches(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) if !expected.is_empty() => {
            bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
        }
        _ => false,
    }
}

impl<S> FromRequestParts<S> for TriggerAuth
where
    Arc<AppConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);
        let presented = presented_secret(&parts.headers, parts.uri.query());

        if secret_matches(config.trigger_secret.as_deref(), presented.as_deref()) {
            return Ok(TriggerAuth);
        }

        if config.trigger_secret.is_none() {
            tracing::warn!("Rejecting trigger request: no trigger secret configured");
        } else {
            tracing::warn!(
                presented = presented.is_some(),
                "Rejecting trigger request with missing or wrong secret"
            );
        }
        Err(unauthorized(Some("Missing or invalid trigger secret")))
    }
}
