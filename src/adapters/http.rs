//! Outbound HTTP plumbing shared by the provider adapters.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::error::{SyncError, truncate_message};
use crate::models::Provider;

/// Provider response bodies are clipped to this many characters in error messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Build the client used for provider calls. Every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<Client, SyncError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("agency-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Join `segments` onto `base`, percent-encoding each one.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = Url::parse(base)
        .map_err(|e| SyncError::configuration(format!("invalid API base '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::configuration(format!("API base '{base}' cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-success status onto the error taxonomy.
pub fn classify_status(provider: Provider, status: StatusCode, body: &str) -> SyncError {
    let message = truncate_message(body.trim(), ERROR_BODY_PREVIEW);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Authentication(format!("{provider} returned {status}: {message}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            SyncError::Transient(format!("{provider} rate limited the request: {message}"))
        }
        s if s.is_server_error() => {
            SyncError::Transient(format!("{provider} returned {status}: {message}"))
        }
        s => SyncError::ProviderRejected {
            provider,
            status: s.as_u16(),
            message,
        },
    }
}

/// Pass a successful response through, classify anything else.
pub async fn ensure_success(provider: Provider, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status, &body))
}

/// Check the status and decode a JSON body.
pub async fn read_json<T: DeserializeOwned>(
    provider: Provider,
    response: Response,
) -> Result<T, SyncError> {
    let response = ensure_success(provider, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| SyncError::transient(format!("unexpected {provider} response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::error::SyncErrorKind;

    #[test]
    fn test_status_classification() {
        let p = Provider::Calendar;
        assert_eq!(
            classify_status(p, StatusCode::UNAUTHORIZED, "").kind(),
            SyncErrorKind::Authentication
        );
        assert_eq!(
            classify_status(p, StatusCode::FORBIDDEN, "").kind(),
            SyncErrorKind::Authentication
        );
        assert_eq!(
            classify_status(p, StatusCode::TOO_MANY_REQUESTS, "").kind(),
            SyncErrorKind::Transient
        );
        assert_eq!(
            classify_status(p, StatusCode::BAD_GATEWAY, "").kind(),
            SyncErrorKind::Transient
        );
        let rejected = classify_status(p, StatusCode::NOT_FOUND, "missing");
        assert_eq!(rejected.kind(), SyncErrorKind::Validation);
        assert!(rejected.is_not_found());
    }

    #[test]
    fn test_error_body_is_clipped() {
        let body = "e".repeat(1000);
        match classify_status(Provider::Invoicing, StatusCode::BAD_REQUEST, &body) {
            SyncError::ProviderRejected { message, .. } => {
                assert_eq!(message.chars().count(), ERROR_BODY_PREVIEW)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint(
            "https://www.googleapis.com/calendar/v3",
            &["calendars", "team@group.calendar.google.com", "events"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events"
        );

        let url = endpoint("http://127.0.0.1:9000/", &["calendars", "a/b", "events"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/calendars/a%2Fb/events");
    }
}
