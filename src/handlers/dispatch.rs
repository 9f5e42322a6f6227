//! # Dispatch Trigger
//!
//! `POST /jobs/dispatch` runs one bounded batch. It is meant to be hit by an
//! external scheduler; several concurrent calls are safe because every job is
//! claimed before it runs.

use axum::{body::Bytes, extract::State, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::TriggerAuth;
use crate::dispatcher::BatchReport;
use crate::error::{ApiError, validation_error};
use crate::server::AppState;

/// Optional request body for the trigger
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DispatchRequest {
    /// Jobs to claim in this batch; clamped to the configured maximum
    #[schema(example = 10)]
    pub limit: Option<u64>,
}

/// An absent or empty body means "use the default batch size".
fn parse_body(body: &[u8]) -> Result<DispatchRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DispatchRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| validation_error(format!("Invalid JSON: {e}")))
}

#[utoipa::path(
    post,
    path = "/jobs/dispatch",
    security(("trigger_secret" = [])),
    request_body(content = DispatchRequest, description = "Optional batch size", content_type = "application/json"),
    responses(
        (status = 200, description = "Batch processed", body = BatchReport, example = json!({
            "processed": 1,
            "results": [
                {
                    "id": "550e8400-e29b-41d4-a716-446655440000",
                    "status": "succeeded",
                    "result": { "eventId": "E1", "externalEventId": "abc123" }
                }
            ]
        })),
        (status = 400, description = "Malformed body", body = ApiError),
        (status = 401, description = "Missing or invalid trigger secret", body = ApiError),
        (status = 503, description = "Job store unavailable", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn dispatch_jobs(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    body: Bytes,
) -> Result<Json<BatchReport>, ApiError> {
    let request = parse_body(&body)?;
    let report = state.dispatcher.run_batch(request.limit).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_uses_default() {
        assert!(parse_body(b"").unwrap().limit.is_none());
        assert!(parse_body(b"  \n").unwrap().limit.is_none());
    }

    #[test]
    fn test_limit_parsed() {
        assert_eq!(parse_body(br#"{"limit": 5}"#).unwrap().limit, Some(5));
        assert!(parse_body(b"{}").unwrap().limit.is_none());
    }

    #[test]
    fn test_malformed_body_rejected() {
        let err = parse_body(b"{limit").unwrap_err();
        assert_eq!(err.code, Box::from("VALIDATION_FAILED"));
        assert!(parse_body(br#"{"limit": -1}"#).is_err());
    }
}
