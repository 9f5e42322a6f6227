//! # API Errors
//!
//! Every non-2xx response from the trigger, operator and webhook endpoints is
//! an `application/problem+json` body carrying a stable `code` and the trace
//! id of the request that produced it.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use utoipa::ToSchema;

use crate::adapters::error::{SyncError, SyncErrorKind};
use crate::telemetry;

const PROBLEM_JSON: &str = "application/problem+json";

pub const CODE_VALIDATION: &str = "VALIDATION_FAILED";
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_CONFLICT: &str = "CONFLICT";
pub const CODE_INVALID_JOB: &str = "INVALID_JOB";
pub const CODE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
pub const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";

/// Problem body returned by every endpoint on failure.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip_serializing)]
    pub status: StatusCode,
    /// Stable machine-readable code, e.g. `VALIDATION_FAILED`
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Box<JsonValue>>,
    /// Same value as the `x-trace-id` response header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: telemetry::current_trace_id().map(String::into_boxed_str),
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(Box::new(details));
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, axum::Json(self)).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match &rejection {
            JsonRejection::MissingJsonContentType(_) => {
                "request body must be sent as application/json".to_string()
            }
            JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_) => {
                format!("invalid request body: {}", rejection.body_text())
            }
            _ => "invalid request body".to_string(),
        };
        validation_error(message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        validation_error(format!("invalid query string: {}", rejection.body_text()))
    }
}

/// Store failures never leak driver detail to callers.
impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::RecordNotFound(record) => not_found(format!("{record} not found")),
            DbErr::Conn(err) => {
                tracing::error!(error = %err, "Job store connection failed");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    CODE_UNAVAILABLE,
                    "job store unavailable",
                )
            }
            other => {
                tracing::error!(error = %other, "Job store query failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    CODE_INTERNAL,
                    "job store error",
                )
            }
        }
    }
}

/// Job requests rejected before they reach the store.
impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        let kind = error.kind();
        match (error, kind) {
            (SyncError::Storage(db), _) => db.into(),
            (other, SyncErrorKind::Configuration | SyncErrorKind::Validation) => {
                ApiError::new(StatusCode::BAD_REQUEST, CODE_INVALID_JOB, other.to_string())
                    .with_details(json!({ "errorKind": kind }))
            }
            (other, _) => {
                ApiError::new(StatusCode::BAD_GATEWAY, CODE_INVALID_JOB, other.to_string())
                    .with_details(json!({ "errorKind": kind }))
            }
        }
    }
}

pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        CODE_UNAUTHORIZED,
        message.unwrap_or("authentication required"),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, CODE_NOT_FOUND, message)
}

pub fn conflict(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, CODE_CONFLICT, message)
}

pub fn validation_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, CODE_VALIDATION, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TraceContext, with_trace_context};

    #[test]
    fn test_problem_json_content_type() {
        let response = validation_error("bad limit").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), PROBLEM_JSON);
    }

    #[test]
    fn test_unknown_job_kind_is_bad_request() {
        let api_error: ApiError = SyncError::configuration("unsupported job kind").into();
        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
        assert_eq!(api_error.code, Box::from(CODE_INVALID_JOB));
        assert_eq!(
            api_error.details.as_deref(),
            Some(&json!({ "errorKind": "configuration" }))
        );
    }

    #[test]
    fn test_store_errors_hide_detail() {
        let api_error: ApiError = DbErr::Custom("password=hunter2".into()).into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_error.message.contains("hunter2"));

        let api_error: ApiError = DbErr::RecordNotFound("job".into()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trace_id_comes_from_request_scope() {
        let api_error = with_trace_context(
            TraceContext {
                trace_id: "req-42".into(),
            },
            async { unauthorized(None) },
        )
        .await;
        assert_eq!(api_error.trace_id.as_deref(), Some("req-42"));

        let serialized = serde_json::to_value(&api_error).unwrap();
        assert_eq!(serialized["traceId"], "req-42");
        assert!(serialized.get("status").is_none());
    }
}
