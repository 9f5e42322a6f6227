//! # Server Configuration
//!
//! Router assembly and the HTTP listener for the sync engine.

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::handlers;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub dispatcher: Dispatcher,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::create_job),
        )
        .route("/jobs/dispatch", post(handlers::dispatch::dispatch_jobs))
        .route("/jobs/reconcile", post(handlers::jobs::reconcile_channels))
        .route("/jobs/{id}/retry", post(handlers::jobs::retry_job))
        .route(
            "/webhooks/google-calendar",
            post(handlers::webhooks::google_calendar_push),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(telemetry::trace_id_middleware))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    dispatcher: Dispatcher,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {e}"))?;

    let state = AppState {
        config: Arc::new(config),
        db,
        dispatcher,
    };
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "trigger_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Sync-Secret"))),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::dispatch::dispatch_jobs,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::create_job,
        crate::handlers::jobs::retry_job,
        crate::handlers::jobs::reconcile_channels,
        crate::handlers::webhooks::google_calendar_push,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::JobStatus,
            crate::models::Provider,
            crate::error::ApiError,
            crate::adapters::SyncErrorKind,
            crate::dispatcher::BatchReport,
            crate::dispatcher::JobOutcome,
            crate::handlers::HealthResponse,
            crate::handlers::dispatch::DispatchRequest,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::CreateJobRequest,
            crate::handlers::jobs::ReconcileResponse,
            crate::handlers::webhooks::WebhookAck,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Job dispatch and operator endpoints"),
        (name = "webhooks", description = "Inbound provider push notifications")
    ),
    info(
        title = "Agency Sync API",
        description = "Job-driven synchronization with calendar, spreadsheet and invoicing providers",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
