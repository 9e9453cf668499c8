//! # Server Configuration
//!
//! Router assembly and startup for the sitesync HTTP surface: the signed
//! remote agent endpoints and the operator job endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, extract::DefaultBodyLimit, middleware, routing::get};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::handlers;
use crate::orchestrator::{JobOrchestrator, SyncStepRunner};
use crate::replication::SiteDatabase;
use crate::repositories::{ArtifactRepository, JobRepository};
use crate::signing::{TOKEN_HEADER, agent_auth_middleware};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    /// Replication accessor over the same connection
    pub site: SiteDatabase,
}

impl AppState {
    pub fn new(config: AppConfig, db: DatabaseConnection) -> Result<Self, SyncError> {
        let site = SiteDatabase::new(db.clone())?;
        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            site,
        })
    }

    pub fn artifacts(&self) -> ArtifactRepository {
        ArtifactRepository::new(Arc::clone(&self.db), self.config.artifact_ttl())
    }

    pub fn job_repository(&self) -> JobRepository {
        JobRepository::new(Arc::clone(&self.db))
    }

    /// Orchestrator wired to the real pull/push steps.
    pub fn orchestrator(&self) -> Result<JobOrchestrator<SyncStepRunner>, SyncError> {
        let runner = SyncStepRunner::new(Arc::clone(&self.config), self.site.clone())?;
        Ok(JobOrchestrator::new(self.job_repository(), runner))
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let agent_routes = handlers::agent::router().route_layer(middleware::from_fn_with_state(
        Arc::clone(&config),
        agent_auth_middleware,
    ));
    let operator_routes = handlers::jobs::router().route_layer(middleware::from_fn_with_state(
        Arc::clone(&config),
        auth_middleware,
    ));

    Router::new()
        .route("/", get(handlers::root))
        .merge(agent_routes)
        .merge(operator_routes)
        .layer(DefaultBodyLimit::max(config.max_body_bytes()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;
    let profile = config.profile.clone();
    let agent_enabled = config.agent.enabled;

    let state = AppState::new(config, db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, agent_enabled, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "agent_signature",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    TOKEN_HEADER,
                    "Shared agent token; requests also carry an HMAC-SHA256 x-signature header",
                ))),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::agent::status,
        crate::handlers::agent::export_database,
        crate::handlers::agent::download_database,
        crate::handlers::agent::import_database,
        crate::handlers::agent::export_media,
        crate::handlers::agent::download_media,
        crate::handlers::agent::import_media,
        crate::handlers::agent::maintenance,
        crate::handlers::agent::swap_tables,
        crate::handlers::agent::cleanup,
        crate::handlers::jobs::create_job,
        crate::handlers::jobs::current_job,
        crate::handlers::jobs::tick_job,
        crate::handlers::jobs::stop_job,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::JobStatus,
            crate::models::SetType,
            crate::models::Step,
            crate::error::ApiError,
            crate::remote::OperationResponse,
            crate::remote::StatusResponse,
            crate::remote::ExportRequest,
            crate::remote::ExportResponse,
            crate::remote::ImportRequest,
            crate::remote::MediaExportRequest,
            crate::remote::MediaExportResponse,
            crate::remote::MaintenanceRequest,
            crate::remote::SwapRequest,
            crate::handlers::jobs::CreateJobRequest,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::TickResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "sitesync API",
        description = "Remote agent protocol and operator job control for two-site synchronization",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
