//! # Jobs API Handlers
//!
//! Operator endpoints for creating, advancing and stopping the current
//! synchronization job.

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, SyncError, not_found};
use crate::models::{Job, JobStatus, SetType, Step};
use crate::orchestrator::TickReport;
use crate::server::AppState;

/// Operator routes, to be wrapped in the bearer-token middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/current", get(current_job))
        .route("/jobs/current/tick", post(tick_job))
        .route("/jobs/current/stop", post(stop_job))
}

/// Request body for creating a job
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateJobRequest {
    /// Replication set id from configuration
    #[schema(example = "production-pull")]
    pub set_name: String,
    /// Run exports and downloads only; nothing on either site is changed
    #[serde(default)]
    pub dry_run: bool,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Job identifier
    #[schema(example = "k3v9x0q2m8a1b7c4")]
    pub id: String,
    /// Replication set the job was created from
    pub set_name: String,
    #[serde(rename = "type")]
    pub job_type: SetType,
    pub status: JobStatus,
    /// Completion percentage
    #[schema(example = 44)]
    pub progress: u8,
    /// Step under the cursor; absent once the cursor ran past the last step
    pub current_step: Option<Step>,
    pub step_index: usize,
    pub steps: Vec<Step>,
    pub dry_run: bool,
    /// Last step message
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobInfo {
    fn from(job: Job) -> Self {
        Self {
            current_step: job.current_step(),
            id: job.id,
            set_name: job.set.id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            step_index: job.step_index,
            steps: job.steps,
            dry_run: job.dry_run,
            message: job.message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Response of a tick
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TickResponse {
    pub success: bool,
    /// Message produced by this tick
    pub message: String,
    /// Step that ran, if any
    pub executed: Option<Step>,
    pub job: JobInfo,
}

impl From<TickReport> for TickResponse {
    fn from(report: TickReport) -> Self {
        Self {
            success: report.job.status != JobStatus::Error,
            message: report.message,
            executed: report.executed,
            job: report.job.into(),
        }
    }
}

/// Create a job for a replication set, replacing the current one
#[utoipa::path(
    post,
    path = "/jobs",
    security(("bearer_auth" = [])),
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created", body = JobInfo),
        (status = 400, description = "Unknown set or missing remote settings", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let Json(request) = payload?;
    let set = state
        .config
        .find_set(&request.set_name)
        .map_err(SyncError::from)?
        .clone();
    state.config.remote.require().map_err(SyncError::from)?;

    let job = state
        .orchestrator()?
        .create_job(&set, request.dry_run)
        .await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// Current job state
#[utoipa::path(
    get,
    path = "/jobs/current",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current job", body = JobInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No job has been created", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn current_job(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state
        .job_repository()
        .load()
        .await
        .map_err(SyncError::from)?
        .ok_or_else(|| not_found("No job has been created"))?;
    Ok(Json(job.value.into()))
}

/// Run the step under the cursor
#[utoipa::path(
    post,
    path = "/jobs/current/tick",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tick finished", body = TickResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 409, description = "No job, or the job changed concurrently", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn tick_job(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<TickResponse>, ApiError> {
    let report = state.orchestrator()?.tick().await?;
    Ok(Json(report.into()))
}

/// Stop the current job and lift maintenance mode on the affected side
#[utoipa::path(
    post,
    path = "/jobs/current/stop",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Job stopped (or already terminal)", body = JobInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 409, description = "No job has been created", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn stop_job(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state.orchestrator()?.stop_and_compensate().await?;
    Ok(Json(job.into()))
}
