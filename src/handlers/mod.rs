//! # API Handlers
//!
//! HTTP endpoint handlers: the unauthenticated root, the signed remote agent
//! surface and the operator job endpoints.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod agent;
pub mod jobs;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
