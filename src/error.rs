//! # Error Handling
//!
//! [`SyncError`] is the failure taxonomy every job step and agent operation
//! reports through; [`ApiError`] is its problem+json HTTP representation with
//! trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::media::ArchiveError;
use crate::remote::TransportError;
use crate::replication::ReplicationError;
use crate::repositories::StoreError;
use crate::signing::AuthError;
use crate::swap::SwapError;
use crate::telemetry;

/// Failure taxonomy shared by the orchestrator and the agent endpoints.
///
/// `Display` yields the message recorded on the job, so variants carry the
/// underlying text verbatim.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Database(String),
    #[error("{0}")]
    Archive(#[from] ArchiveError),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    State(String),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Transport(_) => "transport",
            SyncError::Database(_) => "database",
            SyncError::Archive(_) => "archive",
            SyncError::Configuration(_) => "configuration",
            SyncError::Io(_) => "io",
            SyncError::State(_) => "state",
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(error: ConfigError) -> Self {
        SyncError::Configuration(error.to_string())
    }
}

impl From<ReplicationError> for SyncError {
    fn from(error: ReplicationError) -> Self {
        match error {
            ReplicationError::Io { .. } => SyncError::Io(error.to_string()),
            ReplicationError::InvalidPayload(_) => SyncError::Configuration(error.to_string()),
            _ => SyncError::Database(error.to_string()),
        }
    }
}

impl From<SwapError> for SyncError {
    fn from(error: SwapError) -> Self {
        match error {
            SwapError::Database(_) => SyncError::Database(error.to_string()),
            _ => SyncError::Io(error.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(_) => SyncError::Database(error.to_string()),
            _ => SyncError::State(error.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(error: sea_orm::DbErr) -> Self {
        SyncError::Database(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::Io(error.to_string())
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Always false; mirrors the `success` flag of successful responses
    pub success: bool,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            success: false,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract current trace ID from the active request (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        match &error {
            SyncError::Auth(_) => forbidden(),
            SyncError::Configuration(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "configuration_error", message)
            }
            SyncError::Transport(inner) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "transport_error", &inner.to_string())
            }
            SyncError::Database(message) => {
                tracing::error!(error = %message, "Database operation failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database_error", message)
            }
            SyncError::Archive(inner) => {
                tracing::error!(error = %inner, "Archive operation failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "archive_error",
                    &inner.to_string(),
                )
            }
            SyncError::Io(message) => {
                tracing::error!(error = %message, "Filesystem operation failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "io_error", message)
            }
            SyncError::State(message) => ApiError::new(StatusCode::CONFLICT, "job_conflict", message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        // Log the full error for debugging
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "validation_failed", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Database service unavailable",
                )
            }
            other => SyncError::from(other).into(),
        }
    }
}

/// Generic authentication/authorization failure (403 `rest_forbidden`).
///
/// Every rejected agent call gets the same body so callers cannot tell which
/// check failed.
pub fn forbidden() -> ApiError {
    ApiError::new(
        StatusCode::FORBIDDEN,
        "rest_forbidden",
        "Sorry, you are not allowed to do that.",
    )
}

/// Create an unauthorized error (401) for the operator surface
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
}

/// Unknown or expired artifact token / missing job.
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Create a validation error (400)
pub fn validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_failed", message)
}
