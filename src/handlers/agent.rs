//! # Remote Agent Handlers
//!
//! The endpoints a peer calls to export, stage, import and swap this site.
//! Every route sits behind [`crate::signing::agent_auth_middleware`].

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tracing::{info, warn};

use crate::error::{ApiError, SyncError, not_found, validation_error};
use crate::media;
use crate::models::{ServiceInfo, random_token};
use crate::remote::{
    DownloadQuery, ExportRequest, ExportResponse, ImportRequest, MaintenanceRequest,
    MediaExportRequest, MediaExportResponse, MediaImportQuery, MediaPartQuery, OperationResponse,
    StatusResponse, SwapRequest,
};
use crate::replication::{self, ExportOptions, ImportOptions, Substitutions, import::decode_payload};
use crate::repositories::Artifact;
use crate::server::AppState;
use crate::swap::{self, upload_dirs};

/// Agent routes, to be wrapped in the signature middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/replication/export", post(export_database))
        .route("/replication/download", get(download_database))
        .route("/replication/import", post(import_database))
        .route("/media/export", post(export_media))
        .route("/media/download", get(download_media))
        .route("/media/import", post(import_media))
        .route("/maintenance", post(maintenance))
        .route("/replication/swap", post(swap_tables))
        .route("/replication/cleanup", post(cleanup))
}

/// Agent liveness and maintenance state
#[utoipa::path(
    get,
    path = "/status",
    security(("agent_signature" = [])),
    responses(
        (status = 200, description = "Agent status", body = StatusResponse),
        (status = 403, description = "Rejected credentials", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let info = ServiceInfo::default();
    Json(StatusResponse {
        success: true,
        service: info.service,
        version: info.version,
        maintenance: swap::maintenance_enabled(&state.config.maintenance_file).await,
    })
}

/// Dump the requested tables and stage the dump for download
#[utoipa::path(
    post,
    path = "/replication/export",
    security(("agent_signature" = [])),
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Dump staged", body = ExportResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "Export failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn export_database(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Json<ExportResponse>, ApiError> {
    let Json(request) = payload?;
    purge_expired(&state).await;

    let options = ExportOptions {
        tables: request.tables,
        substitutions: Substitutions::new(&request.search, &request.replace),
        search_only_tables: request.search_only_tables,
        exclude_option_prefix: request
            .exclude_option_prefix
            .filter(|prefix| !prefix.is_empty()),
        skip_prefixes: request.skip_prefixes,
    };
    let script = replication::export(&state.site, &options)
        .await
        .map_err(SyncError::from)?;

    tokio::fs::create_dir_all(&state.config.staging_dir)
        .await
        .map_err(SyncError::from)?;
    let path = state
        .config
        .staging_dir
        .join(format!("export_{}.sql", random_token(16)));
    tokio::fs::write(&path, script.as_bytes())
        .await
        .map_err(SyncError::from)?;

    let size = script.len() as u64;
    let token = state
        .artifacts()
        .stage(&Artifact::Sql { path, size })
        .await
        .map_err(SyncError::from)?;

    info!(set_name = %request.set_name, size, "Staged database export");
    Ok(Json(ExportResponse {
        success: true,
        download_token: token,
        size,
    }))
}

/// Stream a staged dump once; the token is consumed
#[utoipa::path(
    get,
    path = "/replication/download",
    security(("agent_signature" = [])),
    params(DownloadQuery),
    responses(
        (status = 200, description = "Raw SQL script", content_type = "application/sql"),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 404, description = "Unknown or expired token", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn download_database(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let artifacts = state.artifacts();
    let path = match artifacts.get(&query.token).await.map_err(SyncError::from)? {
        Some(Artifact::Sql { path, .. }) => path,
        _ => return Err(not_found("Unknown or expired download token")),
    };

    let body = tokio::fs::read(&path).await.map_err(SyncError::from)?;
    artifacts
        .consume(&query.token)
        .await
        .map_err(SyncError::from)?;

    info!(size = body.len(), "Served database export");
    Ok(([(header::CONTENT_TYPE, "application/sql")], body).into_response())
}

/// Restore a script, optionally into staged tables
#[utoipa::path(
    post,
    path = "/replication/import",
    security(("agent_signature" = [])),
    request_body = ImportRequest,
    responses(
        (status = 200, description = "Import finished", body = OperationResponse),
        (status = 400, description = "Invalid payload", body = ApiError),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "A statement failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn import_database(
    State(state): State<AppState>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload?;
    let script =
        decode_payload(&request.sql, request.encoding.as_deref()).map_err(SyncError::from)?;

    let options = ImportOptions {
        tables: request.tables,
        temp_prefix: request.temp_prefix,
        skip_rename: request.skip_rename,
    };
    let outcome = replication::import(&state.site, &script, &options)
        .await
        .map_err(SyncError::from)?;

    info!(
        set_name = %request.set_name,
        statements = outcome.statements,
        staged = outcome.staged_tables.len(),
        renamed = outcome.renamed_tables.len(),
        "Imported database script"
    );
    Ok(Json(OperationResponse::ok(format!(
        "Imported {} statements",
        outcome.statements
    ))))
}

/// Archive the upload directory into size-bounded parts
#[utoipa::path(
    post,
    path = "/media/export",
    security(("agent_signature" = [])),
    request_body = MediaExportRequest,
    responses(
        (status = 200, description = "Archives staged", body = MediaExportResponse),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "Archiving failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn export_media(
    State(state): State<AppState>,
    payload: Result<Json<MediaExportRequest>, JsonRejection>,
) -> Result<Json<MediaExportResponse>, ApiError> {
    let Json(request) = payload?;
    if request.max_mb == 0 {
        return Err(validation_error("max_mb must be positive"));
    }
    purge_expired(&state).await;

    let batch = media::create_archives(
        &state.config.uploads_dir,
        &state.config.staging_dir,
        request.max_mb,
    )
    .await
    .map_err(SyncError::from)?;
    let parts = batch.parts();
    state
        .artifacts()
        .stage_with_token(
            &batch.token,
            &Artifact::Media {
                archives: batch.archives,
            },
        )
        .await
        .map_err(SyncError::from)?;

    info!(token = %batch.token, parts, "Staged media export");
    Ok(Json(MediaExportResponse {
        success: true,
        token: batch.token,
        parts,
    }))
}

/// Serve one archive part; each part can be fetched once
#[utoipa::path(
    get,
    path = "/media/download",
    security(("agent_signature" = [])),
    params(MediaPartQuery),
    responses(
        (status = 200, description = "Raw zip bytes", content_type = "application/zip"),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 404, description = "Unknown token or part", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn download_media(
    State(state): State<AppState>,
    Query(query): Query<MediaPartQuery>,
) -> Result<Response, ApiError> {
    let artifacts = state.artifacts();
    let archives = match artifacts.get(&query.token).await.map_err(SyncError::from)? {
        Some(Artifact::Media { archives }) => archives,
        _ => return Err(not_found("Unknown or expired media token")),
    };

    let index = usize::try_from(query.part)
        .ok()
        .and_then(|part| part.checked_sub(1))
        .filter(|index| *index < archives.len())
        .ok_or_else(|| not_found("Unknown media part"))?;
    let path = &archives[index];

    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found("Media part was already downloaded"));
        }
        Err(err) => return Err(SyncError::from(err).into()),
    };
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %err, "Failed to remove served archive part");
    }
    if index + 1 == archives.len() {
        artifacts
            .forget(&query.token)
            .await
            .map_err(SyncError::from)?;
    }

    info!(part = query.part, parts = archives.len(), size = body.len(), "Served media part");
    Ok(([(header::CONTENT_TYPE, "application/zip")], body).into_response())
}

/// Receive one archive part and extract it into the staged upload directory
#[utoipa::path(
    post,
    path = "/media/import",
    security(("agent_signature" = [])),
    params(MediaImportQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Part extracted", body = OperationResponse),
        (status = 400, description = "Empty body", body = ApiError),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "Extraction failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn import_media(
    State(state): State<AppState>,
    Query(query): Query<MediaImportQuery>,
    body: Bytes,
) -> Result<Json<OperationResponse>, ApiError> {
    if body.is_empty() {
        return Err(validation_error("Archive body must not be empty"));
    }

    tokio::fs::create_dir_all(&state.config.staging_dir)
        .await
        .map_err(SyncError::from)?;
    let incoming = state
        .config
        .staging_dir
        .join(format!("incoming_{}.zip", random_token(16)));
    tokio::fs::write(&incoming, &body)
        .await
        .map_err(SyncError::from)?;

    let dirs = upload_dirs(&state.config.uploads_dir, query.suffix.as_deref());
    let extracted = media::extract_archive(&incoming, &dirs.tmp).await;
    if let Err(err) = tokio::fs::remove_file(&incoming).await {
        warn!(path = %incoming.display(), error = %err, "Failed to remove received archive");
    }
    let files = extracted.map_err(SyncError::from)?;

    info!(
        token = query.token.as_deref().unwrap_or(""),
        part = query.part.unwrap_or(0),
        files,
        "Extracted media part"
    );
    Ok(Json(OperationResponse::ok(format!("Extracted {files} files"))))
}

/// Switch maintenance mode on or off
#[utoipa::path(
    post,
    path = "/maintenance",
    security(("agent_signature" = [])),
    request_body = MaintenanceRequest,
    responses(
        (status = 200, description = "Maintenance mode updated", body = OperationResponse),
        (status = 403, description = "Rejected credentials", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn maintenance(
    State(state): State<AppState>,
    payload: Result<Json<MaintenanceRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload?;
    swap::set_maintenance(&state.config.maintenance_file, request.enabled)
        .await
        .map_err(SyncError::from)?;

    let message = if request.enabled {
        "Maintenance mode enabled"
    } else {
        "Maintenance mode disabled"
    };
    Ok(Json(OperationResponse::ok(message)))
}

/// Move staged tables (and optionally uploads) into place
#[utoipa::path(
    post,
    path = "/replication/swap",
    security(("agent_signature" = [])),
    request_body = SwapRequest,
    responses(
        (status = 200, description = "Swap finished", body = OperationResponse),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "Swap failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn swap_tables(
    State(state): State<AppState>,
    payload: Result<Json<SwapRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload?;
    validate_prefixes(&request)?;

    let swapped = swap::swap_tables(
        &state.site,
        &request.tables,
        &request.temp_prefix,
        &request.backup_prefix,
    )
    .await
    .map_err(SyncError::from)?;

    if request.swap_uploads {
        let dirs = upload_dirs(&state.config.uploads_dir, request.suffix.as_deref());
        swap::swap_uploads(&dirs.tmp, &dirs.bak, &state.config.uploads_dir)
            .await
            .map_err(SyncError::from)?;
    }

    Ok(Json(OperationResponse::ok(format!(
        "Swapped {} tables",
        swapped.len()
    ))))
}

/// Drop leftover staged and backup resources
#[utoipa::path(
    post,
    path = "/replication/cleanup",
    security(("agent_signature" = [])),
    request_body = SwapRequest,
    responses(
        (status = 200, description = "Cleanup finished", body = OperationResponse),
        (status = 403, description = "Rejected credentials", body = ApiError),
        (status = 500, description = "Cleanup failed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn cleanup(
    State(state): State<AppState>,
    payload: Result<Json<SwapRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, ApiError> {
    let Json(request) = payload?;
    validate_prefixes(&request)?;

    let dropped = swap::cleanup_tables(
        &state.site,
        &request.tables,
        &request.temp_prefix,
        &request.backup_prefix,
    )
    .await
    .map_err(SyncError::from)?;

    if request.swap_uploads {
        let dirs = upload_dirs(&state.config.uploads_dir, request.suffix.as_deref());
        swap::cleanup_uploads(&dirs.tmp, &dirs.bak)
            .await
            .map_err(SyncError::from)?;
    }

    Ok(Json(OperationResponse::ok(format!(
        "Issued {dropped} drop statements"
    ))))
}

fn validate_prefixes(request: &SwapRequest) -> Result<(), ApiError> {
    if request.temp_prefix.is_empty() || request.backup_prefix.is_empty() {
        return Err(validation_error("temp_prefix and backup_prefix are required"));
    }
    if request.temp_prefix == request.backup_prefix {
        return Err(validation_error("temp_prefix and backup_prefix must differ"));
    }
    Ok(())
}

async fn purge_expired(state: &AppState) {
    match state.artifacts().purge_expired().await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "Purged expired artifacts"),
        Err(err) => warn!(error = %err, "Failed to purge expired artifacts"),
    }
}
