use crate::archive_store::ArchiveError;
use crate::capture_service::{CaptureError, CaptureService};
use crate::config::ApiConfig;
use crate::export_assembler::{ExportError, ExportFormat, ExportRequest, FrameRate};
use crate::frame_fetcher::FetchError;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CaptureService>,
    pub default_frame_rate: i64,
}

/// Query parameters for a capture
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Camera address (host or host:port)
    pub ip_address: Option<String>,
    /// Window start (ISO 8601)
    pub start_time: Option<String>,
    /// Window end (ISO 8601)
    pub end_time: Option<String>,
}

/// Capture response
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub status: &'static str,
    /// Base64 JPEG of the captured frame
    pub image: String,
    pub saved: bool,
    pub filename: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Archive listing response
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub status: &'static str,
    pub images: Vec<String>,
}

/// Archive sweep response
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub removed: usize,
    pub failed: Vec<String>,
}

/// Query parameters for GIF and video exports
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Kept as text so a malformed value falls back to the default rate
    pub frame_rate: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn failure(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            status: "failure",
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

fn archive_failure(e: &ArchiveError) -> ApiError {
    match e {
        ArchiveError::NotFound(name) => {
            failure(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Image not found: {}", name))
        }
        ArchiveError::FileSystem { .. } | ArchiveError::Encode(_) => {
            error!(error = %e, "Archive operation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "ARCHIVE_ERROR", e.to_string())
        }
    }
}

fn capture_failure(e: &CaptureError) -> ApiError {
    match e {
        CaptureError::Fetch(FetchError::Network { .. }) => {
            failure(StatusCode::BAD_GATEWAY, "NETWORK_ERROR", "Image not available")
        }
        CaptureError::Fetch(FetchError::Decode { .. }) => {
            failure(StatusCode::BAD_GATEWAY, "DECODE_ERROR", "Image not available")
        }
        CaptureError::InvalidTime(inner) => {
            failure(StatusCode::BAD_REQUEST, "INVALID_TIME", inner.to_string())
        }
        CaptureError::Archive(inner) => archive_failure(inner),
    }
}

fn export_failure(e: &ExportError) -> ApiError {
    match e {
        ExportError::EmptyArchive => {
            failure(StatusCode::CONFLICT, "EMPTY_ARCHIVE", "No saved images to export")
        }
        ExportError::DimensionMismatch { .. } => {
            failure(StatusCode::UNPROCESSABLE_ENTITY, "DIMENSION_MISMATCH", e.to_string())
        }
        ExportError::Archive(inner) => archive_failure(inner),
        ExportError::Decode { .. } | ExportError::Encode { .. } | ExportError::Io { .. } => {
            failure(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_ERROR", e.to_string())
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/snapshot", get(snapshot))
        .route("/list_images", get(list_images))
        .route("/download_images", get(download_images))
        .route("/download_gif", get(download_gif))
        .route("/download_video", get(download_video))
        .route("/clear_images", get(clear_images))
        .route("/saved_images/:filename", get(serve_image))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snapvault"
    }))
}

/// Capture a frame and archive it when inside the window
#[instrument(skip(state))]
async fn snapshot(
    State(state): State<AppState>,
    Query(params): Query<SnapshotQuery>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let address = params
        .ip_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            failure(
                StatusCode::BAD_REQUEST,
                "MISSING_ADDRESS",
                "ip_address is required",
            )
        })?;

    let outcome = state
        .service
        .capture_with_bounds(
            address,
            params.start_time.as_deref(),
            params.end_time.as_deref(),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Capture failed");
            capture_failure(&e)
        })?;

    Ok(Json(SnapshotResponse {
        status: "success",
        image: STANDARD.encode(&outcome.image_jpeg),
        saved: outcome.saved(),
        filename: outcome.archived.map(|a| a.filename),
        captured_at: outcome.captured_at,
    }))
}

/// List archived frames in capture order
async fn list_images(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
    let images = state
        .service
        .list()
        .await
        .map_err(|e| archive_failure(&e))?;

    Ok(Json(ListResponse {
        status: "success",
        images,
    }))
}

async fn download_images(State(state): State<AppState>) -> Result<Response, ApiError> {
    export(&state, ExportFormat::Zip, None).await
}

async fn download_gif(
    State(state): State<AppState>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    export(&state, ExportFormat::Gif, params.frame_rate.as_deref()).await
}

async fn download_video(
    State(state): State<AppState>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    export(&state, ExportFormat::Video, params.frame_rate.as_deref()).await
}

async fn export(
    state: &AppState,
    format: ExportFormat,
    frame_rate: Option<&str>,
) -> Result<Response, ApiError> {
    let frame_rate = FrameRate::from_param(frame_rate, state.default_frame_rate);
    info!(format = %format, frame_rate = frame_rate.get(), "Export requested");

    let artifact = state
        .service
        .export(ExportRequest::new(format, frame_rate))
        .await
        .map_err(|e| export_failure(&e))?;

    let headers = [
        (header::CONTENT_TYPE, artifact.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.filename()),
        ),
    ];

    Ok((headers, artifact.bytes).into_response())
}

/// Best-effort removal of every archived frame
async fn clear_images(State(state): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    let report = state
        .service
        .clear()
        .await
        .map_err(|e| archive_failure(&e))?;

    Ok(Json(ClearResponse {
        status: "success",
        removed: report.removed,
        failed: report.failed,
    }))
}

/// Serve one archived frame
async fn serve_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state
        .service
        .read(&filename)
        .await
        .map_err(|e| archive_failure(&e))?;

    Ok(([(header::CONTENT_TYPE, get_content_type(&filename))], bytes).into_response())
}

/// Content type from a file extension
fn get_content_type(filename: &str) -> &'static str {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
