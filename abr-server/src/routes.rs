use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use abr_policy::{BandwidthSample, QualityVariant};
use serde::Deserialize;

use crate::error::AbrError;
use crate::manager::SessionManager;
use crate::playlist::PLAYLIST_CONTENT_TYPE;

/// Create the ABR router with all endpoints.
pub fn abr_router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        // Session lifecycle and registry
        .route("/api/streams/{stream}/abr/session", get(session_handler))
        .route("/api/streams/{stream}/abr/variants", get(variants_handler))
        .route("/api/streams/{stream}/abr/start", post(start_handler))
        .route("/api/streams/{stream}/abr/stop", post(stop_handler))
        .route("/api/streams/{stream}/abr/telemetry", post(telemetry_handler))
        .route("/api/abr/sessions", get(sessions_handler))
        // Playlist delivery
        .route(
            "/api/streams/{stream}/abr/playlist.m3u8",
            get(master_playlist_handler),
        )
        .route(
            "/api/streams/{stream}/abr/variants/{variant}/playlist.m3u8",
            get(media_playlist_handler),
        )
        .with_state(manager)
}

/// Optional start-request body; omitted means "use the stored ladder".
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub variants: Option<Vec<QualityVariant>>,
}

/// Current session state for a stream.
async fn session_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    let session = manager.get_session(&stream)?;
    Ok(Json(session.as_ref().clone()))
}

/// Stored variant ladder for a stream (catalog, not session state).
async fn variants_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    let ladder = manager.variants(&stream).await?;
    Ok(Json(ladder))
}

/// Start a session (idempotent); body may override the stored ladder.
async fn start_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
    body: Option<Json<StartRequest>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    let override_ladder = body.and_then(|Json(req)| req.variants);
    let session = manager.start(&stream, override_ladder).await?;
    Ok(Json(session.as_ref().clone()))
}

/// Stop a session (idempotent; absent session is still success).
async fn stop_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    manager.stop(&stream).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Ingest one delivery-timing sample. Always accepted; bad samples are
/// dropped inside the manager rather than failing the edge reporter.
async fn telemetry_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
    Json(sample): Json<BandwidthSample>,
) -> impl IntoResponse {
    manager.ingest_sample(&stream, sample).await;
    StatusCode::ACCEPTED
}

/// Registry snapshot across all streams.
async fn sessions_handler(State(manager): State<Arc<SessionManager>>) -> impl IntoResponse {
    Json(manager.list_sessions())
}

/// Serve the master playlist for a stream.
///
/// A session in `error` still serves its last rendered playlist, marked
/// stale, so connected players degrade instead of hard-failing.
async fn master_playlist_handler(
    Path(stream): Path<String>,
    State(manager): State<Arc<SessionManager>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    let (playlist, stale) = manager.master_playlist(&stream)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PLAYLIST_CONTENT_TYPE),
    );
    if stale {
        headers.insert("x-playlist-stale", HeaderValue::from_static("true"));
    }
    Ok((headers, playlist))
}

/// Serve the media playlist for one enabled variant.
async fn media_playlist_handler(
    Path((stream, variant)): Path<(String, String)>,
    State(manager): State<Arc<SessionManager>>,
) -> Result<impl IntoResponse, AbrErrorResponse> {
    let playlist = manager.media_playlist(&stream, &variant).await?;
    Ok((
        [(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)],
        playlist,
    ))
}

/// Error response wrapper for AbrError
pub struct AbrErrorResponse(AbrError);

impl From<AbrError> for AbrErrorResponse {
    fn from(e: AbrError) -> Self {
        AbrErrorResponse(e)
    }
}

impl IntoResponse for AbrErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            AbrError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            AbrError::StreamNotFound(_)
            | AbrError::SessionNotFound(_)
            | AbrError::VariantNotAvailable { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            AbrError::EncodersFailed(_) | AbrError::Supervisor(_) => {
                (StatusCode::BAD_GATEWAY, self.0.to_string())
            }
            AbrError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()),
        };

        tracing::warn!("ABR error: {}", self.0);

        (status, message).into_response()
    }
}
