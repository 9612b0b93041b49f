use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use capture_engine::channel::DEFAULT_QUICK_CLIP_SECS;
use capture_engine::{Channel, EngineError, Supervisor};

use crate::error::ApiError;

/// Build the full control-surface router.
pub fn api_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/channels", get(list_channels))
        .route("/api/v1/channels/{id}/status", get(channel_status))
        .route("/api/v1/channels/{id}/mark/in", post(mark_in))
        .route("/api/v1/channels/{id}/mark/out", post(mark_out))
        .route("/api/v1/channels/{id}/clip", post(build_clip))
        .route("/api/v1/channels/{id}/clip/quick", post(quick_clip))
        .route("/hls/{id}/live.m3u8", get(live_playlist))
        .route("/hls/{id}/{name}", get(serve_segment))
        // Legacy single-channel routes delegate to the default channel
        .route("/api/v1/status", get(legacy_status))
        .route("/api/v1/mark/in", post(legacy_mark_in))
        .route("/api/v1/mark/out", post(legacy_mark_out))
        .route("/api/v1/clip", post(legacy_build_clip))
        .route("/api/v1/clip/quick", post(legacy_quick_clip))
        .with_state(supervisor)
}

#[derive(Debug, Deserialize)]
struct MarkInRequest {
    clip_id: String,
}

#[derive(Debug, Deserialize)]
struct MarkOutRequest {
    clip_id: String,
    #[serde(default)]
    generate_clip: bool,
    #[serde(default)]
    tags: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ClipRequest {
    /// Unix milliseconds.
    start_time: i64,
    /// Unix milliseconds.
    end_time: i64,
    clip_id: String,
}

#[derive(Debug, Deserialize)]
struct QuickClipRequest {
    #[serde(default)]
    duration_seconds: Option<f64>,
    clip_id: String,
}

fn channel(supervisor: &Supervisor, id: &str) -> Result<Arc<Channel>, ApiError> {
    supervisor
        .get_channel(id)
        .ok_or_else(|| EngineError::ChannelNotFound(id.to_string()).into())
}

fn default_channel(supervisor: &Supervisor) -> Result<Arc<Channel>, ApiError> {
    supervisor
        .default_channel()
        .ok_or_else(|| EngineError::ChannelNotFound("default".to_string()).into())
}

async fn health(State(supervisor): State<Arc<Supervisor>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "capture-node",
        "channel_count": supervisor.channel_count(),
    }))
}

async fn list_channels(State(supervisor): State<Arc<Supervisor>>) -> impl IntoResponse {
    Json(json!({
        "channels": supervisor.list_channels(),
        "statuses": supervisor.get_all_statuses(),
    }))
}

async fn channel_status(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    Ok(Json(channel.status()))
}

async fn mark_in(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<MarkInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    do_mark_in(&channel, request)
}

async fn mark_out(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<MarkOutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    do_mark_out(&channel, request).await
}

async fn build_clip(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<ClipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    do_build_clip(&channel, request).await
}

async fn quick_clip(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<QuickClipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    do_quick_clip(&channel, request).await
}

async fn live_playlist(
    Path(id): Path<String>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    let playlist = channel.live_playlist()?;
    Ok((
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        playlist,
    ))
}

/// Serve init.mp4 or a media segment as a file stream.
///
/// The file may be unlinked by eviction mid-read; the open handle keeps the
/// bytes readable and later requests simply 404.
async fn serve_segment(
    Path((id, name)): Path<(String, String)>,
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = channel(&supervisor, &id)?;
    let path = channel
        .segment_file(&name)
        .ok_or(EngineError::NoSegments)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| EngineError::NoSegments)?;
    let stream = ReaderStream::new(file);

    let content_type = if name.ends_with(".m4s") {
        "video/iso.segment"
    } else {
        "video/mp4"
    };

    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream),
    ))
}

async fn legacy_status(
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = default_channel(&supervisor)?;
    Ok(Json(channel.status()))
}

async fn legacy_mark_in(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<MarkInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = default_channel(&supervisor)?;
    do_mark_in(&channel, request)
}

async fn legacy_mark_out(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<MarkOutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = default_channel(&supervisor)?;
    do_mark_out(&channel, request).await
}

async fn legacy_build_clip(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<ClipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = default_channel(&supervisor)?;
    do_build_clip(&channel, request).await
}

async fn legacy_quick_clip(
    State(supervisor): State<Arc<Supervisor>>,
    Json(request): Json<QuickClipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = default_channel(&supervisor)?;
    do_quick_clip(&channel, request).await
}

fn do_mark_in(channel: &Channel, request: MarkInRequest) -> Result<Json<serde_json::Value>, ApiError> {
    channel.open_boundary(&request.clip_id)?;
    Ok(Json(json!({
        "status": "ok",
        "channel_id": channel.id(),
        "clip_id": request.clip_id,
        "timestamp": Utc::now().timestamp_millis(),
    })))
}

async fn do_mark_out(
    channel: &Channel,
    request: MarkOutRequest,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.generate_clip || request.tags.is_some() {
        let outcome = channel
            .close_boundary_and_build(&request.clip_id, request.tags)
            .await?;
        Ok(Json(json!({
            "status": "ok",
            "channel_id": channel.id(),
            "clip_id": request.clip_id,
            "timestamp": Utc::now().timestamp_millis(),
            "clip": outcome,
        })))
    } else {
        let closed = channel.close_boundary(&request.clip_id)?;
        Ok(Json(json!({
            "status": "ok",
            "channel_id": channel.id(),
            "clip_id": request.clip_id,
            "timestamp": Utc::now().timestamp_millis(),
            "segment_count": closed.segments.len(),
            "segments": closed.segments,
        })))
    }
}

async fn do_build_clip(
    channel: &Channel,
    request: ClipRequest,
) -> Result<Json<serde_json::Value>, ApiError> {
    let clip = channel
        .build_clip_by_time(request.start_time, request.end_time, &request.clip_id)
        .await?;
    Ok(Json(json!({
        "status": "ok",
        "channel_id": channel.id(),
        "clip": clip,
    })))
}

async fn do_quick_clip(
    channel: &Channel,
    request: QuickClipRequest,
) -> Result<Json<serde_json::Value>, ApiError> {
    let duration = request
        .duration_seconds
        .filter(|d| *d > 0.0)
        .unwrap_or(DEFAULT_QUICK_CLIP_SECS);
    let clip = channel.build_quick_clip(duration, &request.clip_id).await?;
    Ok(Json(json!({
        "status": "ok",
        "channel_id": channel.id(),
        "clip": clip,
    })))
}
