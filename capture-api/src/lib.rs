//! HTTP control surface for the capture engine.
//!
//! Thin axum wrappers over the supervisor and its channels:
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /health` | Service health + channel count |
//! | `GET /api/v1/channels` | Channel ids and statuses |
//! | `GET /api/v1/channels/{id}/status` | One channel's status |
//! | `POST /api/v1/channels/{id}/mark/in` | Open an in-progress clip boundary |
//! | `POST /api/v1/channels/{id}/mark/out` | Close a boundary (optionally build the clip) |
//! | `POST /api/v1/channels/{id}/clip` | Build a clip for a time range |
//! | `POST /api/v1/channels/{id}/clip/quick` | Build a clip of the last N seconds |
//! | `GET /hls/{id}/live.m3u8` | Live fMP4 playlist |
//! | `GET /hls/{id}/{name}` | init.mp4 / media segment file |
//!
//! Legacy single-channel routes (`/api/v1/status`, `/api/v1/mark/in`, ...)
//! delegate to the supervisor's default channel.

pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::api_router;

use std::sync::Arc;

use capture_engine::Supervisor;

/// Bind and serve the API until `shutdown` resolves.
pub async fn serve(
    addr: String,
    supervisor: Arc<Supervisor>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, api_router(supervisor))
        .with_graceful_shutdown(shutdown)
        .await
}
