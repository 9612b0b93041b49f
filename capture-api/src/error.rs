use axum::http::StatusCode;
use axum::response::IntoResponse;

use capture_engine::EngineError;
use clip_builder::ClipError;
use segment_store::BoundaryError;

/// Response wrapper mapping engine errors to HTTP statuses.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            EngineError::ChannelNotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::Boundary(BoundaryError::Unknown(_)) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            EngineError::Boundary(BoundaryError::Duplicate(_)) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            EngineError::Clip(ClipError::NoData) => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::Clip(ClipError::InvalidClipId(_)) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            EngineError::NoSegments => (StatusCode::NOT_FOUND, self.0.to_string()),
            EngineError::InvalidTimeRange => (StatusCode::BAD_REQUEST, self.0.to_string()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        tracing::warn!("API error: {}", self.0);

        (status, message).into_response()
    }
}
