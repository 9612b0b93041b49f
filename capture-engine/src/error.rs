use thiserror::Error;

use clip_builder::ClipError;
use ffmpeg_encoder::EncoderError;
use segment_store::{BoundaryError, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel already running")]
    AlreadyRunning,

    #[error("unsupported input type: {0}")]
    UnsupportedInput(String),

    #[error("no segments available")]
    NoSegments,

    #[error("invalid time range")]
    InvalidTimeRange,

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
