use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("no segments in requested range")]
    NoData,

    #[error("invalid clip id: {0}")]
    InvalidClipId(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
