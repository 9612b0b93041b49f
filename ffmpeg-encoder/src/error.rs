use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("ffmpeg not found - is it installed?")]
    FfmpegNotFound,

    #[error("ffprobe not found - is it installed?")]
    FfprobeNotFound,

    #[error("encoder already running")]
    AlreadyRunning,

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),

    #[error("ffmpeg exited unexpectedly: {0}")]
    Exited(String),

    #[error("ffprobe failed: {0}")]
    Probe(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
