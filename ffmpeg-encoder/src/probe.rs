//! ffprobe wrapper.

use std::path::Path;

use serde::Deserialize;

use crate::error::EncoderError;

#[derive(Debug, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub format: ProbeFormat,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeFormat {
    #[serde(default)]
    pub format_name: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub bit_rate: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub codec_name: String,
    #[serde(default)]
    pub codec_type: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub pix_fmt: String,
    #[serde(default)]
    pub r_frame_rate: String,
    #[serde(default)]
    pub avg_frame_rate: String,
    #[serde(default)]
    pub bit_rate: String,
}

/// Simplified view of the first video stream.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub framerate: f64,
    pub codec: String,
    pub bitrate: i64,
    pub pixel_format: String,
}

impl VideoInfo {
    /// Resolution string like "1920x1080".
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Run ffprobe against a media file and return the parsed JSON.
pub async fn probe(ffprobe: &Path, input: &Path) -> Result<ProbeResult, EncoderError> {
    let output = tokio::process::Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(input)
        .output()
        .await
        .map_err(|e| EncoderError::Probe(e.to_string()))?;

    if !output.status.success() {
        return Err(EncoderError::Probe(format!(
            "ffprobe exited with {}",
            output.status
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| EncoderError::Probe(format!("parse ffprobe output: {e}")))
}

/// Probe and reduce to the fields the encoder cares about.
pub async fn video_info(ffprobe: &Path, input: &Path) -> Result<VideoInfo, EncoderError> {
    let result = probe(ffprobe, input).await?;

    let mut info = VideoInfo::default();

    if let Some(stream) = result.streams.iter().find(|s| s.codec_type == "video") {
        info.width = stream.width;
        info.height = stream.height;
        info.codec = stream.codec_name.clone();
        info.pixel_format = stream.pix_fmt.clone();

        if !stream.avg_frame_rate.is_empty() {
            info.framerate = parse_framerate(&stream.avg_frame_rate);
        }
        if info.framerate == 0.0 && !stream.r_frame_rate.is_empty() {
            info.framerate = parse_framerate(&stream.r_frame_rate);
        }
        if !stream.bit_rate.is_empty() {
            info.bitrate = stream.bit_rate.parse().unwrap_or(0);
        }
    }

    if !result.format.duration.is_empty() {
        info.duration = result.format.duration.parse().unwrap_or(0.0);
    }
    if info.bitrate == 0 && !result.format.bit_rate.is_empty() {
        info.bitrate = result.format.bit_rate.parse().unwrap_or(0);
    }

    Ok(info)
}

/// Parse a framerate string like "30/1", "30000/1001" or "29.97".
pub fn parse_framerate(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        if let (Ok(num), Ok(den)) = (num.parse::<f64>(), den.parse::<f64>()) {
            if den != 0.0 {
                return num / den;
            }
        }
        return 0.0;
    }
    s.parse().unwrap_or(0.0)
}
