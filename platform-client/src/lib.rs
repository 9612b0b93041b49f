//! Video-platform API client.
//!
//! Remote collaborator for the capture engine: agent registration and
//! heartbeats, in-progress-clip segment notifications, and finished-clip
//! uploads. Every call is best-effort from the core's point of view; failures
//! are logged by the caller and never block capture.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;

/// Timeout for small control-plane calls (register, heartbeat, notify).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for clip uploads.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("platform client not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("platform returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform connection settings.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub url: String,
    pub api_key: String,
}

/// Clip metadata sent alongside an upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClipMetadata {
    pub session_id: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub clip_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_path: String,
}

/// Fired once per segment while a clip boundary is open.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentNotification {
    pub clip_id: String,
    pub channel_id: String,
    pub segment_url: String,
    pub sequence: i64,
    pub timestamp: i64,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Recording,
    Error,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub can_capture_srt: bool,
    pub can_capture_rtsp: bool,
    pub can_capture_rtmp: bool,
    pub can_capture_usb: bool,
    pub supported_codecs: Vec<String>,
    pub max_resolution: String,
    pub max_bitrate: u32,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            can_capture_srt: true,
            can_capture_rtsp: true,
            can_capture_rtmp: true,
            can_capture_usb: true,
            supported_codecs: vec!["h264".to_string(), "hevc".to_string()],
            max_resolution: "3840x2160".to_string(),
            max_bitrate: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterAgentRequest {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    pub capabilities: AgentCapabilities,
    pub version: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHeartbeatRequest {
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// The platform HTTP client.
pub struct PlatformClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl PlatformClient {
    pub fn new(cfg: PlatformConfig) -> Self {
        Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key,
            http: reqwest::Client::new(),
        }
    }

    /// True when a platform URL is set.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Register this capture agent; returns the platform's agent record.
    pub async fn register_agent(
        &self,
        request: &RegisterAgentRequest,
    ) -> Result<Agent, PlatformError> {
        let response = self
            .post_json("/api/v1/agents/register", request, CONTROL_TIMEOUT)
            .await?;
        Ok(response.json().await?)
    }

    /// Send a heartbeat for a registered agent.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        request: &AgentHeartbeatRequest,
    ) -> Result<(), PlatformError> {
        self.post_json(
            &format!("/api/v1/agents/{agent_id}/heartbeat"),
            request,
            CONTROL_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Notify the platform of a segment produced inside an open boundary.
    pub async fn notify_segment_ready(
        &self,
        notification: &SegmentNotification,
    ) -> Result<(), PlatformError> {
        self.post_json("/api/v1/segments/notify", notification, CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Upload a finished clip as multipart form data.
    pub async fn upload_clip(
        &self,
        file_path: &Path,
        mut metadata: ClipMetadata,
    ) -> Result<UploadResult, PlatformError> {
        if !self.is_configured() {
            return Err(PlatformError::NotConfigured);
        }

        let file = tokio::fs::File::open(file_path).await?;
        let size = file.metadata().await?.len();
        metadata.file_size_bytes = Some(size);

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.mp4".to_string());

        let form = reqwest::multipart::Form::new()
            .text("metadata", serde_json::to_string(&metadata).expect("metadata is serializable"))
            .part(
                "file",
                reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(ReaderStream::new(
                    file,
                )))
                .file_name(file_name)
                .mime_str("video/mp4")
                .expect("static mime type"),
            );

        let mut request = self
            .http
            .post(format!("{}/api/v1/clips/upload", self.base_url))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<reqwest::Response, PlatformError> {
        if !self.is_configured() {
            return Err(PlatformError::NotConfigured);
        }

        let mut request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_client() {
        let client = PlatformClient::new(PlatformConfig::default());
        assert!(!client.is_configured());
    }

    #[test]
    fn test_notification_json() {
        let notification = SegmentNotification {
            clip_id: "p1".to_string(),
            channel_id: "cam1".to_string(),
            segment_url: "/hls/cam1/segment_00007.m4s".to_string(),
            sequence: 7,
            timestamp: 1_700_000_000_000,
            is_final: false,
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["clip_id"], "p1");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["is_final"], false);
    }

    #[test]
    fn test_agent_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::Recording).unwrap(),
            "\"recording\""
        );
    }

    #[test]
    fn test_metadata_skips_empty_optionals() {
        let metadata = ClipMetadata {
            session_id: "s1".to_string(),
            channel_id: "cam1".to_string(),
            start_time: 0,
            end_time: 15_000,
            duration_seconds: 15.0,
            ..Default::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("clip_id").is_none());
        assert!(json.get("tags").is_none());
        assert_eq!(json["duration_seconds"], 15.0);
    }
}
