use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ffmpeg_encoder::FfmpegLocation;
use platform_client::PlatformClient;

use crate::channel::{Channel, ChannelStatus};
use crate::config::CaptureConfig;
use crate::error::EngineError;

/// Process-wide owner of all capture channels.
///
/// Channels share nothing but the resolved encoder binary; each runs its own
/// subprocess, buffer and tracker. Aggregate queries iterate the channel map
/// in id order so results are deterministic.
pub struct Supervisor {
    channels: HashMap<String, Arc<Channel>>,
    default_id: Option<String>,
    ffmpeg: FfmpegLocation,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Build every configured channel, resolving ffmpeg from the system.
    pub fn new(
        cfg: &CaptureConfig,
        platform: Option<Arc<PlatformClient>>,
    ) -> Result<Self, EngineError> {
        let ffmpeg = FfmpegLocation::discover()?;
        Self::with_ffmpeg(cfg, ffmpeg, platform)
    }

    /// Build every configured channel with an explicit ffmpeg location.
    pub fn with_ffmpeg(
        cfg: &CaptureConfig,
        ffmpeg: FfmpegLocation,
        platform: Option<Arc<PlatformClient>>,
    ) -> Result<Self, EngineError> {
        let mut channels = HashMap::new();
        for channel_cfg in cfg.channel_configs() {
            let id = channel_cfg.id.clone();
            let channel = Channel::new(
                channel_cfg,
                ffmpeg.clone(),
                platform.clone(),
                cfg.session.session_id.clone(),
            )?;
            tracing::info!(channel = %id, "channel configured");
            channels.insert(id, channel);
        }

        let default_id = if !cfg.session.channel_id.is_empty()
            && channels.contains_key(&cfg.session.channel_id)
        {
            Some(cfg.session.channel_id.clone())
        } else {
            channels.keys().min().cloned()
        };

        Ok(Self {
            channels,
            default_id,
            ffmpeg,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start every channel. A channel that fails to start is logged and the
    /// rest continue.
    pub async fn start(&self) {
        match self.ffmpeg.version().await {
            Ok(version) => tracing::info!(%version, "ffmpeg"),
            Err(e) => tracing::warn!(error = %e, "could not read ffmpeg version"),
        }

        tracing::info!(count = self.channels.len(), "starting channels");
        for (id, channel) in self.channels_ordered() {
            if let Err(e) = channel.start().await {
                tracing::warn!(channel = %id, error = %e, "failed to start channel");
            }
        }
    }

    /// Stop every channel, best-effort, and release waiters.
    pub async fn stop(&self) {
        for (_, channel) in self.channels_ordered() {
            channel.stop().await;
        }
        self.shutdown.cancel();
        tracing::info!("all channels stopped");
    }

    /// Block until [`Supervisor::stop`] is called.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).cloned()
    }

    /// The channel legacy single-channel routes delegate to.
    pub fn default_channel(&self) -> Option<Arc<Channel>> {
        self.default_id
            .as_ref()
            .and_then(|id| self.channels.get(id))
            .cloned()
    }

    pub fn list_channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_all_statuses(&self) -> HashMap<String, ChannelStatus> {
        self.channels
            .iter()
            .map(|(id, channel)| (id.clone(), channel.status()))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// True when any channel is actively capturing.
    pub fn is_recording(&self) -> bool {
        self.channels.values().any(|channel| channel.is_capturing())
    }

    /// First error across channels in id order, for the heartbeat.
    pub fn last_error(&self) -> Option<String> {
        self.channels_ordered()
            .into_iter()
            .find_map(|(_, channel)| channel.last_error())
    }

    pub fn set_session(&self, session_id: &str) {
        for channel in self.channels.values() {
            channel.set_session(session_id.to_string());
        }
        tracing::info!(session = %session_id, "session updated for all channels");
    }

    fn channels_ordered(&self) -> Vec<(String, Arc<Channel>)> {
        let mut entries: Vec<(String, Arc<Channel>)> = self
            .channels
            .iter()
            .map(|(id, channel)| (id.clone(), Arc::clone(channel)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fake_ffmpeg() -> FfmpegLocation {
        FfmpegLocation {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
        }
    }

    fn two_channel_config(dir: &TempDir) -> CaptureConfig {
        let yaml = format!(
            r#"
buffer:
  duration: 60s
  segment_size: 2s
  path: {}
channels:
  - id: cam1
  - id: cam2
session:
  channel_id: cam2
"#,
            dir.path().display()
        );
        CaptureConfig::parse(&yaml).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_supervisor_lifecycle() {
        let dir = TempDir::new().unwrap();
        let cfg = two_channel_config(&dir);
        let supervisor = Supervisor::with_ffmpeg(&cfg, fake_ffmpeg(), None).unwrap();

        assert_eq!(supervisor.channel_count(), 2);
        assert_eq!(supervisor.list_channels(), vec!["cam1", "cam2"]);
        assert_eq!(supervisor.default_channel().unwrap().id(), "cam2");
        assert!(supervisor.get_channel("cam1").is_some());
        assert!(supervisor.get_channel("nope").is_none());

        supervisor.start().await;
        let statuses = supervisor.get_all_statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.values().all(|s| s.is_running && !s.is_capturing));
        assert!(!supervisor.is_recording());
        assert!(supervisor.last_error().is_none());

        supervisor.stop().await;
        // Wait returns immediately after stop
        supervisor.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_default_channel_single_mode() {
        let dir = TempDir::new().unwrap();
        let yaml = format!("buffer: {{path: {}}}", dir.path().display());
        let cfg = CaptureConfig::parse(&yaml).unwrap();
        let supervisor = Supervisor::with_ffmpeg(&cfg, fake_ffmpeg(), None).unwrap();

        assert_eq!(supervisor.channel_count(), 1);
        assert_eq!(supervisor.default_channel().unwrap().id(), "default");
    }
}
