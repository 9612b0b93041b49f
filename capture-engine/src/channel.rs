use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use clip_builder::{ClipBuilder, ClipError, ClipResult};
use ffmpeg_encoder::{Encoder, EncoderConfig, FfmpegLocation};
use platform_client::{ClipMetadata, PlatformClient, SegmentNotification};
use segment_store::{
    BufferConfig as RingBufferConfig, ClosedBoundary, RingBuffer, Segment,
};

use crate::config::{ChannelConfig, InputConfig};
use crate::error::EngineError;
use crate::playlist;

/// Default quick-clip length in seconds.
pub const DEFAULT_QUICK_CLIP_SECS: f64 = 15.0;

/// Status snapshot for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel_id: String,
    pub is_running: bool,
    pub is_capturing: bool,
    pub session_id: String,
    pub buffer_health: f64,
    pub oldest_time: i64,
    pub newest_time: i64,
    pub segment_count: usize,
    pub first_seq: i64,
    pub last_seq: i64,
    pub init_segment: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of closing a boundary with clip generation.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryClipOutcome {
    pub clip_id: String,
    pub channel_id: String,
    pub session_id: String,
    /// Unix milliseconds of the boundary open.
    pub start_time: i64,
    /// Unix milliseconds of the boundary close.
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, serde_json::Value>>,
    #[serde(flatten)]
    pub clip: ClipResult,
}

/// One capture pipeline: encoder subprocess, ring buffer, boundary tracker.
///
/// A channel is created by the supervisor, started once, and never restarted
/// in place: when its encoder dies the channel stays in "not capturing" and
/// reports the error through [`Channel::status`] until an operator restart.
pub struct Channel {
    id: String,
    cfg: ChannelConfig,
    dir: PathBuf,
    ffmpeg: FfmpegLocation,

    pub(crate) buffer: Arc<RingBuffer>,
    clips: ClipBuilder,
    platform: Option<Arc<PlatformClient>>,

    encoder: Mutex<Option<Arc<Encoder>>>,
    running: AtomicBool,
    session_id: Mutex<String>,
    start_error: Mutex<Option<String>>,
}

impl Channel {
    pub fn new(
        cfg: ChannelConfig,
        ffmpeg: FfmpegLocation,
        platform: Option<Arc<PlatformClient>>,
        session_id: String,
    ) -> Result<Arc<Self>, EngineError> {
        let dir = PathBuf::from(&cfg.buffer.path).join(&cfg.id);

        let buffer = Arc::new(RingBuffer::new(RingBufferConfig::new(
            cfg.id.clone(),
            dir.clone(),
            cfg.retention(),
            cfg.segment_size(),
        ))?);

        let clips = ClipBuilder::new(ffmpeg.ffmpeg.clone(), buffer.clips_dir());

        let channel = Arc::new(Self {
            id: cfg.id.clone(),
            cfg,
            dir,
            ffmpeg,
            buffer,
            clips,
            platform,
            encoder: Mutex::new(None),
            running: AtomicBool::new(false),
            session_id: Mutex::new(session_id),
            start_error: Mutex::new(None),
        });

        let id = channel.id.clone();
        channel.buffer.on_segment(move |segment| {
            tracing::debug!(
                channel = %id,
                sequence = segment.sequence,
                size_kb = segment.size_bytes as f64 / 1024.0,
                "segment ready"
            );
        });

        // Fan open-boundary segments out to the platform, fire-and-forget
        if let Some(platform) = channel.platform.clone() {
            let id = channel.id.clone();
            channel.buffer.on_boundary_segment(move |clip_id, segment| {
                let notification = SegmentNotification {
                    clip_id: clip_id.to_string(),
                    channel_id: id.clone(),
                    segment_url: format!("/hls/{}/segment_{:05}.m4s", id, segment.sequence),
                    sequence: segment.sequence,
                    timestamp: segment.start_time.timestamp_millis(),
                    is_final: false,
                };
                let platform = Arc::clone(&platform);
                tokio::spawn(async move {
                    if let Err(e) = platform.notify_segment_ready(&notification).await {
                        tracing::warn!(error = %e, "segment notification failed");
                    }
                });
            });
        }

        Ok(channel)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start the ring buffer, and capture when an input is configured.
    ///
    /// A capture start failure (bad device, missing encoder) does not fail
    /// the channel: it is recorded and reported via status while the buffer
    /// keeps serving whatever it holds.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        tracing::info!(channel = %self.id, "starting channel");
        self.buffer.start();

        if !self.cfg.input.kind.is_empty() && !self.cfg.input.device.is_empty() {
            if let Err(e) = self.start_capture().await {
                tracing::warn!(channel = %self.id, error = %e, "failed to start capture");
                *self.start_error.lock().unwrap() = Some(e.to_string());
            }
        }

        Ok(())
    }

    /// Stop capture and the buffer (persists the index).
    pub async fn stop(&self) {
        let encoder = self.encoder.lock().unwrap().take();
        if let Some(encoder) = encoder {
            encoder.stop().await;
        }
        self.buffer.stop();
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(channel = %self.id, "channel stopped");
    }

    async fn start_capture(&self) -> Result<(), EngineError> {
        let (input, input_format) = resolve_input(&self.cfg.input)?;
        let (width, height) = parse_resolution(&self.cfg.input.resolution);

        let codec = if self.cfg.encode.codec.is_empty() {
            "libx264".to_string()
        } else {
            self.cfg.encode.codec.clone()
        };

        let encoder = Arc::new(Encoder::new(
            EncoderConfig {
                input: input.clone(),
                input_format,
                codec,
                preset: self.cfg.encode.preset.clone(),
                bitrate_kbps: self.cfg.encode.bitrate,
                width,
                height,
                framerate: self.cfg.input.framerate,
                gop: self.cfg.encode.gop,
                bframes: self.cfg.encode.bframes,
                segment_duration: self.cfg.segment_size().as_secs_f64(),
                output_dir: self.dir.clone(),
            },
            self.ffmpeg.clone(),
        ));

        let buffer = Arc::clone(&self.buffer);
        encoder.on_segment(move |info| {
            buffer.add_segment(Segment {
                sequence: info.sequence,
                file_path: info.path,
                start_time: info.start_time,
                duration: info.duration,
                size_bytes: info.size,
            });
        });

        encoder.start().await?;
        self.buffer.set_init_segment(self.dir.join("init.mp4"));
        *self.encoder.lock().unwrap() = Some(encoder);

        tracing::info!(channel = %self.id, input = %input, dir = %self.dir.display(), "capture started");
        Ok(())
    }

    pub fn status(&self) -> ChannelStatus {
        let buffer = self.buffer.status();
        ChannelStatus {
            channel_id: self.id.clone(),
            is_running: self.running.load(Ordering::SeqCst),
            is_capturing: self.is_capturing(),
            session_id: self.session_id.lock().unwrap().clone(),
            buffer_health: buffer.health,
            oldest_time: buffer.oldest_time,
            newest_time: buffer.newest_time,
            segment_count: buffer.segment_count,
            first_seq: buffer.first_seq,
            last_seq: buffer.last_seq,
            init_segment: buffer.init_segment,
            last_error: self.last_error(),
        }
    }

    /// Open an in-progress clip boundary.
    pub fn open_boundary(&self, clip_id: &str) -> Result<(), EngineError> {
        Ok(self.buffer.open_boundary(clip_id)?)
    }

    /// Close a boundary without building a clip.
    pub fn close_boundary(&self, clip_id: &str) -> Result<ClosedBoundary, EngineError> {
        Ok(self.buffer.close_boundary(clip_id)?)
    }

    /// Close a boundary and build the clip from exactly the segments tagged
    /// while it was open.
    pub async fn close_boundary_and_build(
        &self,
        clip_id: &str,
        tags: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<BoundaryClipOutcome, EngineError> {
        let closed = self.buffer.close_boundary(clip_id)?;
        self.notify_final_segment(&closed);

        let segments = self.buffer.segments_by_sequence(&closed.segments);
        if segments.is_empty() {
            return Err(ClipError::NoData.into());
        }

        let init = self.buffer.init_segment();
        let clip = self
            .clips
            .build_from_segments(clip_id, init.as_deref(), &segments)
            .await?;

        let outcome = BoundaryClipOutcome {
            clip_id: clip_id.to_string(),
            channel_id: self.id.clone(),
            session_id: self.session_id.lock().unwrap().clone(),
            start_time: closed.started_at.timestamp_millis(),
            end_time: closed.closed_at.timestamp_millis(),
            tags,
            clip,
        };

        self.spawn_clip_upload(
            &outcome.clip,
            outcome.start_time,
            outcome.end_time,
            clip_id,
            outcome.tags.clone(),
        );

        Ok(outcome)
    }

    /// Build a clip covering `[start_ms, end_ms)` (Unix milliseconds).
    pub async fn build_clip_by_time(
        &self,
        start_ms: i64,
        end_ms: i64,
        clip_id: &str,
    ) -> Result<ClipResult, EngineError> {
        let start =
            DateTime::from_timestamp_millis(start_ms).ok_or(EngineError::InvalidTimeRange)?;
        let end = DateTime::from_timestamp_millis(end_ms).ok_or(EngineError::InvalidTimeRange)?;
        if end <= start {
            return Err(EngineError::InvalidTimeRange);
        }

        let segments = self.buffer.segments_in_range(start, end);
        if segments.is_empty() {
            return Err(ClipError::NoData.into());
        }
        // A sequence gap inside the match means the range straddles an
        // encoder restart; the two runs cannot share an init segment.
        if !is_contiguous(&segments) {
            tracing::warn!(channel = %self.id, "requested range crosses a capture restart");
            return Err(ClipError::NoData.into());
        }

        let init = self.buffer.init_segment();
        let clip = self
            .clips
            .build_for_window(clip_id, init.as_deref(), &segments, start, end)
            .await?;

        self.spawn_clip_upload(&clip, start_ms, end_ms, clip_id, None);
        Ok(clip)
    }

    /// Build a clip of the trailing `duration_secs` seconds.
    pub async fn build_quick_clip(
        &self,
        duration_secs: f64,
        clip_id: &str,
    ) -> Result<ClipResult, EngineError> {
        let now = Utc::now().timestamp_millis();
        let span = (duration_secs.max(0.0) * 1000.0) as i64;
        self.build_clip_by_time(now - span, now, clip_id).await
    }

    /// Render the live HLS playlist over the currently held segments.
    pub fn live_playlist(&self) -> Result<String, EngineError> {
        let segments = self.buffer.segments();
        if segments.is_empty() {
            return Err(EngineError::NoSegments);
        }
        Ok(playlist::render_live_playlist(
            &segments,
            self.buffer.segment_duration(),
        ))
    }

    /// Resolve a served file name (init.mp4 or segment_NNNNN.m4s) to its
    /// on-disk path. Anything else is rejected.
    pub fn segment_file(&self, name: &str) -> Option<PathBuf> {
        if name == "init.mp4" {
            return self.init_path().filter(|p| p.is_file());
        }
        ffmpeg_encoder::watcher::parse_sequence(name)?;
        let path = self.dir.join(name);
        path.is_file().then_some(path)
    }

    pub fn init_path(&self) -> Option<PathBuf> {
        self.buffer.init_segment()
    }

    pub fn is_capturing(&self) -> bool {
        self.encoder
            .lock()
            .unwrap()
            .as_ref()
            .map(|e| e.is_capturing())
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<String> {
        if let Some(err) = self.start_error.lock().unwrap().clone() {
            return Some(err);
        }
        self.encoder
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|e| e.last_error())
    }

    pub fn set_session(&self, session_id: String) {
        *self.session_id.lock().unwrap() = session_id;
    }

    fn notify_final_segment(&self, closed: &ClosedBoundary) {
        let Some(platform) = self.platform.clone() else {
            return;
        };
        let last_seq = closed.segments.last().copied().unwrap_or(0);
        let notification = SegmentNotification {
            clip_id: closed.clip_id.clone(),
            channel_id: self.id.clone(),
            segment_url: format!("/hls/{}/segment_{:05}.m4s", self.id, last_seq),
            sequence: last_seq,
            timestamp: closed.closed_at.timestamp_millis(),
            is_final: true,
        };
        tokio::spawn(async move {
            if let Err(e) = platform.notify_segment_ready(&notification).await {
                tracing::warn!(error = %e, "final segment notification failed");
            }
        });
    }

    fn spawn_clip_upload(
        &self,
        clip: &ClipResult,
        start_ms: i64,
        end_ms: i64,
        clip_id: &str,
        tags: Option<HashMap<String, serde_json::Value>>,
    ) {
        let Some(platform) = self.platform.clone() else {
            return;
        };
        let metadata = ClipMetadata {
            session_id: self.session_id.lock().unwrap().clone(),
            channel_id: self.id.clone(),
            clip_id: clip_id.to_string(),
            start_time: start_ms,
            end_time: end_ms,
            duration_seconds: clip.duration,
            file_size_bytes: Some(clip.file_size_bytes),
            tags,
        };
        let file_path = clip.file_path.clone();
        let channel = self.id.clone();
        tokio::spawn(async move {
            match platform.upload_clip(&file_path, metadata).await {
                Ok(result) => {
                    tracing::info!(
                        channel = %channel,
                        file = %result.file_name,
                        size = result.file_size,
                        "clip uploaded"
                    );
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "clip upload failed");
                }
            }
        });
    }
}

/// Map a configured input to ffmpeg's input string and forced format.
fn resolve_input(input: &InputConfig) -> Result<(String, Option<String>), EngineError> {
    match input.kind.as_str() {
        "file" | "srt" | "rtsp" | "rtmp" => Ok((input.device.clone(), None)),
        "screen" => Ok(("0:none".to_string(), Some("avfoundation".to_string()))),
        "avfoundation" | "v4l2" | "dshow" | "decklink" => {
            Ok((input.device.clone(), Some(input.kind.clone())))
        }
        "ndi" => Err(EngineError::UnsupportedInput(
            "ndi (requires the external NDI bridge)".to_string(),
        )),
        other => Err(EngineError::UnsupportedInput(other.to_string())),
    }
}

/// Parse "1920x1080" into (width, height); anything else is (0, 0) = source.
fn parse_resolution(resolution: &str) -> (u32, u32) {
    resolution
        .split_once('x')
        .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
        .unwrap_or((0, 0))
}

fn is_contiguous(segments: &[Segment]) -> bool {
    segments
        .windows(2)
        .all(|pair| pair[1].sequence == pair[0].sequence + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferConfig, EncodeConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fake_ffmpeg() -> FfmpegLocation {
        FfmpegLocation {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
        }
    }

    fn idle_channel(dir: &TempDir) -> Arc<Channel> {
        let cfg = ChannelConfig {
            id: "cam1".to_string(),
            input: InputConfig::default(),
            buffer: BufferConfig {
                duration: Some(Duration::from_secs(60)),
                segment_size: Some(Duration::from_secs(2)),
                path: dir.path().to_string_lossy().into_owned(),
                max_size: String::new(),
            },
            encode: EncodeConfig::default(),
        };
        Channel::new(cfg, fake_ffmpeg(), None, "session-1".to_string()).unwrap()
    }

    fn admit(channel: &Channel, seq: i64, start: DateTime<Utc>) -> Segment {
        let path = channel.dir.join(format!("segment_{seq:05}.m4s"));
        std::fs::write(&path, b"data").unwrap();
        let segment = Segment {
            sequence: seq,
            file_path: path,
            start_time: start,
            duration: Duration::from_secs(2),
            size_bytes: 4,
        };
        channel.buffer.add_segment(segment.clone());
        segment
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1920x1080"), (1920, 1080));
        assert_eq!(parse_resolution(""), (0, 0));
        assert_eq!(parse_resolution("widexhigh"), (0, 0));
    }

    #[test]
    fn test_resolve_input() {
        let rtsp = InputConfig {
            kind: "rtsp".to_string(),
            device: "rtsp://cam/stream".to_string(),
            ..Default::default()
        };
        assert_eq!(
            resolve_input(&rtsp).unwrap(),
            ("rtsp://cam/stream".to_string(), None)
        );

        let v4l2 = InputConfig {
            kind: "v4l2".to_string(),
            device: "/dev/video0".to_string(),
            ..Default::default()
        };
        assert_eq!(
            resolve_input(&v4l2).unwrap(),
            ("/dev/video0".to_string(), Some("v4l2".to_string()))
        );

        let ndi = InputConfig {
            kind: "ndi".to_string(),
            device: "CAMERA1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            resolve_input(&ndi),
            Err(EngineError::UnsupportedInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_channel_start_status() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);

        channel.start().await.unwrap();
        assert!(matches!(
            channel.start().await,
            Err(EngineError::AlreadyRunning)
        ));

        let status = channel.status();
        assert!(status.is_running);
        assert!(!status.is_capturing);
        assert_eq!(status.channel_id, "cam1");
        assert_eq!(status.session_id, "session-1");
        assert_eq!(status.segment_count, 0);
        assert_eq!(status.first_seq, -1);
        assert!(status.last_error.is_none());

        channel.stop().await;
        assert!(!channel.status().is_running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_boundary_lifecycle() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        channel.start().await.unwrap();

        let base = Utc::now();
        admit(&channel, 0, base);

        channel.open_boundary("p1").unwrap();
        assert!(matches!(
            channel.open_boundary("p1"),
            Err(EngineError::Boundary(
                segment_store::BoundaryError::Duplicate(_)
            ))
        ));

        admit(&channel, 1, base + chrono::Duration::seconds(2));
        admit(&channel, 2, base + chrono::Duration::seconds(4));

        let closed = channel.close_boundary("p1").unwrap();
        assert_eq!(closed.start_seq, 0);
        assert_eq!(closed.segments, vec![1, 2]);

        assert!(matches!(
            channel.close_boundary("p1"),
            Err(EngineError::Boundary(
                segment_store::BoundaryError::Unknown(_)
            ))
        ));

        channel.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clip_by_time_no_data() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        channel.start().await.unwrap();

        let now = Utc::now().timestamp_millis();
        let err = channel
            .build_clip_by_time(now - 10_000, now, "clip1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Clip(ClipError::NoData)));

        channel.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clip_across_restart_gap_is_no_data() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        channel.start().await.unwrap();

        let base = Utc::now() - chrono::Duration::seconds(20);
        admit(&channel, 0, base);
        admit(&channel, 1, base + chrono::Duration::seconds(2));
        // Encoder restart: numbering resumes with a gap
        admit(&channel, 10, base + chrono::Duration::seconds(6));

        let err = channel
            .build_clip_by_time(
                base.timestamp_millis(),
                (base + chrono::Duration::seconds(8)).timestamp_millis(),
                "clip1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Clip(ClipError::NoData)));

        channel.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_time_range() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        let err = channel.build_clip_by_time(2000, 1000, "c").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTimeRange));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_live_playlist() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        channel.start().await.unwrap();

        assert!(matches!(
            channel.live_playlist(),
            Err(EngineError::NoSegments)
        ));

        let base = Utc::now();
        admit(&channel, 4, base);
        admit(&channel, 5, base + chrono::Duration::seconds(2));

        let playlist = channel.live_playlist().unwrap();
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:4"));
        assert!(playlist.contains("segment_00005.m4s"));

        channel.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_segment_file_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let channel = idle_channel(&dir);
        channel.start().await.unwrap();

        let base = Utc::now();
        let seg = admit(&channel, 1, base);
        assert_eq!(channel.segment_file("segment_00001.m4s"), Some(seg.file_path));
        assert_eq!(channel.segment_file("segment_00002.m4s"), None);
        assert_eq!(channel.segment_file("../index.json"), None);
        assert_eq!(channel.segment_file("manifest.mpd"), None);

        channel.stop().await;
    }
}
