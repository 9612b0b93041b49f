use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SEGMENT_SIZE: Duration = Duration::from_secs(2);
const DEFAULT_PRESET: &str = "fast";
const DEFAULT_API_PORT: u16 = 8080;
const DEFAULT_BUFFER_PATH: &str = "./buffer";
const DEFAULT_CHANNEL_ID: &str = "default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level capture configuration (YAML).
///
/// Either a `channels` list, or single-channel mode via top-level
/// `input`/`buffer`/`encode` (treated as a one-element channel list). The
/// top-level `buffer`/`encode` blocks double as defaults that channel entries
/// inherit field-by-field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub encode: EncodeConfig,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    /// Source kind: file, srt, rtsp, rtmp, screen, avfoundation, v4l2, dshow,
    /// decklink.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Device identifier or URL.
    #[serde(default)]
    pub device: String,
    /// Output resolution like "1920x1080" (empty = source).
    #[serde(default)]
    pub resolution: String,
    /// Source framerate (0 = probe or assume 30).
    #[serde(default)]
    pub framerate: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BufferConfig {
    /// Retention window, e.g. "30m" (default) or integer seconds.
    #[serde(default, deserialize_with = "opt_duration")]
    pub duration: Option<Duration>,
    /// Segment duration, e.g. "2s" (default) or integer seconds.
    #[serde(default, deserialize_with = "opt_duration")]
    pub segment_size: Option<Duration>,
    /// Base storage path; each channel gets a subdirectory.
    #[serde(default)]
    pub path: String,
    /// Advisory cap on total storage, e.g. "8GB" (informational).
    #[serde(default)]
    pub max_size: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncodeConfig {
    /// h264/hevc encoder name (empty = libx264).
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub preset: String,
    /// Target bitrate in kbps (0 = source).
    #[serde(default)]
    pub bitrate: u32,
    /// Keyframe interval in frames (0 = derived).
    #[serde(default)]
    pub gop: u32,
    #[serde(default)]
    pub bframes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_API_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub channel_id: String,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

impl CaptureConfig {
    /// Load from a YAML file, expanding `$VAR`/`${VAR}` references first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse YAML text (already read), expand environment variables, apply
    /// defaults and validate.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(raw);
        let mut cfg: CaptureConfig = serde_yaml::from_str(&expanded)?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.buffer.duration.is_none() {
            self.buffer.duration = Some(DEFAULT_RETENTION);
        }
        if self.buffer.segment_size.is_none() {
            self.buffer.segment_size = Some(DEFAULT_SEGMENT_SIZE);
        }
        if self.buffer.path.is_empty() {
            self.buffer.path = DEFAULT_BUFFER_PATH.to_string();
        }
        if self.encode.preset.is_empty() {
            self.encode.preset = DEFAULT_PRESET.to_string();
        }

        for channel in &mut self.channels {
            if channel.buffer.duration.is_none() {
                channel.buffer.duration = self.buffer.duration;
            }
            if channel.buffer.segment_size.is_none() {
                channel.buffer.segment_size = self.buffer.segment_size;
            }
            if channel.buffer.path.is_empty() {
                channel.buffer.path = self.buffer.path.clone();
            }
            if channel.encode.codec.is_empty() {
                channel.encode.codec = self.encode.codec.clone();
            }
            if channel.encode.preset.is_empty() {
                channel.encode.preset = self.encode.preset.clone();
            }
            if channel.encode.bitrate == 0 {
                channel.encode.bitrate = self.encode.bitrate;
            }
            if channel.encode.gop == 0 {
                channel.encode.gop = self.encode.gop;
            }
            if channel.encode.bframes.is_none() {
                channel.encode.bframes = self.encode.bframes;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if channel.id.is_empty() {
                return Err(ConfigError::Invalid("channel with empty id".to_string()));
            }
            if !seen.insert(&channel.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel id: {}",
                    channel.id
                )));
            }
        }
        Ok(())
    }

    /// True when a `channels` list is configured.
    pub fn is_multi_channel(&self) -> bool {
        !self.channels.is_empty()
    }

    /// The effective channel list: the configured one, or a single synthetic
    /// channel from the top-level blocks.
    pub fn channel_configs(&self) -> Vec<ChannelConfig> {
        if self.is_multi_channel() {
            return self.channels.clone();
        }

        let id = if self.session.channel_id.is_empty() {
            DEFAULT_CHANNEL_ID.to_string()
        } else {
            self.session.channel_id.clone()
        };
        vec![ChannelConfig {
            id,
            input: self.input.clone(),
            buffer: self.buffer.clone(),
            encode: self.encode.clone(),
        }]
    }

    /// Heartbeat interval (defaults to 10 s).
    pub fn heartbeat_interval(&self) -> Duration {
        if self.platform.heartbeat_secs > 0 {
            Duration::from_secs(self.platform.heartbeat_secs)
        } else {
            Duration::from_secs(10)
        }
    }
}

impl ChannelConfig {
    pub fn retention(&self) -> Duration {
        self.buffer.duration.unwrap_or(DEFAULT_RETENTION)
    }

    pub fn segment_size(&self) -> Duration {
        self.buffer.segment_size.unwrap_or(DEFAULT_SEGMENT_SIZE)
    }
}

/// Expand `$VAR` and `${VAR}` in the raw config text. Unset variables expand
/// to the empty string.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
                rest = &braced[end + 1..];
            } else {
                // Unterminated brace, leave as-is
                out.push('$');
                rest = after;
            }
            continue;
        }

        let len = after
            .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
            .unwrap_or(after.len());
        if len > 0 && !after.as_bytes()[0].is_ascii_digit() {
            out.push_str(&std::env::var(&after[..len]).unwrap_or_default());
            rest = &after[len..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

/// Parse a duration from an integer second count or a suffixed string like
/// "90s", "30m", "1h" or "1h30m".
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let unit = match c {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(value * unit);
    }
    if !number.is_empty() {
        // Trailing digits without a unit
        return None;
    }
    Some(total)
}

fn opt_duration<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(de)? {
        None => Ok(None),
        Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Raw::Text(text)) => parse_duration(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("2x"), None);
        assert_eq!(parse_duration("2s5"), None);
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("CAPTURE_TEST_URL", "rtsp://cam");
        assert_eq!(expand_env("url: $CAPTURE_TEST_URL"), "url: rtsp://cam");
        assert_eq!(expand_env("url: ${CAPTURE_TEST_URL}/x"), "url: rtsp://cam/x");
        assert_eq!(expand_env("a $CAPTURE_TEST_UNSET b"), "a  b");
        assert_eq!(expand_env("cost: $5"), "cost: $5");
        assert_eq!(expand_env("no dollars"), "no dollars");
    }

    #[test]
    fn test_single_channel_mode() {
        let yaml = r#"
input:
  type: rtsp
  device: rtsp://camera/stream
buffer:
  duration: 60s
  segment_size: 2s
  path: /tmp/buffer
"#;
        let cfg = CaptureConfig::parse(yaml).unwrap();
        assert!(!cfg.is_multi_channel());

        let channels = cfg.channel_configs();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "default");
        assert_eq!(channels[0].input.kind, "rtsp");
        assert_eq!(channels[0].retention(), Duration::from_secs(60));
        assert_eq!(channels[0].segment_size(), Duration::from_secs(2));
    }

    #[test]
    fn test_multi_channel_inherits_defaults() {
        let yaml = r#"
buffer:
  duration: 10m
  path: /data/capture
encode:
  codec: libx264
  bitrate: 8000
channels:
  - id: cam1
    input: {type: srt, device: "srt://0.0.0.0:9000"}
  - id: cam2
    input: {type: rtsp, device: "rtsp://cam2/stream"}
    buffer: {duration: 5m}
    encode: {bitrate: 4000, preset: ultrafast}
api:
  port: 9090
"#;
        let cfg = CaptureConfig::parse(yaml).unwrap();
        assert!(cfg.is_multi_channel());
        assert_eq!(cfg.api.port, 9090);

        let channels = cfg.channel_configs();
        assert_eq!(channels[0].retention(), Duration::from_secs(600));
        assert_eq!(channels[0].segment_size(), Duration::from_secs(2));
        assert_eq!(channels[0].encode.bitrate, 8000);
        assert_eq!(channels[0].encode.preset, "fast");
        // GOP stays 0: the encoder derives it from framerate x segment size
        assert_eq!(channels[0].encode.gop, 0);
        assert_eq!(channels[0].buffer.path, "/data/capture");

        assert_eq!(channels[1].retention(), Duration::from_secs(300));
        assert_eq!(channels[1].encode.bitrate, 4000);
        assert_eq!(channels[1].encode.preset, "ultrafast");
    }

    #[test]
    fn test_session_channel_id_names_single_channel() {
        let yaml = r#"
input: {type: file, device: /tmp/test.mp4}
session: {session_id: s1, channel_id: main-cam}
"#;
        let cfg = CaptureConfig::parse(yaml).unwrap();
        assert_eq!(cfg.channel_configs()[0].id, "main-cam");
    }

    #[test]
    fn test_duplicate_channel_ids_rejected() {
        let yaml = r#"
channels:
  - id: cam1
    input: {type: rtsp, device: "rtsp://a"}
  - id: cam1
    input: {type: rtsp, device: "rtsp://b"}
"#;
        assert!(matches!(
            CaptureConfig::parse(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_expansion_in_yaml() {
        std::env::set_var("CAPTURE_TEST_DEVICE", "rtsp://secret/stream");
        let yaml = "input: {type: rtsp, device: $CAPTURE_TEST_DEVICE}";
        let cfg = CaptureConfig::parse(yaml).unwrap();
        assert_eq!(cfg.input.device, "rtsp://secret/stream");
    }

    #[test]
    fn test_heartbeat_interval_default() {
        let cfg = CaptureConfig::parse("{}").unwrap();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(10));

        let cfg = CaptureConfig::parse("platform: {heartbeat_secs: 30}").unwrap();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
    }
}
