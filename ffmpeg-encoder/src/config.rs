use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one encoder run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Input source: device identifier or URL (file path, rtsp://, srt://, ...)
    pub input: String,
    /// Forced input format (`-f`), e.g. "v4l2", "avfoundation", "dshow".
    /// None lets ffmpeg auto-detect from the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,

    /// Video codec (default: "libx264")
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Encoder preset (default: "fast")
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Target bitrate in kbps (0 = source bitrate)
    #[serde(default)]
    pub bitrate_kbps: u32,
    /// Output width (0 = source)
    #[serde(default)]
    pub width: u32,
    /// Output height (0 = source)
    #[serde(default)]
    pub height: u32,
    /// Source framerate (0 = unknown; probed or assumed 30 for GOP sizing)
    #[serde(default)]
    pub framerate: u32,
    /// Keyframe interval in frames (0 = derived from framerate x segment duration)
    #[serde(default)]
    pub gop: u32,
    /// B-frame count (None = encoder default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bframes: Option<u32>,

    /// Duration of each segment in seconds (default: 2.0)
    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,

    /// Directory the init segment and media segments are written into
    pub output_dir: PathBuf,
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_segment_duration() -> f64 {
    2.0
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            input_format: None,
            codec: default_codec(),
            preset: default_preset(),
            bitrate_kbps: 0,
            width: 0,
            height: 0,
            framerate: 0,
            gop: 0,
            bframes: None,
            segment_duration: default_segment_duration(),
            output_dir: PathBuf::new(),
        }
    }
}

impl EncoderConfig {
    /// Effective keyframe interval in frames.
    ///
    /// A fixed GOP equal to one segment of frames guarantees every media
    /// segment starts with an independently decodable frame.
    pub fn effective_gop(&self, probed_framerate: Option<f64>) -> u32 {
        if self.gop > 0 {
            return self.gop;
        }
        let framerate = if self.framerate > 0 {
            self.framerate as f64
        } else {
            probed_framerate.unwrap_or(30.0)
        };
        (framerate * self.segment_duration).round() as u32
    }

    /// Build the ffmpeg argument list for CMAF segment output.
    pub fn build_args(&self, probed_framerate: Option<f64>) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];

        // Input
        if let Some(fmt) = &self.input_format {
            args.push("-f".into());
            args.push(fmt.clone());
        }
        args.push("-i".into());
        args.push(self.input.clone());

        // Video encoding
        args.push("-c:v".into());
        args.push(self.codec.clone());
        args.push("-preset".into());
        args.push(self.preset.clone());

        if self.bitrate_kbps > 0 {
            args.push("-b:v".into());
            args.push(format!("{}k", self.bitrate_kbps));
        }

        let gop = self.effective_gop(probed_framerate);
        args.push("-g".into());
        args.push(gop.to_string());
        args.push("-keyint_min".into());
        args.push(gop.to_string());
        // Scene-change keyframes would break the fixed segment cadence
        args.push("-sc_threshold".into());
        args.push("0".into());

        if let Some(bframes) = self.bframes {
            args.push("-bf".into());
            args.push(bframes.to_string());
        }

        if self.width > 0 && self.height > 0 {
            args.push("-vf".into());
            args.push(format!("scale={}:{}", self.width, self.height));
        }

        // Audio pass-through as AAC
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-b:a".into());
        args.push("128k".into());

        // CMAF/fMP4 output via the DASH muxer
        let seg_duration = format!("{:.1}", self.segment_duration);
        for arg in [
            "-f",
            "dash",
            "-seg_duration",
            seg_duration.as_str(),
            "-init_seg_name",
            "init.mp4",
            "-media_seg_name",
            "segment_$Number%05d$.m4s",
            "-use_template",
            "1",
            "-use_timeline",
            "0",
            "-hls_playlist",
            "1",
            "-streaming",
            "1",
            "-remove_at_exit",
            "0",
        ] {
            args.push(arg.to_string());
        }

        args.push(
            self.output_dir
                .join("manifest.mpd")
                .to_string_lossy()
                .to_string(),
        );

        args
    }
}
