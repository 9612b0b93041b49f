use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;

use segment_store::Segment;

use crate::error::ClipError;

/// Trims below this threshold are absorbed by segment-time approximation and
/// skipped.
const TRIM_THRESHOLD_SECS: f64 = 0.1;

/// Result of a finished clip build.
#[derive(Debug, Clone, Serialize)]
pub struct ClipResult {
    pub file_path: PathBuf,
    /// Covered duration in seconds.
    pub duration: f64,
    pub file_size_bytes: u64,
    pub segment_count: usize,
}

/// Builds clips for one channel.
///
/// Holds an internal lock so concurrent requests against the same channel
/// queue up instead of colliding on intermediate files.
pub struct ClipBuilder {
    ffmpeg: PathBuf,
    clips_dir: PathBuf,
    build_lock: tokio::sync::Mutex<()>,
}

impl ClipBuilder {
    pub fn new(ffmpeg: impl Into<PathBuf>, clips_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            clips_dir: clips_dir.into(),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a clip covering the wall-clock window `[start, end)`.
    ///
    /// `segments` must be the time-range lookup result for that window. The
    /// clip is trimmed at head and tail when the window cuts more than 100 ms
    /// into the first or last segment.
    pub async fn build_for_window(
        &self,
        clip_id: &str,
        init_segment: Option<&Path>,
        segments: &[Segment],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ClipResult, ClipError> {
        if segments.is_empty() {
            return Err(ClipError::NoData);
        }

        let (trim_head, trim_tail) = compute_trims(segments, start, end);
        let duration = (end - start).num_milliseconds() as f64 / 1000.0;

        self.build(clip_id, init_segment, segments, trim_head, trim_tail, duration)
            .await
    }

    /// Build a clip from an explicit segment list, untrimmed.
    pub async fn build_from_segments(
        &self,
        clip_id: &str,
        init_segment: Option<&Path>,
        segments: &[Segment],
    ) -> Result<ClipResult, ClipError> {
        if segments.is_empty() {
            return Err(ClipError::NoData);
        }
        let duration: f64 = segments.iter().map(|s| s.duration.as_secs_f64()).sum();
        self.build(clip_id, init_segment, segments, 0.0, 0.0, duration)
            .await
    }

    async fn build(
        &self,
        clip_id: &str,
        init_segment: Option<&Path>,
        segments: &[Segment],
        trim_head: f64,
        trim_tail: f64,
        duration: f64,
    ) -> Result<ClipResult, ClipError> {
        validate_clip_id(clip_id)?;
        let _guard = self.build_lock.lock().await;

        tokio::fs::create_dir_all(&self.clips_dir).await?;

        let final_path = self.clips_dir.join(format!("{clip_id}.mp4"));
        let concat_path = self.clips_dir.join(format!("{clip_id}.building.mp4"));
        let trim_path = self.clips_dir.join(format!("{clip_id}.trimmed.mp4"));

        // Leftovers from a cancelled build
        let _ = tokio::fs::remove_file(&concat_path).await;
        let _ = tokio::fs::remove_file(&trim_path).await;

        let result = self
            .build_inner(
                init_segment,
                segments,
                trim_head,
                trim_tail,
                duration,
                &final_path,
                &concat_path,
                &trim_path,
            )
            .await;

        let _ = tokio::fs::remove_file(&concat_path).await;
        let _ = tokio::fs::remove_file(&trim_path).await;

        match result {
            Ok(file_size_bytes) => Ok(ClipResult {
                file_path: final_path,
                duration,
                file_size_bytes,
                segment_count: segments.len(),
            }),
            Err(e) => {
                let _ = tokio::fs::remove_file(&final_path).await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_inner(
        &self,
        init_segment: Option<&Path>,
        segments: &[Segment],
        trim_head: f64,
        trim_tail: f64,
        duration: f64,
        final_path: &Path,
        concat_path: &Path,
        trim_path: &Path,
    ) -> Result<u64, ClipError> {
        let list = write_concat_list(&self.clips_dir, init_segment, segments)?;

        self.run_ffmpeg(&[
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.path().to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            concat_path.to_string_lossy().into_owned(),
        ])
        .await?;

        let finished = if trim_head > TRIM_THRESHOLD_SECS || trim_tail > TRIM_THRESHOLD_SECS {
            tracing::debug!(trim_head, trim_tail, "trimming clip to requested window");
            self.run_ffmpeg(&[
                "-y".into(),
                "-ss".into(),
                format!("{trim_head:.3}"),
                "-i".into(),
                concat_path.to_string_lossy().into_owned(),
                "-t".into(),
                format!("{duration:.3}"),
                "-c".into(),
                "copy".into(),
                trim_path.to_string_lossy().into_owned(),
            ])
            .await?;
            trim_path
        } else {
            concat_path
        };

        tokio::fs::rename(finished, final_path).await?;

        let meta = tokio::fs::metadata(final_path).await?;
        Ok(meta.len())
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), ClipError> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClipError::Ffmpeg(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ClipError::Ffmpeg(format!(
                "ffmpeg exited with {}: {}",
                output.status, tail
            )));
        }

        Ok(())
    }
}

/// Write the concat demuxer list: init segment first, then each media
/// segment in order.
fn write_concat_list(
    dir: &Path,
    init_segment: Option<&Path>,
    segments: &[Segment],
) -> Result<tempfile::NamedTempFile, ClipError> {
    let mut list = tempfile::Builder::new()
        .prefix("concat_")
        .suffix(".txt")
        .tempfile_in(dir)?;

    if let Some(init) = init_segment {
        writeln!(list, "file '{}'", init.display())?;
    }
    for segment in segments {
        writeln!(list, "file '{}'", segment.file_path.display())?;
    }
    list.flush()?;

    Ok(list)
}

/// Seconds cut from the first segment's head and the last segment's tail to
/// reduce the concatenation to the requested window.
fn compute_trims(
    segments: &[Segment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (f64, f64) {
    let first = &segments[0];
    let last = &segments[segments.len() - 1];
    let trim_head = (start - first.start_time).num_milliseconds().max(0) as f64 / 1000.0;
    let trim_tail = (last.end_time() - end).num_milliseconds().max(0) as f64 / 1000.0;
    (trim_head, trim_tail)
}

/// Clip IDs become filenames; keep them to a safe charset.
fn validate_clip_id(clip_id: &str) -> Result<(), ClipError> {
    let ok = !clip_id.is_empty()
        && clip_id.len() <= 64
        && clip_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ClipError::InvalidClipId(clip_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fake_segment(dir: &Path, seq: i64, start: DateTime<Utc>) -> Segment {
        let path = dir.join(format!("segment_{seq:05}.m4s"));
        std::fs::write(&path, b"not-really-mp4").unwrap();
        Segment {
            sequence: seq,
            file_path: path,
            start_time: start,
            duration: Duration::from_secs(2),
            size_bytes: 14,
        }
    }

    #[test]
    fn test_validate_clip_id() {
        assert!(validate_clip_id("play-42_a").is_ok());
        assert!(validate_clip_id("").is_err());
        assert!(validate_clip_id("../escape").is_err());
        assert!(validate_clip_id("a/b").is_err());
        assert!(validate_clip_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_concat_list_contents() {
        let dir = TempDir::new().unwrap();
        let base = Utc::now();
        let segments = vec![
            fake_segment(dir.path(), 1, base),
            fake_segment(dir.path(), 2, base + chrono::Duration::seconds(2)),
        ];
        let init = dir.path().join("init.mp4");
        std::fs::write(&init, b"init").unwrap();

        let list = write_concat_list(dir.path(), Some(&init), &segments).unwrap();
        let contents = std::fs::read_to_string(list.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("init.mp4"));
        assert!(lines[1].contains("segment_00001.m4s"));
        assert!(lines[2].contains("segment_00002.m4s"));
        assert!(lines.iter().all(|l| l.starts_with("file '")));
    }

    #[tokio::test]
    async fn test_empty_segment_list_is_no_data() {
        let dir = TempDir::new().unwrap();
        let builder = ClipBuilder::new("/usr/bin/ffmpeg", dir.path().join("clips"));
        let err = builder
            .build_from_segments("clip1", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClipError::NoData));
    }

    #[tokio::test]
    async fn test_failed_build_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let clips = dir.path().join("clips");
        // Nonexistent ffmpeg: the build must fail without leaving any file
        let builder = ClipBuilder::new("/nonexistent/ffmpeg", &clips);

        let base = Utc::now();
        let segments = vec![fake_segment(dir.path(), 1, base)];
        let err = builder
            .build_from_segments("clip1", None, &segments)
            .await
            .unwrap_err();
        assert!(matches!(err, ClipError::Ffmpeg(_)));

        assert!(!clips.join("clip1.mp4").exists());
        assert!(!clips.join("clip1.building.mp4").exists());
        assert!(!clips.join("clip1.trimmed.mp4").exists());
    }

    #[test]
    fn test_compute_trims() {
        let base = Utc::now();
        let dir = TempDir::new().unwrap();
        let segments = vec![
            fake_segment(dir.path(), 1, base),
            fake_segment(dir.path(), 2, base + chrono::Duration::seconds(2)),
        ];

        // Window cuts 0.5 s into the first segment, 0.7 s off the last
        let start = base + chrono::Duration::milliseconds(500);
        let end = base + chrono::Duration::milliseconds(3300);
        let (head, tail) = compute_trims(&segments, start, end);
        assert!((head - 0.5).abs() < 1e-9);
        assert!((tail - 0.7).abs() < 1e-9);

        // Window wider than the segments trims nothing
        let (head, tail) = compute_trims(
            &segments,
            base - chrono::Duration::seconds(1),
            base + chrono::Duration::seconds(10),
        );
        assert_eq!(head, 0.0);
        assert_eq!(tail, 0.0);
    }
}
