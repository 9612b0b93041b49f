//! Segment detection.
//!
//! ffmpeg communicates completed segments solely through filesystem
//! side-effects: the watcher polls the output directory, picks up
//! `segment_NNNNN.m4s` files it has not seen before and reports them once
//! they are non-empty.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::encoder::SegmentInfo;

/// Parse the sequence number out of a `segment_NNNNN.m4s` filename.
pub fn parse_sequence(file_name: &str) -> Option<i64> {
    let digits = file_name
        .strip_prefix("segment_")?
        .strip_suffix(".m4s")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One poll of the output directory.
///
/// Returns new, non-empty segments in sequence order. `StartTime` is derived
/// as `run_started + sequence x segment_duration`; consumers treat it as
/// approximate.
pub fn scan_new_segments(
    dir: &Path,
    seen: &mut HashSet<PathBuf>,
    run_started: DateTime<Utc>,
    segment_duration: std::time::Duration,
) -> Vec<SegmentInfo> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut found = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if seen.contains(&path) {
            continue;
        }

        let Some(sequence) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_sequence)
        else {
            continue;
        };

        // Zero-size means ffmpeg is still writing it; pick it up next tick
        let size = match entry.metadata() {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => continue,
        };

        seen.insert(path.clone());

        let offset = segment_duration
            .checked_mul(sequence.max(0) as u32)
            .unwrap_or_default();
        found.push(SegmentInfo {
            sequence,
            path,
            start_time: run_started
                + ChronoDuration::from_std(offset).unwrap_or_else(|_| ChronoDuration::zero()),
            duration: segment_duration,
            size,
        });
    }

    found.sort_by_key(|info| info.sequence);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("segment_00001.m4s"), Some(1));
        assert_eq!(parse_sequence("segment_00042.m4s"), Some(42));
        assert_eq!(parse_sequence("segment_12345678.m4s"), Some(12345678));
        assert_eq!(parse_sequence("init.mp4"), None);
        assert_eq!(parse_sequence("segment_.m4s"), None);
        assert_eq!(parse_sequence("segment_abc.m4s"), None);
        assert_eq!(parse_sequence("segment_00001.mp4"), None);
    }

    #[test]
    fn test_scan_picks_up_new_segments_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("segment_00002.m4s"), b"bb").unwrap();
        std::fs::write(dir.path().join("segment_00001.m4s"), b"aa").unwrap();
        std::fs::write(dir.path().join("init.mp4"), b"init").unwrap();
        std::fs::write(dir.path().join("manifest.mpd"), b"<MPD/>").unwrap();

        let started = Utc::now();
        let mut seen = HashSet::new();
        let found = scan_new_segments(dir.path(), &mut seen, started, Duration::from_secs(2));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sequence, 1);
        assert_eq!(found[1].sequence, 2);
        assert_eq!(found[0].start_time, started + ChronoDuration::seconds(2));
        assert_eq!(found[1].start_time, started + ChronoDuration::seconds(4));
        assert_eq!(found[0].size, 2);

        // Second scan reports nothing new
        let again = scan_new_segments(dir.path(), &mut seen, started, Duration::from_secs(2));
        assert!(again.is_empty());
    }

    #[test]
    fn test_scan_skips_empty_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("segment_00001.m4s"), b"").unwrap();

        let mut seen = HashSet::new();
        let found =
            scan_new_segments(dir.path(), &mut seen, Utc::now(), Duration::from_secs(2));
        assert!(found.is_empty());

        // Once the file has content it is reported
        std::fs::write(dir.path().join("segment_00001.m4s"), b"data").unwrap();
        let found =
            scan_new_segments(dir.path(), &mut seen, Utc::now(), Duration::from_secs(2));
        assert_eq!(found.len(), 1);
    }
}
