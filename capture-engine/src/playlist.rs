//! Live HLS playlist rendering.
//!
//! A thin text rendering of the buffer's current `[first_seq, last_seq]`
//! range: fMP4 playlist with `EXT-X-MAP` pointing at `init.mp4` and one
//! `EXTINF` entry per held segment. No sliding-window bookkeeping; clients
//! that request a just-evicted segment get a 404 from the file server.

use std::fmt::Write;
use std::time::Duration;

use segment_store::Segment;

/// Render the live playlist over the held segments (sequence ascending).
pub fn render_live_playlist(segments: &[Segment], segment_duration: Duration) -> String {
    let target_duration = segment_duration.as_secs_f64().ceil() as u64 + 1;
    let media_sequence = segments.first().map(|s| s.sequence).unwrap_or(0);

    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:7\n");
    let _ = writeln!(playlist, "#EXT-X-TARGETDURATION:{target_duration}");
    let _ = writeln!(playlist, "#EXT-X-MEDIA-SEQUENCE:{media_sequence}");
    playlist.push_str("#EXT-X-MAP:URI=\"init.mp4\"\n");

    for segment in segments {
        let _ = writeln!(playlist, "#EXTINF:{:.3},", segment.duration.as_secs_f64());
        let _ = writeln!(playlist, "segment_{:05}.m4s", segment.sequence);
    }

    playlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn segment(seq: i64) -> Segment {
        Segment {
            sequence: seq,
            file_path: PathBuf::from(format!("/data/segment_{seq:05}.m4s")),
            start_time: Utc::now(),
            duration: Duration::from_secs(2),
            size_bytes: 1,
        }
    }

    #[test]
    fn test_live_playlist_shape() {
        let playlist = render_live_playlist(&[segment(3), segment(4), segment(5)],
            Duration::from_secs(2));

        assert!(playlist.starts_with("#EXTM3U\n#EXT-X-VERSION:7\n"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:3\n"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:3\n"));
        assert!(playlist.contains("#EXT-X-MAP:URI=\"init.mp4\"\n"));
        assert!(playlist.contains("#EXTINF:2.000,\nsegment_00003.m4s\n"));
        assert!(playlist.contains("segment_00005.m4s\n"));
        // Live playlist: no end marker
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_fractional_segment_duration_rounds_up() {
        let playlist = render_live_playlist(&[segment(0)], Duration::from_millis(2500));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:4\n"));
    }
}
