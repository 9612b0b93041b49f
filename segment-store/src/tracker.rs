use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Sequence sentinel for a boundary opened against an empty buffer.
pub const NO_START_SEQ: i64 = -1;

#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("boundary already open: {0}")]
    Duplicate(String),

    #[error("boundary not found: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone)]
struct OpenBoundary {
    started_at: DateTime<Utc>,
    start_seq: i64,
    segments: Vec<i64>,
}

/// Snapshot returned when a boundary is closed.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedBoundary {
    pub clip_id: String,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub start_seq: i64,
    pub segments: Vec<i64>,
}

/// Tracks the set of open in-progress clip boundaries for one channel.
///
/// Every admission is recorded against every open boundary, so closing a
/// boundary yields exactly the sequences observed during its open interval.
#[derive(Default)]
pub struct BoundaryTracker {
    open: Mutex<HashMap<String, OpenBoundary>>,
}

impl BoundaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a boundary. `start_seq` is the buffer's last sequence at open
    /// time, or [`NO_START_SEQ`] when the buffer is empty.
    pub fn open(&self, clip_id: &str, start_seq: i64) -> Result<(), BoundaryError> {
        let mut open = self.open.lock().unwrap();
        if open.contains_key(clip_id) {
            return Err(BoundaryError::Duplicate(clip_id.to_string()));
        }
        open.insert(
            clip_id.to_string(),
            OpenBoundary {
                started_at: Utc::now(),
                start_seq,
                segments: Vec::new(),
            },
        );
        tracing::info!(clip_id, start_seq, "boundary opened");
        Ok(())
    }

    /// Close a boundary, removing it and returning its snapshot.
    pub fn close(&self, clip_id: &str) -> Result<ClosedBoundary, BoundaryError> {
        let mut open = self.open.lock().unwrap();
        let boundary = open
            .remove(clip_id)
            .ok_or_else(|| BoundaryError::Unknown(clip_id.to_string()))?;

        tracing::info!(clip_id, segments = boundary.segments.len(), "boundary closed");
        Ok(ClosedBoundary {
            clip_id: clip_id.to_string(),
            started_at: boundary.started_at,
            closed_at: Utc::now(),
            start_seq: boundary.start_seq,
            segments: boundary.segments,
        })
    }

    /// Record an admitted sequence against every open boundary. Returns the
    /// IDs of the boundaries that captured it.
    pub fn record(&self, sequence: i64) -> Vec<String> {
        let mut open = self.open.lock().unwrap();
        let mut captured = Vec::with_capacity(open.len());
        for (clip_id, boundary) in open.iter_mut() {
            boundary.segments.push(sequence);
            captured.push(clip_id.clone());
        }
        captured
    }

    /// IDs of currently open boundaries.
    pub fn active(&self) -> Vec<String> {
        self.open.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_captures_sequences() {
        let tracker = BoundaryTracker::new();
        tracker.open("p1", 9).unwrap();

        tracker.record(10);
        tracker.record(11);

        let closed = tracker.close("p1").unwrap();
        assert_eq!(closed.clip_id, "p1");
        assert_eq!(closed.start_seq, 9);
        assert_eq!(closed.segments, vec![10, 11]);
        assert!(closed.closed_at >= closed.started_at);
    }

    #[test]
    fn test_duplicate_open_fails() {
        let tracker = BoundaryTracker::new();
        tracker.open("p1", NO_START_SEQ).unwrap();
        assert!(matches!(
            tracker.open("p1", NO_START_SEQ),
            Err(BoundaryError::Duplicate(_))
        ));
        // Still open; a record lands in it
        tracker.record(0);
        assert_eq!(tracker.close("p1").unwrap().segments, vec![0]);
    }

    #[test]
    fn test_close_unknown_fails() {
        let tracker = BoundaryTracker::new();
        assert!(matches!(tracker.close("nope"), Err(BoundaryError::Unknown(_))));

        // Closing twice: second close is unknown
        tracker.open("p1", NO_START_SEQ).unwrap();
        tracker.close("p1").unwrap();
        assert!(matches!(tracker.close("p1"), Err(BoundaryError::Unknown(_))));
    }

    #[test]
    fn test_overlapping_boundaries() {
        let tracker = BoundaryTracker::new();
        tracker.open("p1", NO_START_SEQ).unwrap();
        tracker.record(1);
        tracker.record(2);

        tracker.open("p2", 2).unwrap();
        let captured = tracker.record(3);
        assert_eq!(captured.len(), 2);

        let p2 = tracker.close("p2").unwrap();
        assert_eq!(p2.segments, vec![3]);

        tracker.record(4);
        let p1 = tracker.close("p1").unwrap();
        assert_eq!(p1.segments, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_active_lists_open_ids() {
        let tracker = BoundaryTracker::new();
        assert!(tracker.active().is_empty());
        tracker.open("a", NO_START_SEQ).unwrap();
        tracker.open("b", NO_START_SEQ).unwrap();
        let mut active = tracker.active();
        active.sort();
        assert_eq!(active, vec!["a", "b"]);
    }
}
