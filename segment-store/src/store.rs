use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::segment::{Segment, SegmentIndex};

const INDEX_FILE: &str = "index.json";
const INIT_SEGMENT_FILE: &str = "init.mp4";

/// Durable on-disk segment layout plus its in-memory index.
///
/// Owns the segment files under its directory and the `index.json` beside
/// them. Does no locking of its own; [`crate::RingBuffer`] wraps it behind a
/// reader-writer lock.
pub struct SegmentStore {
    channel_id: String,
    dir: PathBuf,
    retention: Duration,
    segment_duration: Duration,
    segments: BTreeMap<i64, Segment>,
    init_segment: Option<PathBuf>,
}

impl SegmentStore {
    /// Create the store, ensuring the segment and clips directories exist.
    pub fn new(
        channel_id: impl Into<String>,
        dir: impl Into<PathBuf>,
        retention: Duration,
        segment_duration: Duration,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(dir.join("clips"))?;

        Ok(Self {
            channel_id: channel_id.into(),
            dir,
            retention,
            segment_duration,
            segments: BTreeMap::new(),
            init_segment: None,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.dir.join("clips")
    }

    /// Insert a segment. Duplicate sequences keep the first admission and
    /// return false.
    pub fn append(&mut self, segment: Segment) -> bool {
        if self.segments.contains_key(&segment.sequence) {
            return false;
        }
        self.segments.insert(segment.sequence, segment);
        true
    }

    pub fn get(&self, sequence: i64) -> Option<&Segment> {
        self.segments.get(&sequence)
    }

    /// Segments with sequence in `[from, to]`, ascending.
    pub fn range(&self, from: i64, to: i64) -> Vec<Segment> {
        self.segments.range(from..=to).map(|(_, s)| s.clone()).collect()
    }

    /// Segments for an explicit sequence list, in list order, skipping holes.
    pub fn by_sequences(&self, sequences: &[i64]) -> Vec<Segment> {
        sequences
            .iter()
            .filter_map(|seq| self.segments.get(seq).cloned())
            .collect()
    }

    /// Every segment whose interval intersects `[start, end)`, by sequence
    /// ascending.
    pub fn range_by_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Segment> {
        self.segments
            .values()
            .filter(|seg| seg.overlaps(start, end))
            .cloned()
            .collect()
    }

    /// Delete every segment that ended before `cutoff`: backing file first,
    /// then the index entry. Returns the number of evicted segments.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<i64> = self
            .segments
            .values()
            .filter(|seg| seg.end_time() < cutoff)
            .map(|seg| seg.sequence)
            .collect();

        for seq in &expired {
            let seg = &self.segments[seq];
            if let Err(e) = std::fs::remove_file(&seg.file_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %seg.file_path.display(),
                        error = %e,
                        "failed to remove segment file"
                    );
                }
            }
            self.segments.remove(seq);
        }

        expired.len()
    }

    pub fn first_seq(&self) -> Option<i64> {
        self.segments.keys().next().copied()
    }

    pub fn last_seq(&self) -> Option<i64> {
        self.segments.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Buffer fullness in `[0, 1]`: held segments over the retention capacity.
    pub fn health(&self) -> f64 {
        let capacity =
            (self.retention.as_secs_f64() / self.segment_duration.as_secs_f64()).ceil();
        if capacity <= 0.0 {
            return 0.0;
        }
        (self.segments.len() as f64 / capacity).min(1.0)
    }

    pub fn set_init_segment(&mut self, path: PathBuf) {
        self.init_segment = Some(path);
    }

    pub fn init_segment(&self) -> Option<&Path> {
        self.init_segment.as_deref()
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Write the index as JSON, atomically (write-then-rename).
    pub fn persist_index(&self) -> Result<(), StoreError> {
        let index = SegmentIndex {
            channel_id: self.channel_id.clone(),
            init_segment: self.init_segment.clone(),
            first_seq: self.first_seq().unwrap_or(-1),
            last_seq: self.last_seq().unwrap_or(-1),
            updated_at: Utc::now(),
            segments: self.segments.values().cloned().collect(),
        };

        let data = serde_json::to_vec_pretty(&index)?;
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    /// Load the index written by a previous run.
    ///
    /// Entries whose backing file no longer exists are silently dropped. A
    /// missing index is not an error; an unparsable one is surfaced so the
    /// caller can log it (the index is rewritten on the next persist).
    /// Also picks up an `init.mp4` left on disk even when the index is gone.
    pub fn load_index(&mut self) -> Result<usize, StoreError> {
        let init_path = self.dir.join(INIT_SEGMENT_FILE);
        if init_path.is_file() {
            self.init_segment = Some(init_path);
        }

        let data = match std::fs::read(self.index_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let index: SegmentIndex = serde_json::from_slice(&data)?;

        if let Some(path) = index.init_segment {
            if path.is_file() {
                self.init_segment = Some(path);
            }
        }

        let mut loaded = 0;
        for segment in index.segments {
            if !segment.file_path.is_file() {
                continue;
            }
            if self.append(segment) {
                loaded += 1;
            }
        }

        Ok(loaded)
    }
}
