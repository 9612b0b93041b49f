use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single CMAF media segment held by the ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Monotonically increasing, dense within one capture run.
    pub sequence: i64,
    /// Absolute path to the self-contained media fragment.
    pub file_path: PathBuf,
    /// Approximate wall-clock instant the segment began.
    pub start_time: DateTime<Utc>,
    /// Segment duration.
    #[serde(rename = "duration_ns", with = "duration_ns")]
    pub duration: Duration,
    /// File size at admission time.
    pub size_bytes: u64,
}

impl Segment {
    /// Wall-clock end of the segment's interval.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            + chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// True when `[start_time, end_time)` intersects `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time() > start
    }
}

/// On-disk index format (`index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub channel_id: String,
    #[serde(default)]
    pub init_segment: Option<PathBuf>,
    pub first_seq: i64,
    pub last_seq: i64,
    pub updated_at: DateTime<Utc>,
    pub segments: Vec<Segment>,
}

/// Serialize a `std::time::Duration` as integer nanoseconds.
mod duration_ns {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ns = u64::deserialize(de)?;
        Ok(Duration::from_nanos(ns))
    }
}
