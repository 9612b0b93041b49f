use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::segment::Segment;
use crate::store::SegmentStore;
use crate::tracker::{BoundaryError, BoundaryTracker, ClosedBoundary, NO_START_SEQ};

type SegmentCallback = Box<dyn Fn(&Segment) + Send + Sync>;
type BoundaryCallback = Box<dyn Fn(&str, &Segment) + Send + Sync>;

/// Ring buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub channel_id: String,
    /// Directory holding init.mp4, media segments, index.json and clips/.
    pub dir: PathBuf,
    /// How long segments are retained.
    pub retention: Duration,
    /// Nominal duration of one segment.
    pub segment_duration: Duration,
    /// How often expired segments are evicted.
    pub eviction_interval: Duration,
    /// Persist the index every Nth admission.
    pub persist_every: u64,
}

impl BufferConfig {
    pub fn new(
        channel_id: impl Into<String>,
        dir: impl Into<PathBuf>,
        retention: Duration,
        segment_duration: Duration,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            dir: dir.into(),
            retention,
            segment_duration,
            eviction_interval: Duration::from_secs(10),
            persist_every: 10,
        }
    }
}

/// Consistent snapshot of the buffer, taken under a read lock.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    pub channel_id: String,
    pub health: f64,
    pub first_seq: i64,
    pub last_seq: i64,
    pub segment_count: usize,
    /// Unix milliseconds of the oldest segment start (0 when empty).
    pub oldest_time: i64,
    /// Unix milliseconds of the newest segment start (0 when empty).
    pub newest_time: i64,
    pub init_segment: Option<PathBuf>,
}

/// Concurrency wrapper around [`SegmentStore`].
///
/// Adds the reader-writer lock, admission callbacks, open-boundary fan-out,
/// the periodic eviction loop and opportunistic index persistence.
pub struct RingBuffer {
    cfg: BufferConfig,
    store: RwLock<SegmentStore>,
    tracker: BoundaryTracker,
    on_segment: Mutex<Option<SegmentCallback>>,
    on_boundary_segment: Mutex<Option<BoundaryCallback>>,
    admissions: AtomicU64,
    eviction_task: Mutex<Option<JoinHandle<()>>>,
}

impl RingBuffer {
    pub fn new(cfg: BufferConfig) -> Result<Self, StoreError> {
        let store = SegmentStore::new(
            cfg.channel_id.clone(),
            cfg.dir.clone(),
            cfg.retention,
            cfg.segment_duration,
        )?;
        Ok(Self {
            cfg,
            store: RwLock::new(store),
            tracker: BoundaryTracker::new(),
            on_segment: Mutex::new(None),
            on_boundary_segment: Mutex::new(None),
            admissions: AtomicU64::new(0),
            eviction_task: Mutex::new(None),
        })
    }

    /// Callback fired once per admitted segment.
    pub fn on_segment<F>(&self, callback: F)
    where
        F: Fn(&Segment) + Send + Sync + 'static,
    {
        *self.on_segment.lock().unwrap() = Some(Box::new(callback));
    }

    /// Callback fired once per open boundary per admitted segment.
    pub fn on_boundary_segment<F>(&self, callback: F)
    where
        F: Fn(&str, &Segment) + Send + Sync + 'static,
    {
        *self.on_boundary_segment.lock().unwrap() = Some(Box::new(callback));
    }

    /// Load any surviving index from disk and start the eviction loop.
    pub fn start(self: &Arc<Self>) {
        match self.store.write().unwrap().load_index() {
            Ok(0) => {}
            Ok(loaded) => {
                tracing::info!(
                    channel = %self.cfg.channel_id,
                    loaded,
                    "recovered segments from index"
                );
            }
            Err(e) => {
                tracing::warn!(
                    channel = %self.cfg.channel_id,
                    error = %e,
                    "segment index unreadable, starting empty"
                );
            }
        }

        let buffer = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(buffer.cfg.eviction_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            interval.tick().await;
            loop {
                interval.tick().await;
                buffer.evict_expired();
            }
        });
        *self.eviction_task.lock().unwrap() = Some(task);

        tracing::info!(
            channel = %self.cfg.channel_id,
            dir = %self.cfg.dir.display(),
            retention = ?self.cfg.retention,
            segment = ?self.cfg.segment_duration,
            "ring buffer started"
        );
    }

    /// Stop the eviction loop and persist the index.
    pub fn stop(&self) {
        if let Some(task) = self.eviction_task.lock().unwrap().take() {
            task.abort();
        }
        if let Err(e) = self.store.read().unwrap().persist_index() {
            tracing::warn!(channel = %self.cfg.channel_id, error = %e, "failed to persist index");
        }
        tracing::info!(channel = %self.cfg.channel_id, "ring buffer stopped");
    }

    /// Admit a segment: insert, fire callbacks, fan out to open boundaries.
    ///
    /// Admissions for one channel arrive from a single watcher task, so the
    /// fan-out for an admission completes before the next one begins.
    pub fn add_segment(&self, segment: Segment) {
        {
            let mut store = self.store.write().unwrap();
            if !store.append(segment.clone()) {
                return;
            }
        }

        if let Some(callback) = &*self.on_segment.lock().unwrap() {
            callback(&segment);
        }

        for clip_id in self.tracker.record(segment.sequence) {
            if let Some(callback) = &*self.on_boundary_segment.lock().unwrap() {
                callback(&clip_id, &segment);
            }
        }

        let admitted = self.admissions.fetch_add(1, Ordering::SeqCst) + 1;
        if admitted % self.cfg.persist_every == 0 {
            if let Err(e) = self.store.read().unwrap().persist_index() {
                tracing::warn!(
                    channel = %self.cfg.channel_id,
                    error = %e,
                    "failed to persist index"
                );
            }
        }
    }

    /// Open an in-progress clip boundary anchored at the current last
    /// sequence.
    pub fn open_boundary(&self, clip_id: &str) -> Result<(), BoundaryError> {
        let start_seq = self.store.read().unwrap().last_seq().unwrap_or(NO_START_SEQ);
        self.tracker.open(clip_id, start_seq)
    }

    /// Close an in-progress clip boundary and return its captured sequences.
    pub fn close_boundary(&self, clip_id: &str) -> Result<ClosedBoundary, BoundaryError> {
        self.tracker.close(clip_id)
    }

    /// IDs of currently open boundaries.
    pub fn active_boundaries(&self) -> Vec<String> {
        self.tracker.active()
    }

    pub fn status(&self) -> BufferStatus {
        let store = self.store.read().unwrap();

        let oldest_time = store
            .first_seq()
            .and_then(|seq| store.get(seq))
            .map(|seg| seg.start_time.timestamp_millis())
            .unwrap_or(0);
        let newest_time = store
            .last_seq()
            .and_then(|seq| store.get(seq))
            .map(|seg| seg.start_time.timestamp_millis())
            .unwrap_or(0);

        BufferStatus {
            channel_id: self.cfg.channel_id.clone(),
            health: store.health(),
            first_seq: store.first_seq().unwrap_or(NO_START_SEQ),
            last_seq: store.last_seq().unwrap_or(NO_START_SEQ),
            segment_count: store.len(),
            oldest_time,
            newest_time,
            init_segment: store.init_segment().map(Path::to_path_buf),
        }
    }

    pub fn segment(&self, sequence: i64) -> Option<Segment> {
        self.store.read().unwrap().get(sequence).cloned()
    }

    /// All held segments in sequence order.
    pub fn segments(&self) -> Vec<Segment> {
        let store = self.store.read().unwrap();
        match (store.first_seq(), store.last_seq()) {
            (Some(first), Some(last)) => store.range(first, last),
            _ => Vec::new(),
        }
    }

    /// Segments intersecting the wall-clock window `[start, end)`.
    pub fn segments_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Segment> {
        self.store.read().unwrap().range_by_time(start, end)
    }

    /// Segments for an explicit sequence list (holes skipped).
    pub fn segments_by_sequence(&self, sequences: &[i64]) -> Vec<Segment> {
        self.store.read().unwrap().by_sequences(sequences)
    }

    pub fn set_init_segment(&self, path: PathBuf) {
        self.store.write().unwrap().set_init_segment(path);
    }

    pub fn init_segment(&self) -> Option<PathBuf> {
        self.store.read().unwrap().init_segment().map(Path::to_path_buf)
    }

    pub fn dir(&self) -> &Path {
        &self.cfg.dir
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.cfg.dir.join("clips")
    }

    pub fn segment_duration(&self) -> Duration {
        self.cfg.segment_duration
    }

    fn evict_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.cfg.retention)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let removed = self.store.write().unwrap().evict_older_than(cutoff);
        if removed > 0 {
            tracing::debug!(
                channel = %self.cfg.channel_id,
                removed,
                "evicted expired segments"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn make_buffer(dir: &Path) -> Arc<RingBuffer> {
        let cfg = BufferConfig::new(
            "cam1",
            dir,
            Duration::from_secs(60),
            Duration::from_secs(2),
        );
        Arc::new(RingBuffer::new(cfg).unwrap())
    }

    fn segment_on_disk(dir: &Path, seq: i64, start: DateTime<Utc>) -> Segment {
        let path = dir.join(format!("segment_{seq:05}.m4s"));
        std::fs::write(&path, b"data").unwrap();
        Segment {
            sequence: seq,
            file_path: path,
            start_time: start,
            duration: Duration::from_secs(2),
            size_bytes: 4,
        }
    }

    #[test]
    fn test_admission_fires_callback_once() {
        let dir = TempDir::new().unwrap();
        let buffer = make_buffer(dir.path());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        buffer.on_segment(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let seg = segment_on_disk(dir.path(), 0, Utc::now());
        buffer.add_segment(seg.clone());
        // Duplicate admission is ignored and fires nothing
        buffer.add_segment(seg);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.status().segment_count, 1);
    }

    #[test]
    fn test_boundary_fan_out() {
        let dir = TempDir::new().unwrap();
        let buffer = make_buffer(dir.path());

        let seen: Arc<Mutex<Vec<(String, i64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        buffer.on_boundary_segment(move |clip_id, seg| {
            sink.lock().unwrap().push((clip_id.to_string(), seg.sequence));
        });

        let base = Utc::now();
        buffer.add_segment(segment_on_disk(dir.path(), 0, base));

        buffer.open_boundary("p1").unwrap();
        buffer.add_segment(segment_on_disk(dir.path(), 1, base + chrono::Duration::seconds(2)));
        buffer.add_segment(segment_on_disk(dir.path(), 2, base + chrono::Duration::seconds(4)));

        let closed = buffer.close_boundary("p1").unwrap();
        assert_eq!(closed.start_seq, 0);
        assert_eq!(closed.segments, vec![1, 2]);

        // Segment admitted after close is not tagged
        buffer.add_segment(segment_on_disk(dir.path(), 3, base + chrono::Duration::seconds(6)));

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("p1".to_string(), 1), ("p1".to_string(), 2)]);
    }

    #[test]
    fn test_open_boundary_on_empty_buffer_uses_sentinel() {
        let dir = TempDir::new().unwrap();
        let buffer = make_buffer(dir.path());
        buffer.open_boundary("p1").unwrap();
        assert_eq!(buffer.close_boundary("p1").unwrap().start_seq, NO_START_SEQ);
    }

    #[test]
    fn test_status_snapshot() {
        let dir = TempDir::new().unwrap();
        let buffer = make_buffer(dir.path());

        let status = buffer.status();
        assert_eq!(status.first_seq, -1);
        assert_eq!(status.last_seq, -1);
        assert_eq!(status.segment_count, 0);
        assert_eq!(status.oldest_time, 0);

        let base = Utc::now();
        for seq in 5..8 {
            buffer.add_segment(segment_on_disk(
                dir.path(),
                seq,
                base + chrono::Duration::seconds(2 * seq),
            ));
        }

        let status = buffer.status();
        assert_eq!(status.first_seq, 5);
        assert_eq!(status.last_seq, 7);
        assert_eq!(status.segment_count, 3);
        assert!(status.newest_time > status.oldest_time);
        assert!(status.health > 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eviction_loop_removes_expired_files() {
        let dir = TempDir::new().unwrap();
        let mut cfg = BufferConfig::new(
            "cam1",
            dir.path(),
            Duration::from_secs(30),
            Duration::from_secs(2),
        );
        cfg.eviction_interval = Duration::from_millis(50);
        let buffer = Arc::new(RingBuffer::new(cfg).unwrap());

        let expired = segment_on_disk(
            dir.path(),
            0,
            Utc::now() - chrono::Duration::seconds(120),
        );
        let fresh = segment_on_disk(dir.path(), 1, Utc::now());
        buffer.add_segment(expired.clone());
        buffer.add_segment(fresh.clone());

        buffer.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        buffer.stop();

        assert!(!expired.file_path.exists());
        assert!(fresh.file_path.exists());
        let status = buffer.status();
        assert_eq!(status.first_seq, 1);
        assert_eq!(status.segment_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_recovers_index() {
        let dir = TempDir::new().unwrap();
        let base = Utc::now();

        {
            let buffer = make_buffer(dir.path());
            buffer.start();
            for seq in 0..4 {
                buffer.add_segment(segment_on_disk(
                    dir.path(),
                    seq,
                    base + chrono::Duration::seconds(2 * seq),
                ));
            }
            buffer.stop();
        }

        // Simulate a file lost between runs
        std::fs::remove_file(dir.path().join("segment_00001.m4s")).unwrap();

        let buffer = make_buffer(dir.path());
        buffer.start();
        let status = buffer.status();
        assert_eq!(status.segment_count, 3);
        assert_eq!(status.first_seq, 0);
        assert_eq!(status.last_seq, 3);
        buffer.stop();
    }
}
