use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::EncoderConfig;
use crate::error::EncoderError;
use crate::{probe, watcher, FfmpegLocation};

/// How often the output directory and the subprocess are checked.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Grace period between SIGINT and SIGKILL on stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A completed media segment reported by the watcher.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub sequence: i64,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub size: u64,
}

type SegmentCallback = Arc<dyn Fn(SegmentInfo) + Send + Sync>;

/// Supervises one ffmpeg subprocess producing CMAF segments.
///
/// The subprocess is never restarted automatically: when it exits the error
/// is recorded in [`Encoder::last_error`] and capture stops until an operator
/// calls [`Encoder::start`] again (which begins a fresh run with a new init
/// segment and sequence numbering).
pub struct Encoder {
    cfg: EncoderConfig,
    location: FfmpegLocation,

    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    capturing: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    on_segment: Mutex<Option<SegmentCallback>>,
}

impl Encoder {
    pub fn new(cfg: EncoderConfig, location: FfmpegLocation) -> Self {
        Self {
            cfg,
            location,
            child: Arc::new(tokio::sync::Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
            capturing: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
            on_segment: Mutex::new(None),
        }
    }

    /// Register the callback invoked once per completed segment.
    ///
    /// Must be called before [`Encoder::start`]; a later registration only
    /// affects the next run.
    pub fn on_segment<F>(&self, callback: F)
    where
        F: Fn(SegmentInfo) + Send + Sync + 'static,
    {
        *self.on_segment.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Launch the subprocess and begin segment detection.
    ///
    /// Returns once the subprocess has started; it does not wait for the
    /// first segment.
    pub async fn start(&self) -> Result<(), EncoderError> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Err(EncoderError::AlreadyRunning);
        }

        tokio::fs::create_dir_all(&self.cfg.output_dir).await?;

        // GOP sizing needs a framerate; probe file sources when unspecified
        let probed = self.probe_framerate().await;
        let args = self.cfg.build_args(probed);

        tracing::info!(
            input = %self.cfg.input,
            output = %self.cfg.output_dir.display(),
            segment_duration = self.cfg.segment_duration,
            "starting encoder"
        );
        tracing::debug!(args = %args.join(" "), "ffmpeg arguments");

        let mut child = Command::new(&self.location.ffmpeg)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                let err = if e.kind() == std::io::ErrorKind::NotFound {
                    EncoderError::FfmpegNotFound
                } else {
                    EncoderError::Spawn(e.to_string())
                };
                *self.last_error.lock().unwrap() = Some(err.to_string());
                err
            })?;

        let run_started = Utc::now();
        self.stopping.store(false, Ordering::SeqCst);
        self.capturing.store(true, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = None;

        let mut tasks = self.tasks.lock().unwrap();

        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(log_stderr(stderr)));
        }

        *child_slot = Some(child);
        drop(child_slot);

        tasks.push(tokio::spawn(monitor_exit(
            Arc::clone(&self.child),
            Arc::clone(&self.capturing),
            Arc::clone(&self.stopping),
            Arc::clone(&self.last_error),
        )));

        let callback = self.on_segment.lock().unwrap().clone();
        if let Some(callback) = callback {
            tasks.push(tokio::spawn(watch_segments(
                self.cfg.output_dir.clone(),
                run_started,
                Duration::from_secs_f64(self.cfg.segment_duration),
                callback,
                Arc::clone(&self.capturing),
                Arc::clone(&self.stopping),
            )));
        }

        Ok(())
    }

    /// Request graceful shutdown: SIGINT, wait up to 5 seconds, then kill.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
            }

            match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(%status, "encoder stopped");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "wait for encoder failed");
                }
                Err(_) => {
                    tracing::warn!("encoder did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.capturing.store(false, Ordering::SeqCst);

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// True while the subprocess is believed to be running.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Last failure observed for this encoder, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.cfg.output_dir
    }

    async fn probe_framerate(&self) -> Option<f64> {
        if self.cfg.gop > 0 || self.cfg.framerate > 0 {
            return None;
        }
        let path = std::path::Path::new(&self.cfg.input);
        if !path.is_file() {
            return None;
        }
        match probe::video_info(&self.location.ffprobe, path).await {
            Ok(info) if info.framerate > 0.0 => {
                tracing::debug!(framerate = info.framerate, "probed source framerate");
                Some(info.framerate)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "framerate probe failed, assuming 30 fps");
                None
            }
        }
    }
}

/// Stream ffmpeg stderr into the log; error lines get warn level.
async fn log_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("Error") || line.contains("error") {
            tracing::warn!(target: "ffmpeg", "{line}");
        } else {
            tracing::trace!(target: "ffmpeg", "{line}");
        }
    }
}

/// Poll for unexpected subprocess exit and record it.
async fn monitor_exit(
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    capturing: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;

        let mut guard = child.lock().await;
        let Some(running) = guard.as_mut() else {
            return;
        };
        match running.try_wait() {
            Ok(None) => continue,
            Ok(Some(status)) => {
                *guard = None;
                drop(guard);
                capturing.store(false, Ordering::SeqCst);
                if !stopping.load(Ordering::SeqCst) {
                    let err = EncoderError::Exited(status.to_string());
                    tracing::error!(%status, "encoder exited unexpectedly");
                    *last_error.lock().unwrap() = Some(err.to_string());
                }
                return;
            }
            Err(e) => {
                *guard = None;
                drop(guard);
                capturing.store(false, Ordering::SeqCst);
                *last_error.lock().unwrap() = Some(e.to_string());
                return;
            }
        }
    }
}

/// Poll the output directory and emit the segment callback.
async fn watch_segments(
    dir: PathBuf,
    run_started: DateTime<Utc>,
    segment_duration: Duration,
    callback: SegmentCallback,
    capturing: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
) {
    let mut seen = HashSet::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;

        for info in watcher::scan_new_segments(&dir, &mut seen, run_started, segment_duration) {
            callback(info);
        }

        // One final scan after the process went away, then exit
        if stopping.load(Ordering::SeqCst) || !capturing.load(Ordering::SeqCst) {
            for info in watcher::scan_new_segments(&dir, &mut seen, run_started, segment_duration)
            {
                callback(info);
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encoder() -> Encoder {
        Encoder::new(
            EncoderConfig {
                input: "/nonexistent/input.mp4".to_string(),
                output_dir: std::env::temp_dir().join("encoder-test"),
                ..Default::default()
            },
            FfmpegLocation {
                ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
                ffprobe: PathBuf::from("/nonexistent/ffprobe"),
            },
        )
    }

    #[tokio::test]
    async fn test_spawn_failure_records_last_error() {
        let encoder = test_encoder();
        let err = encoder.start().await.unwrap_err();
        assert!(matches!(err, EncoderError::FfmpegNotFound));
        assert!(encoder.last_error().is_some());
        assert!(!encoder.is_capturing());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let encoder = test_encoder();
        encoder.stop().await;
        assert!(!encoder.is_capturing());
    }
}
