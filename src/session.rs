//! Stream sessions: one frame loop per live source.
//!
//! A session owns its source, sink, and pipeline (and so its own detector
//! instance). The operator-facing configuration lives in a `SessionControl`
//! that the control surface updates concurrently; the loop copies it once per
//! frame, so each frame sees either the old or the new settings in full.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::frame::Dims;
use crate::ingest::FrameSource;
use crate::pipeline::FramePipeline;
use crate::transport::FrameSink;

pub const MIN_INTERACTIVE_THRESHOLD: f32 = 0.25;
pub const MAX_INTERACTIVE_THRESHOLD: f32 = 1.0;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.30;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SOURCE_RETRY_MIN: Duration = Duration::from_millis(100);
const SOURCE_RETRY_MAX: Duration = Duration::from_secs(5);

/// Resolution the detector sees; `Original` disables resizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResizeTarget {
    Original,
    #[default]
    R640x480,
    R480x360,
    R320x240,
}

impl ResizeTarget {
    pub const ALL: [ResizeTarget; 4] = [
        ResizeTarget::Original,
        ResizeTarget::R640x480,
        ResizeTarget::R480x360,
        ResizeTarget::R320x240,
    ];

    pub fn dims(&self) -> Option<Dims> {
        match self {
            ResizeTarget::Original => None,
            ResizeTarget::R640x480 => Some(Dims::new(640, 480)),
            ResizeTarget::R480x360 => Some(Dims::new(480, 360)),
            ResizeTarget::R320x240 => Some(Dims::new(320, 240)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeTarget::Original => "Original",
            ResizeTarget::R640x480 => "640x480",
            ResizeTarget::R480x360 => "480x360",
            ResizeTarget::R320x240 => "320x240",
        }
    }
}

impl fmt::Display for ResizeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizeTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('×', "x");
        ResizeTarget::ALL
            .into_iter()
            .find(|target| target.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "invalid resize target '{}'; expected one of Original, 640x480, 480x360, 320x240",
                    s
                )
            })
    }
}

impl TryFrom<String> for ResizeTarget {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResizeTarget> for String {
    fn from(value: ResizeTarget) -> Self {
        value.as_str().to_string()
    }
}

/// Per-session settings, copied into every pipeline call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub confidence_threshold: f32,
    pub resize: ResizeTarget,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            resize: ResizeTarget::default(),
        }
    }
}

impl SessionConfig {
    /// Check the threshold against the interactive control's range.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.confidence_threshold)
    }
}

pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !(MIN_INTERACTIVE_THRESHOLD..=MAX_INTERACTIVE_THRESHOLD).contains(&threshold) {
        bail!(
            "confidence threshold {} outside [{}, {}]",
            threshold,
            MIN_INTERACTIVE_THRESHOLD,
            MAX_INTERACTIVE_THRESHOLD
        );
    }
    Ok(())
}

/// Live session settings shared between the frame loop and the control surface.
#[derive(Debug, Default)]
pub struct SessionControl {
    config: RwLock<SessionConfig>,
}

impl SessionControl {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
        })
    }

    /// Consistent copy of the current settings.
    pub fn snapshot(&self) -> SessionConfig {
        match self.config.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_threshold(&self, threshold: f32) -> Result<SessionConfig> {
        self.update(|config| config.confidence_threshold = threshold)
    }

    pub fn set_resize(&self, resize: ResizeTarget) -> Result<SessionConfig> {
        self.update(|config| config.resize = resize)
    }

    /// Apply `change` atomically; rejected changes leave the settings untouched.
    pub fn update<F>(&self, change: F) -> Result<SessionConfig>
    where
        F: FnOnce(&mut SessionConfig),
    {
        let mut guard = self
            .config
            .write()
            .map_err(|_| anyhow!("session config lock poisoned"))?;
        let mut next = *guard;
        change(&mut next);
        next.validate()?;
        *guard = next;
        log::info!(
            "session config updated: threshold={:.2} resize={}",
            next.confidence_threshold,
            next.resize
        );
        Ok(next)
    }
}

/// Counters for a running session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub detector_failures: u64,
    pub source_errors: u64,
    pub last_latency_ms: u64,
}

#[derive(Default)]
struct SharedState {
    latest: Mutex<Vec<Detection>>,
    stats: Mutex<SessionStats>,
}

pub struct StreamSession;

impl StreamSession {
    /// Start the frame loop on its own thread.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        pipeline: FramePipeline,
        control: Arc<SessionControl>,
    ) -> Result<SessionHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(SharedState::default());
        let worker = FrameLoop {
            source,
            sink,
            pipeline,
            control: Arc::clone(&control),
            shared: Arc::clone(&shared),
            shutdown: Arc::clone(&shutdown),
            finished: Arc::clone(&finished),
        };
        let join = std::thread::Builder::new()
            .name("stream-session".to_string())
            .spawn(move || worker.run())
            .map_err(|e| anyhow!("failed to spawn stream session: {}", e))?;
        Ok(SessionHandle {
            control,
            shared,
            shutdown,
            finished,
            join: Some(join),
        })
    }
}

struct FrameLoop {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    pipeline: FramePipeline,
    control: Arc<SessionControl>,
    shared: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl FrameLoop {
    fn run(mut self) {
        let origin = self.source.describe();
        log::info!(
            "stream session started: source={} detector={}",
            origin,
            self.pipeline.detector_name()
        );
        let mut last_health_log = Instant::now();
        let mut retry_delay = SOURCE_RETRY_MIN;

        while !self.shutdown.load(Ordering::SeqCst) {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    retry_delay = SOURCE_RETRY_MIN;
                    frame
                }
                Ok(None) => {
                    log::info!("stream ended: {}", origin);
                    break;
                }
                Err(err) => {
                    self.bump(|stats| stats.source_errors += 1);
                    log::warn!(
                        "frame source error ({}): {:#}; retrying in {:?}",
                        origin,
                        err,
                        retry_delay
                    );
                    self.sleep_unless_shutdown(retry_delay);
                    retry_delay = (retry_delay * 2).min(SOURCE_RETRY_MAX);
                    continue;
                }
            };

            let config = self.control.snapshot();
            let processed =
                self.pipeline
                    .process(frame, config.confidence_threshold, config.resize.dims());

            if self.shutdown.load(Ordering::SeqCst) {
                log::debug!("discarding in-flight frame after session stop");
                break;
            }

            if let Err(err) = self.sink.send(&processed.frame, &processed.detections) {
                log::warn!("frame sink rejected frame: {:#}", err);
            }
            if let Ok(mut latest) = self.shared.latest.lock() {
                *latest = processed.detections;
            }
            let latency_ms = processed.elapsed.as_millis() as u64;
            let degraded = processed.detector_error.is_some();
            self.bump(|stats| {
                stats.frames_processed += 1;
                stats.last_latency_ms = latency_ms;
                if degraded {
                    stats.detector_failures += 1;
                }
            });

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.stats();
                log::info!(
                    "stream health: frames={} detector_failures={} source_errors={} latency_ms={} source={}",
                    stats.frames_processed,
                    stats.detector_failures,
                    stats.source_errors,
                    stats.last_latency_ms,
                    origin
                );
                last_health_log = Instant::now();
            }
        }
        self.finished.store(true, Ordering::SeqCst);
        log::info!("stream session stopped: {}", origin);
    }

    fn bump<F: FnOnce(&mut SessionStats)>(&self, f: F) {
        if let Ok(mut stats) = self.shared.stats.lock() {
            f(&mut stats);
        }
    }

    fn stats(&self) -> SessionStats {
        self.shared
            .stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    fn sleep_unless_shutdown(&self, total: Duration) {
        let step = Duration::from_millis(50);
        let deadline = Instant::now() + total;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(step.min(deadline - now));
        }
    }
}

/// Owner's handle on a running session. Dropping it stops the session.
pub struct SessionHandle {
    control: Arc<SessionControl>,
    shared: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Detections from the most recently completed frame.
    pub fn latest_detections(&self) -> Vec<Detection> {
        self.shared
            .latest
            .lock()
            .map(|latest| latest.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared
            .stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    pub fn control(&self) -> &Arc<SessionControl> {
        &self.control
    }

    /// True once the frame loop has exited (stopped or end of stream).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// A cheap reader for the latest detections that does not keep the session alive.
    pub fn detections_view(&self) -> DetectionsView {
        DetectionsView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Signal the loop and wait for it; an in-flight frame finishes and is discarded.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream session thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::error!("{}", err);
        }
    }
}

/// Read-only access to a session's latest detections and counters.
#[derive(Clone)]
pub struct DetectionsView {
    shared: Arc<SharedState>,
}

impl DetectionsView {
    pub fn latest(&self) -> Vec<Detection> {
        self.shared
            .latest
            .lock()
            .map(|latest| latest.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared
            .stats
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_target_parses_and_maps_dims() {
        assert_eq!("Original".parse::<ResizeTarget>().unwrap().dims(), None);
        assert_eq!(
            "480×360".parse::<ResizeTarget>().unwrap().dims(),
            Some(Dims::new(480, 360))
        );
        assert_eq!(
            " 320X240 ".parse::<ResizeTarget>().unwrap(),
            ResizeTarget::R320x240
        );
        assert!("1024x768".parse::<ResizeTarget>().is_err());
    }

    #[test]
    fn resize_target_serializes_as_label() {
        let json = serde_json::to_string(&ResizeTarget::R640x480).unwrap();
        assert_eq!(json, "\"640x480\"");
        let back: ResizeTarget = serde_json::from_str("\"original\"").unwrap();
        assert_eq!(back, ResizeTarget::Original);
    }

    #[test]
    fn control_rejects_out_of_range_thresholds() {
        let control = SessionControl::new(SessionConfig::default()).unwrap();
        assert!(control.set_threshold(0.2).is_err());
        assert!(control.set_threshold(1.01).is_err());
        assert_eq!(control.snapshot().confidence_threshold, 0.30);
        control.set_threshold(0.25).unwrap();
        control.set_resize(ResizeTarget::Original).unwrap();
        let config = control.snapshot();
        assert_eq!(config.confidence_threshold, 0.25);
        assert_eq!(config.resize, ResizeTarget::Original);
    }

    #[test]
    fn rejected_update_changes_nothing() {
        let control = SessionControl::new(SessionConfig::default()).unwrap();
        let result = control.update(|config| {
            config.resize = ResizeTarget::R320x240;
            config.confidence_threshold = 0.0;
        });
        assert!(result.is_err());
        assert_eq!(control.snapshot(), SessionConfig::default());
    }
}
