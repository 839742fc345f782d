//! Frame ingestion sources.
//!
//! Every source yields decoded RGB frames at the camera's native resolution:
//! - `stub://` synthetic leaf frames (tests, demos)
//! - `http://` / `https://` MJPEG or single-JPEG cameras
//! - a local image file or a directory of images, played as a looping sequence
//!
//! Sources pace themselves to the configured target frame rate. Resizing for
//! inference happens later in the pipeline, never here.

pub mod file;
pub mod mjpeg;
pub mod synthetic;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use file::ImageSequenceSource;
pub use mjpeg::MjpegHttpSource;
pub use synthetic::SyntheticSource;

/// A live or replayed stream of frames.
pub trait FrameSource: Send {
    /// Next frame, or `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open the source named by `url`.
///
/// `stub_dims` sets the synthetic frame size for `stub://` URLs.
pub fn open_source(
    url: &str,
    target_fps: u32,
    stub_dims: (u32, u32),
) -> Result<Box<dyn FrameSource>> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("stream url must not be empty"));
    }
    if trimmed.starts_with("stub://") {
        let (width, height) = stub_dims;
        return Ok(Box::new(SyntheticSource::new(
            trimmed, width, height, target_fps,
        )?));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(Box::new(MjpegHttpSource::connect(trimmed, target_fps)?));
    }
    if trimmed.contains("://") {
        return Err(anyhow!("unsupported stream url scheme: {}", trimmed));
    }
    Ok(Box::new(ImageSequenceSource::open(trimmed, target_fps)?))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// Sleeps just long enough to hold a source to its target frame rate.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
            last: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }

    /// True when a frame arriving now would exceed the target rate.
    pub(crate) fn too_soon(&self) -> bool {
        self.last
            .map(|last| last.elapsed() < self.interval)
            .unwrap_or(false)
    }

    pub(crate) fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}
