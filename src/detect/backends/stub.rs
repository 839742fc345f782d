use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// What the stub returns for each call.
#[derive(Clone, Debug)]
pub enum StubBehavior {
    /// The same detections on every frame.
    Fixed(Vec<RawDetection>),
    /// Boxes given as fractions of the frame (`0..1`), scaled to each frame's size.
    Relative(Vec<RawDetection>),
    /// Fail every call with this message.
    Fail(String),
    /// Fail only the listed call numbers (1-based); otherwise behave like `Fixed`.
    FailOn(Vec<u64>, Vec<RawDetection>),
}

/// Stub backend for tests and for running the daemon without a model.
pub struct StubBackend {
    behavior: StubBehavior,
    calls: u64,
}

impl StubBackend {
    pub fn new(behavior: StubBehavior) -> Self {
        Self { behavior, calls: 0 }
    }

    /// Never detects anything.
    pub fn empty() -> Self {
        Self::new(StubBehavior::Fixed(Vec::new()))
    }

    pub fn fixed(detections: Vec<RawDetection>) -> Self {
        Self::new(StubBehavior::Fixed(detections))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(StubBehavior::Fail(message.to_string()))
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        match &self.behavior {
            StubBehavior::Fixed(detections) => Ok(detections.clone()),
            StubBehavior::Relative(detections) => {
                let (w, h) = (frame.width() as f32, frame.height() as f32);
                Ok(detections
                    .iter()
                    .map(|det| {
                        RawDetection::new(
                            det.class_id,
                            det.confidence,
                            [det.bbox[0] * w, det.bbox[1] * h, det.bbox[2] * w, det.bbox[3] * h],
                        )
                    })
                    .collect())
            }
            StubBehavior::Fail(message) => Err(anyhow!("{}", message)),
            StubBehavior::FailOn(calls, detections) => {
                if calls.contains(&self.calls) {
                    Err(anyhow!("scripted failure on call {}", self.calls))
                } else {
                    Ok(detections.clone())
                }
            }
        }
    }
}
