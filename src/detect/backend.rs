use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// # Contract
///
/// A backend maps one RGB8 frame to an ordered list of raw detections whose boxes
/// are pixel coordinates in the space of the frame it was handed. It holds model
/// weights and possibly mutable inference scratch state, which is why `detect`
/// takes `&mut self` and why every stream session builds its own instance.
///
/// Backends must not keep the frame beyond the call and must not apply the
/// session confidence threshold themselves (the pipeline owns filtering).
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
