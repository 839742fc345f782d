//! Frame delivery to viewers.
//!
//! The stream session hands every processed frame to a `FrameSink`. Sinks must
//! not block the frame loop: a slow consumer loses frames, it never stalls
//! capture.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub trait FrameSink: Send {
    fn send(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn send(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        (**self).send(frame, detections)
    }
}

/// JPEG of the most recent annotated frame, shared with readers.
#[derive(Clone, Debug, Default)]
pub struct LatestFrame {
    inner: Arc<Mutex<Option<Vec<u8>>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.inner.lock().ok().and_then(|slot| slot.clone())
    }

    fn set(&self, jpeg: Vec<u8>) -> Result<()> {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| anyhow!("latest frame lock poisoned"))?;
        *slot = Some(jpeg);
        Ok(())
    }
}

/// Keeps only the newest frame, JPEG-encoded, for the HTTP surface.
pub struct LatestFrameSink {
    latest: LatestFrame,
    quality: u8,
}

impl LatestFrameSink {
    pub fn new(latest: LatestFrame) -> Self {
        Self {
            latest,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }
}

impl FrameSink for LatestFrameSink {
    fn send(&mut self, frame: &Frame, _detections: &[Detection]) -> Result<()> {
        let jpeg = frame.encode_jpeg(self.quality)?;
        self.latest.set(jpeg)
    }
}

/// A processed frame as delivered over a channel.
#[derive(Clone, Debug)]
pub struct DeliveredFrame {
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

/// Forwards frames over a bounded channel; frames are dropped while the
/// receiver is behind.
pub struct ChannelSink {
    tx: SyncSender<DeliveredFrame>,
    dropped: u64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<DeliveredFrame>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn send(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        let delivered = DeliveredFrame {
            frame: frame.clone(),
            detections: detections.to_vec(),
        };
        match self.tx.try_send(delivered) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("viewer lagging; dropped frame ({} total)", self.dropped);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("frame receiver disconnected")),
        }
    }
}

/// Discards every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn send(&mut self, _frame: &Frame, _detections: &[Detection]) -> Result<()> {
        Ok(())
    }
}
