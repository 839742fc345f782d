//! One-shot detection on an uploaded still image.

use anyhow::{Context, Result};

use crate::detect::Detection;
use crate::frame::{Dims, Frame};
use crate::pipeline::FramePipeline;
use crate::storage::{save_frame, SnapshotStore};

#[derive(Clone, Debug)]
pub struct UploadAnalysis {
    pub annotated: Frame,
    pub detections: Vec<Detection>,
    pub snapshot_id: Option<i64>,
    /// User-facing message when the snapshot could not be saved.
    pub store_error: Option<String>,
    /// Set when the detector failed; `annotated` is then the decoded upload.
    pub detector_error: Option<String>,
}

impl UploadAnalysis {
    /// Highest-confidence detection, used as the report subject.
    pub fn top_detection(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Decode `bytes`, annotate at native resolution and record a snapshot.
/// `resize` is the inference resolution; `None` runs on the decoded size.
///
/// Only an undecodable upload is an error. Detector and persistence failures
/// are reported in the result and leave the computed detections intact.
pub fn analyze_upload(
    pipeline: &mut FramePipeline,
    store: Option<&dyn SnapshotStore>,
    bytes: &[u8],
    confidence_threshold: f32,
    resize: Option<Dims>,
) -> Result<UploadAnalysis> {
    let frame = Frame::decode(bytes).context("uploaded file is not a readable image")?;
    let processed = pipeline.process(frame, confidence_threshold, resize);

    let (snapshot_id, store_error) = match store {
        Some(store) => match save_frame(store, &processed.frame) {
            Ok(id) => (Some(id), None),
            Err(err) => {
                log::error!("failed to save snapshot: {:#}", err);
                (None, Some(format!("Could not save detection snapshot: {:#}", err)))
            }
        },
        None => (None, None),
    };

    Ok(UploadAnalysis {
        annotated: processed.frame,
        detections: processed.detections,
        snapshot_id,
        store_error,
        detector_error: processed.detector_error,
    })
}
