use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Detector output before filtering and rescaling.
///
/// `bbox` is `[x1, y1, x2, y2]` in pixels of the frame the detector was handed,
/// which is the resized frame when a resize target is active.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl RawDetection {
    pub fn new(class_id: usize, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// A detection normalized to the original frame's coordinate space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_label: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    /// Overlay caption: `"{label} {percent}%"`.
    pub fn caption(&self) -> String {
        format!("{} {}", self.class_label, format_confidence(self.confidence))
    }
}

/// Confidence as an integer percentage rounded to nearest: `0.956` -> `"96%"`.
pub fn format_confidence(confidence: f32) -> String {
    let percent = (f64::from(confidence) * 100.0).round() as i64;
    format!("{}%", percent)
}

/// Keep detections with `confidence >= threshold`; order is preserved.
///
/// No range validation: any threshold is applied as given.
pub fn filter_by_confidence(detections: Vec<RawDetection>, threshold: f32) -> Vec<RawDetection> {
    detections
        .into_iter()
        .filter(|det| det.confidence >= threshold)
        .collect()
}
