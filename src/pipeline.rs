//! Per-frame annotation pipeline.
//!
//! `process` runs: optional resize -> detect -> threshold filter -> rescale to
//! original space -> overlay render. The pipeline holds the detector, label table
//! and renderer but no session state: threshold and resize target are arguments,
//! so every call is independent of the previous one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::detect::{
    filter_by_confidence, BackendRegistry, Detection, DetectorBackend, DetectorSettings,
    InferenceWorker, LabelTable, RawDetection,
};
use crate::frame::{Dims, Frame};
use crate::geometry::rescale_box;
use crate::overlay::OverlayRenderer;

/// Result of one pipeline invocation.
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    /// Annotated frame at the input's original resolution.
    pub frame: Frame,
    /// Filtered detections in original-frame coordinates.
    pub detections: Vec<Detection>,
    /// Set when the detector failed and `frame` is the unannotated input.
    pub detector_error: Option<String>,
    pub elapsed: Duration,
}

impl ProcessedFrame {
    pub fn is_degraded(&self) -> bool {
        self.detector_error.is_some()
    }
}

pub struct FramePipeline {
    detector: Box<dyn DetectorBackend>,
    labels: Arc<LabelTable>,
    renderer: OverlayRenderer,
}

impl FramePipeline {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        labels: Arc<LabelTable>,
        renderer: OverlayRenderer,
    ) -> Self {
        Self {
            detector,
            labels,
            renderer,
        }
    }

    /// Build a pipeline around a fresh backend from `registry`, run behind an
    /// `InferenceWorker` so a hung model costs at most `settings.timeout` per frame.
    pub fn from_registry(
        registry: &BackendRegistry,
        settings: &DetectorSettings,
        labels: Arc<LabelTable>,
        renderer: OverlayRenderer,
    ) -> Result<Self> {
        let backend = registry.create(settings)?;
        let worker = InferenceWorker::spawn(backend, settings.timeout)?;
        Ok(Self::new(Box::new(worker), labels, renderer))
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Annotate one frame.
    ///
    /// Never fails: a detector error (or a frame that cannot be resized) is logged
    /// and yields the original frame untouched with no detections.
    pub fn process(
        &mut self,
        frame: Frame,
        confidence_threshold: f32,
        resize_target: Option<Dims>,
    ) -> ProcessedFrame {
        let started = Instant::now();
        let original = frame.dims();

        let raw = match self.infer(&frame, resize_target) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!(
                    "detector '{}' failed on {} frame: {:#}",
                    self.detector.name(),
                    original,
                    err
                );
                return ProcessedFrame {
                    frame,
                    detections: Vec::new(),
                    detector_error: Some(format!("{:#}", err)),
                    elapsed: started.elapsed(),
                };
            }
        };

        let (raw, inference_dims) = raw;
        let detections = self.to_original_space(
            filter_by_confidence(raw, confidence_threshold),
            original,
            inference_dims,
        );

        let mut frame = frame;
        self.renderer.render(&mut frame, &detections);
        let elapsed = started.elapsed();
        log::debug!(
            "processed {} frame (inference at {}) with {} detections in {:?}",
            original,
            inference_dims,
            detections.len(),
            elapsed
        );
        ProcessedFrame {
            frame,
            detections,
            detector_error: None,
            elapsed,
        }
    }

    fn infer(
        &mut self,
        frame: &Frame,
        resize_target: Option<Dims>,
    ) -> Result<(Vec<RawDetection>, Dims)> {
        match resize_target {
            Some(target) if target.is_degenerate() => {
                log::warn!(
                    "ignoring degenerate resize target {} for {} frame; inferring at original size",
                    target,
                    frame.dims()
                );
                Ok((self.detector.detect(frame)?, frame.dims()))
            }
            Some(target) if target != frame.dims() => {
                let resized = frame.resized(target)?;
                Ok((self.detector.detect(&resized)?, target))
            }
            _ => Ok((self.detector.detect(frame)?, frame.dims())),
        }
    }

    fn to_original_space(
        &self,
        raw: Vec<RawDetection>,
        original: Dims,
        inference: Dims,
    ) -> Vec<Detection> {
        raw.into_iter()
            .filter_map(|det| {
                let bbox = rescale_box(det.bbox, original, inference);
                if bbox.is_none() {
                    log::debug!("dropping detection with empty box {:?}", det.bbox);
                }
                Some(Detection {
                    class_label: self.labels.label(det.class_id),
                    confidence: det.confidence,
                    bbox: bbox?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{StubBackend, StubBehavior};
    use crate::geometry::BoundingBox;
    use crate::overlay::OverlayStyle;

    fn pipeline(backend: StubBackend) -> FramePipeline {
        FramePipeline::new(
            Box::new(backend),
            Arc::new(LabelTable::rice_defaults()),
            OverlayRenderer::new(OverlayStyle::default()),
        )
    }

    #[test]
    fn rescales_from_resized_space() {
        let mut p = pipeline(StubBackend::fixed(vec![RawDetection::new(
            1,
            0.8,
            [100.0, 100.0, 200.0, 200.0],
        )]));
        let out = p.process(
            Frame::filled(1280, 720, [0, 0, 0]),
            0.3,
            Some(Dims::new(640, 480)),
        );
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].bbox, BoundingBox::new(200, 150, 400, 300));
        assert_eq!(out.detections[0].class_label, "Brown Spot");
        assert_eq!(out.frame.dims(), Dims::new(1280, 720));
    }

    #[test]
    fn no_resize_keeps_boxes() {
        let mut p = pipeline(StubBackend::fixed(vec![RawDetection::new(
            0,
            0.8,
            [10.0, 20.0, 30.0, 40.0],
        )]));
        let out = p.process(Frame::filled(64, 64, [0, 0, 0]), 0.5, None);
        assert_eq!(out.detections[0].bbox, BoundingBox::new(10, 20, 30, 40));
    }

    #[test]
    fn threshold_filters_before_render() {
        let raw = [0.1, 0.29, 0.30, 0.9]
            .iter()
            .map(|&c| RawDetection::new(0, c, [10.0, 50.0, 20.0, 60.0]))
            .collect();
        let mut p = pipeline(StubBackend::fixed(raw));
        let out = p.process(Frame::filled(100, 100, [0, 0, 0]), 0.30, None);
        let confidences: Vec<f32> = out.detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.30, 0.9]);
    }

    #[test]
    fn detector_failure_returns_input_unchanged() {
        let mut p = pipeline(StubBackend::new(StubBehavior::FailOn(
            vec![1],
            vec![RawDetection::new(0, 0.9, [10.0, 30.0, 40.0, 60.0])],
        )));
        let input = Frame::filled(80, 80, [7, 8, 9]);
        let failed = p.process(input.clone(), 0.3, None);
        assert_eq!(failed.frame, input);
        assert!(failed.detections.is_empty());
        assert!(failed.is_degraded());

        let next = p.process(input.clone(), 0.3, None);
        assert!(!next.is_degraded());
        assert_eq!(next.detections.len(), 1);
        assert_ne!(next.frame, input);
    }

    #[test]
    fn degenerate_resize_target_falls_back_to_identity() {
        let mut p = pipeline(StubBackend::fixed(vec![RawDetection::new(
            0,
            0.9,
            [2.0, 3.0, 12.0, 13.0],
        )]));
        let out = p.process(Frame::filled(16, 16, [1, 1, 1]), 0.3, Some(Dims::new(0, 480)));
        assert!(!out.is_degraded());
        assert_eq!(out.detections[0].bbox, BoundingBox::new(2, 3, 12, 13));
    }

    #[test]
    fn registry_pipeline_runs_behind_worker() {
        let mut registry = BackendRegistry::new();
        registry.register("fixed", |_| {
            Ok(Box::new(StubBackend::fixed(vec![RawDetection::new(
                4,
                0.6,
                [1.0, 1.0, 8.0, 8.0],
            )])))
        });
        let settings = DetectorSettings {
            backend: "fixed".to_string(),
            ..DetectorSettings::default()
        };
        let mut p = FramePipeline::from_registry(
            &registry,
            &settings,
            Arc::new(LabelTable::rice_defaults()),
            OverlayRenderer::default(),
        )
        .unwrap();
        assert_eq!(p.detector_name(), "stub");

        let out = p.process(Frame::filled(32, 32, [0, 90, 0]), 0.5, None);
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].class_label, "Narrow Brown Spot");

        let unknown = DetectorSettings {
            backend: "missing".to_string(),
            ..DetectorSettings::default()
        };
        assert!(FramePipeline::from_registry(
            &registry,
            &unknown,
            Arc::new(LabelTable::rice_defaults()),
            OverlayRenderer::default(),
        )
        .is_err());
    }
}
