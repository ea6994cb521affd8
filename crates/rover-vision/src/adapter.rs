use anyhow::Result;
use tracing::debug;

use crate::{annotate, AnnotatedFrame, Detection, Detector, Frame};

/// Wraps an inference backend so the control loop gets exactly what it needs:
/// thresholded detections plus an annotated frame for the display.
pub struct DetectorAdapter {
    backend: Box<dyn Detector>,
    conf_threshold: f32,
    target_class_id: i32,
}

impl DetectorAdapter {
    pub fn new(backend: Box<dyn Detector>, conf_threshold: f32, target_class_id: i32) -> Self {
        Self { backend, conf_threshold, target_class_id }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn conf_threshold(&self) -> f32 {
        self.conf_threshold
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<(Vec<Detection>, AnnotatedFrame)> {
        let mut dets = self.backend.detect(frame, self.conf_threshold)?;
        // Backends are asked to threshold, but the cut is enforced here regardless.
        dets.retain(|d| d.confidence >= self.conf_threshold);
        debug!("detect: frame {} -> {} detections ({})", frame.seq, dets.len(), self.backend.name());

        let annotated = annotate::annotate(frame, &dets, self.target_class_id)?;
        Ok((dets, annotated))
    }
}
