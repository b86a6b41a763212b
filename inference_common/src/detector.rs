use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::threshold::Threshold;

/// One detected object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_idx: usize,
    pub label: String,
    pub bbox: Bbox,
}

impl Detection {
    pub fn confidence(&self) -> f32 {
        self.bbox.confidence
    }
}

/// An object detection model, used as a black box by the pipeline.
///
/// Implementations take `&mut self` since inference sessions usually need
/// exclusive access to run.
pub trait Detector {
    /// Runs inference once on `frame`, returning detections whose confidence
    /// is at least `threshold`.
    fn detect(&mut self, frame: &RgbImage, threshold: Threshold) -> anyhow::Result<Vec<Detection>>;

    /// Looks up the label of a class id in the model's vocabulary.
    fn class_name(&self, class_idx: usize) -> Option<&str>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage, threshold: Threshold) -> anyhow::Result<Vec<Detection>> {
        (**self).detect(frame, threshold)
    }

    fn class_name(&self, class_idx: usize) -> Option<&str> {
        (**self).class_name(class_idx)
    }
}
