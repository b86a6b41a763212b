use serde::{Deserialize, Serialize};

/// Axis-aligned box in source frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
        }
    }

    /// Builds a box from yolo-style center coordinates.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, confidence: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0, confidence)
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let ix = (self.xmax.min(other.xmax) - self.xmin.max(other.xmin)).max(0.0);
        let iy = (self.ymax.min(other.ymax) - self.ymin.max(other.ymin)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamps the box into a `width` x `height` frame.
    pub fn clamp_to(&self, width: f32, height: f32) -> Self {
        Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
            confidence: self.confidence,
        }
    }
}

/// Greedy non-maximum suppression, in place.
/// Keeps the highest-confidence box of every cluster whose IoU exceeds `iou_threshold`.
pub fn non_maximum_suppression(bboxes: &mut Vec<Bbox>, iou_threshold: f32) {
    bboxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut current_index = 0;
    for index in 0..bboxes.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if bboxes[prev_index].iou(&bboxes[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            bboxes.swap(current_index, index);
            current_index += 1;
        }
    }
    bboxes.truncate(current_index);
}
