//! Pre/post-processing around a yolov8 onnx export.
//!
//! The model takes a `[1, 3, 640, 640]` f32 tensor in `[0, 1]` and emits
//! `[1, 4 + classes, anchors]`: box center/size in input pixels followed by
//! one score per class.

use anyhow::{Context, bail};
use image::RgbImage;
use image::imageops::{self, FilterType};
use inference_common::bbox::{Bbox, non_maximum_suppression};
use inference_common::coco_classes;
use inference_common::detector::{Detection, Detector};
use inference_common::threshold::Threshold;
use ndarray::{Array4, ArrayView2, CowArray};
use ort::session::Session;
use ort::value::TensorRef;

pub const INPUT_SIZE: u32 = 640;
/// Overlap above which two boxes of the same class count as one object.
pub const NMS_IOU: f32 = 0.7;
pub const MAX_DETECTIONS: usize = 300;
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Maps a frame into the square model input, keeping aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub resized_w: u32,
    pub resized_h: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let resized_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let resized_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - resized_w) / 2,
            pad_y: (target - resized_h) / 2,
            resized_w,
            resized_h,
        }
    }

    /// Converts a box from model input coordinates back to the source frame.
    pub fn unmap(&self, b: Bbox) -> Bbox {
        let (px, py) = (self.pad_x as f32, self.pad_y as f32);
        Bbox {
            xmin: (b.xmin - px) / self.scale,
            ymin: (b.ymin - py) / self.scale,
            xmax: (b.xmax - px) / self.scale,
            ymax: (b.ymax - py) / self.scale,
            confidence: b.confidence,
        }
    }
}

/// Builds the NCHW input tensor, padding with yolo's gray.
pub fn preprocess(frame: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let resized = imageops::resize(
        frame,
        letterbox.resized_w,
        letterbox.resized_h,
        FilterType::Triangle,
    );
    let mut input = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
        input[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }
    input
}

/// Decodes a `[4 + classes, anchors]` output into per-class NMS'd detections,
/// in source frame coordinates, highest confidence first.
pub fn postprocess(
    output: ArrayView2<f32>,
    threshold: Threshold,
    letterbox: &Letterbox,
    frame_w: u32,
    frame_h: u32,
) -> Vec<(usize, Bbox)> {
    let (rows, anchors) = output.dim();
    let num_classes = rows.saturating_sub(4);
    let mut by_class: Vec<Vec<Bbox>> = vec![Vec::new(); num_classes];

    for anchor in 0..anchors {
        let column = output.column(anchor);
        let Some((class_idx, score)) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if !threshold.admits(score) {
            continue;
        }
        let b = Bbox::from_center(column[0], column[1], column[2], column[3], score);
        by_class[class_idx].push(letterbox.unmap(b).clamp_to(frame_w as f32, frame_h as f32));
    }

    let mut detections = Vec::new();
    for (class_idx, mut bboxes) in by_class.into_iter().enumerate() {
        non_maximum_suppression(&mut bboxes, NMS_IOU);
        detections.extend(bboxes.into_iter().map(|b| (class_idx, b)));
    }
    detections.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    detections.truncate(MAX_DETECTIONS);
    detections
}

/// A yolov8 detector backed by an ort session.
pub struct YoloV8 {
    session: Session,
    names: Vec<String>,
}

impl YoloV8 {
    /// Wraps a session of a COCO-trained export.
    pub fn new(session: Session) -> Self {
        Self::with_names(
            session,
            coco_classes::NAMES.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_names(session: Session, names: Vec<String>) -> Self {
        Self { session, names }
    }
}

impl Detector for YoloV8 {
    fn detect(&mut self, frame: &RgbImage, threshold: Threshold) -> anyhow::Result<Vec<Detection>> {
        let (frame_w, frame_h) = frame.dimensions();
        let letterbox = Letterbox::fit(frame_w, frame_h, INPUT_SIZE);
        let input = CowArray::from(preprocess(frame, &letterbox)).into_dyn();

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(&input)?])
            .context("Forward pass failed")?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let &[1, rows, anchors] = &shape[..] else {
            bail!("Unexpected yolov8 output shape {shape:?}");
        };
        let view = ArrayView2::from_shape((rows as usize, anchors as usize), data)?;
        let found = postprocess(view, threshold, &letterbox, frame_w, frame_h);
        drop(outputs);

        Ok(found
            .into_iter()
            .map(|(class_idx, bbox)| Detection {
                class_idx,
                label: self.class_name(class_idx).unwrap_or("unknown").to_owned(),
                bbox,
            })
            .collect())
    }

    fn class_name(&self, class_idx: usize) -> Option<&str> {
        self.names.get(class_idx).map(String::as_str)
    }
}
