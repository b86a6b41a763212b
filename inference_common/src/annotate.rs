//! Runs the detector on a frame and draws its detections onto a copy.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detector::{Detection, Detector};
use crate::threshold::Threshold;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// Cycled by class index.
const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

pub fn class_color(class_idx: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_idx % PALETTE.len()])
}

/// Result of annotating one frame.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub detections: Vec<Detection>,
    pub image: RgbImage,
}

/// Draws boxes and `<label> <confidence>` captions.
/// Without a font only the boxes are drawn.
#[derive(Debug, Clone, Default)]
pub struct FrameAnnotator {
    font: Option<FontArc>,
}

impl FrameAnnotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Loads the caption font from a ttf/otf file.
    pub fn with_font_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {path:?}"))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("Failed to parse font {path:?}"))?;
        Ok(Self::new(Some(font)))
    }

    /// Uses the font at `path` if it loads, otherwise falls back to boxes only.
    pub fn with_font_or_boxes_only(path: &Path) -> Self {
        match Self::with_font_file(path) {
            Ok(annotator) => {
                log::debug!("Loaded caption font from {path:?}");
                annotator
            }
            Err(e) => {
                log::warn!("{e:#}; drawing boxes without captions");
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Invokes the detector once on `frame` and renders what it found.
    pub fn annotate<D: Detector + ?Sized>(
        &self,
        detector: &mut D,
        frame: &RgbImage,
        threshold: Threshold,
    ) -> anyhow::Result<AnnotatedFrame> {
        let detections = self.detect(detector, frame, threshold)?;
        let image = self.draw(frame, &detections);
        Ok(AnnotatedFrame { detections, image })
    }

    /// Detections on `frame` at or above `threshold`, every one labelled.
    pub fn detect<D: Detector + ?Sized>(
        &self,
        detector: &mut D,
        frame: &RgbImage,
        threshold: Threshold,
    ) -> anyhow::Result<Vec<Detection>> {
        let mut detections = detector
            .detect(frame, threshold)
            .context("Inference failed")?;
        detections.retain(|d| threshold.admits(d.confidence()));
        for det in detections.iter_mut().filter(|d| d.label.is_empty()) {
            det.label = detector
                .class_name(det.class_idx)
                .unwrap_or("unknown")
                .to_owned();
        }
        Ok(detections)
    }

    /// A copy of `frame` with `detections` drawn on it.
    pub fn draw(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut image = frame.clone();
        for det in detections {
            self.draw_detection(&mut image, det);
        }
        image
    }

    fn draw_detection(&self, image: &mut RgbImage, det: &Detection) {
        let (img_w, img_h) = image.dimensions();
        let b = det.bbox.clamp_to(img_w as f32, img_h as f32);
        let color = class_color(det.class_idx);

        let x = b.xmin.round() as i32;
        let y = b.ymin.round() as i32;
        let w = b.width().round() as u32;
        let h = b.height().round() as u32;
        for inset in 0..BOX_THICKNESS {
            let (iw, ih) = (
                w.saturating_sub(2 * inset as u32),
                h.saturating_sub(2 * inset as u32),
            );
            if iw == 0 || ih == 0 {
                break;
            }
            draw_hollow_rect_mut(image, Rect::at(x + inset, y + inset).of_size(iw, ih), color);
        }

        let Some(font) = &self.font else {
            return;
        };
        let caption = format!("{} {:.2}", det.label, det.confidence());
        let scale = PxScale::from(LABEL_SCALE);
        let (text_w, text_h) = text_size(scale, font, &caption);
        let bg_w = text_w + 2 * LABEL_PADDING as u32;
        let bg_h = text_h + 2 * LABEL_PADDING as u32;
        // Above the box when there is room, inside it otherwise.
        let label_y = if y >= bg_h as i32 { y - bg_h as i32 } else { y };
        draw_filled_rect_mut(image, Rect::at(x, label_y).of_size(bg_w, bg_h), color);
        draw_text_mut(
            image,
            TEXT_COLOR,
            x + LABEL_PADDING,
            label_y + LABEL_PADDING,
            scale,
            font,
            &caption,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;
    use crate::testing::ScriptedDetector;

    fn gray_frame() -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([40, 40, 40]))
    }

    #[test]
    fn test_no_detections_leaves_frame_untouched() {
        let mut detector = ScriptedDetector::new(vec![vec![]]);
        let frame = gray_frame();
        let out = FrameAnnotator::default()
            .annotate(&mut detector, &frame, Threshold::default())
            .unwrap();
        assert!(out.detections.is_empty());
        assert_eq!(out.image, frame);
    }

    #[test]
    fn test_boxes_are_drawn_and_low_scores_dropped() {
        let mut detector = ScriptedDetector::new(vec![vec![
            (0, Bbox::new(10.0, 10.0, 30.0, 30.0, 0.9)),
            (2, Bbox::new(40.0, 5.0, 60.0, 20.0, 0.3)),
        ]])
        .ignoring_threshold();
        let frame = gray_frame();
        let out = FrameAnnotator::default()
            .annotate(&mut detector, &frame, Threshold::new(0.5).unwrap())
            .unwrap();

        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].label, "person");
        assert_eq!(*out.image.get_pixel(10, 10), class_color(0));
        assert_eq!(*out.image.get_pixel(11, 20), class_color(0));
        // interior and the rejected box stay as they were
        assert_eq!(out.image.get_pixel(20, 20), frame.get_pixel(20, 20));
        assert_eq!(out.image.get_pixel(40, 5), frame.get_pixel(40, 5));
    }

    #[test]
    fn test_box_outside_frame_is_clamped() {
        let mut detector =
            ScriptedDetector::new(vec![vec![(1, Bbox::new(-20.0, -20.0, 100.0, 100.0, 0.8))]]);
        let out = FrameAnnotator::default()
            .annotate(&mut detector, &gray_frame(), Threshold::default())
            .unwrap();
        assert_eq!(*out.image.get_pixel(0, 0), class_color(1));
        assert_eq!(*out.image.get_pixel(63, 47), class_color(1));
    }

    #[test]
    fn test_missing_font_falls_back_to_boxes() {
        let annotator = FrameAnnotator::with_font_or_boxes_only(Path::new("/nonexistent/font.ttf"));
        assert!(!annotator.has_font());
    }
}
