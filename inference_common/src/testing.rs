//! Test doubles: a detector with scripted per-frame output and in-memory
//! frame source/sink.

use std::collections::VecDeque;

use anyhow::bail;
use image::{Rgb, RgbImage};

use crate::bbox::Bbox;
use crate::coco_classes;
use crate::detector::{Detection, Detector};
use crate::threshold::Threshold;
use crate::video::{FrameSink, FrameSource, VideoInfo};

/// Returns a fixed list of `(class_idx, bbox)` per call, in order.
/// Once the script runs out every further frame has no detections.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    script: VecDeque<Vec<(usize, Bbox)>>,
    apply_threshold: bool,
    pub calls: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<(usize, Bbox)>>) -> Self {
        Self {
            script: script.into(),
            apply_threshold: true,
            calls: 0,
        }
    }

    /// Returns scripted boxes even when they fall below the threshold.
    pub fn ignoring_threshold(mut self) -> Self {
        self.apply_threshold = false;
        self
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbImage, threshold: Threshold) -> anyhow::Result<Vec<Detection>> {
        self.calls += 1;
        let frame = self.script.pop_front().unwrap_or_default();
        Ok(frame
            .into_iter()
            .filter(|(_, b)| !self.apply_threshold || threshold.admits(b.confidence))
            .map(|(class_idx, bbox)| Detection {
                class_idx,
                label: String::new(),
                bbox,
            })
            .collect())
    }

    fn class_name(&self, class_idx: usize) -> Option<&str> {
        coco_classes::NAMES.get(class_idx).copied()
    }
}

/// A detector whose inference always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenDetector;

impl Detector for BrokenDetector {
    fn detect(&mut self, _frame: &RgbImage, _threshold: Threshold) -> anyhow::Result<Vec<Detection>> {
        bail!("model exploded")
    }

    fn class_name(&self, _class_idx: usize) -> Option<&str> {
        None
    }
}

/// Serves pre-built frames.
#[derive(Debug, Clone)]
pub struct MemorySource {
    info: VideoInfo,
    frames: VecDeque<RgbImage>,
    fail_after: Option<usize>,
    served: usize,
}

impl MemorySource {
    /// `count` solid frames whose red channel is the frame index.
    pub fn solid(count: usize, width: u32, height: u32, fps: u32) -> Self {
        let frames = (0..count)
            .map(|i| RgbImage::from_pixel(width, height, Rgb([i as u8, 64, 128])))
            .collect();
        Self {
            info: VideoInfo {
                width,
                height,
                fps,
                total_frames: Some(count as u64),
            },
            frames,
            fail_after: None,
            served: 0,
        }
    }

    pub fn with_total_frames(mut self, total: Option<u64>) -> Self {
        self.info.total_frames = total;
        self
    }

    /// Reports a decode error after `n` frames were served.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn frames(&self) -> impl Iterator<Item = &RgbImage> {
        self.frames.iter()
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        if self.fail_after == Some(self.served) {
            bail!("corrupt packet after frame {}", self.served);
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.served += 1;
        }
        Ok(frame)
    }
}

/// Collects written frames and counts `finish` calls.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finish_calls: usize,
    dims: Option<(u32, u32)>,
}

impl MemorySink {
    /// A sink that rejects frames of any other size, like a real encoder.
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            dims: Some((width, height)),
            ..Self::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_calls > 0
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        if self.is_finished() {
            bail!("write after finish");
        }
        if let Some(dims) = self.dims {
            if frame.dimensions() != dims {
                bail!("frame is {:?}, sink expects {dims:?}", frame.dimensions());
            }
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.finish_calls += 1;
        Ok(())
    }
}
