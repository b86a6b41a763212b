//! Shared building blocks for running a detector over video frames:
//! detections, the per-label tally, frame annotation and the pipeline loop
//! that ties a frame source, a detector and a frame sink together.

pub mod annotate;
pub mod bbox;
pub mod coco_classes;
pub mod detector;
pub mod error;
pub mod frame_meta;
pub mod frame_times;
pub mod pipeline;
pub mod progress;
pub mod tally;
pub mod threshold;
pub mod video;
pub mod video_meta;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
