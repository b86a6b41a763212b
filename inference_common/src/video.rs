//! Seams between the pipeline and whatever decodes/encodes the video.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Stream properties of an opened video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Not every container reports a frame count, and some report a wrong one.
    pub total_frames: Option<u64>,
}

/// A finite, non-restartable stream of RGB frames.
///
/// Handles are released when the source is dropped.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next frame, or `Ok(None)` once the stream is exhausted.
    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;
}

/// Destination for annotated frames, configured with the source's resolution.
pub trait FrameSink {
    /// Appends one frame; it must match the configured resolution.
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()>;

    /// Flushes and finalizes the output. Calling it again is a no-op.
    fn finish(&mut self) -> anyhow::Result<()>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn info(&self) -> VideoInfo {
        (**self).info()
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        (**self).read_frame()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish()
    }
}
