use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use ffmpeg::format::{self, Pixel};
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, Packet, Rational};
use image::RgbImage;
use inference_common::error::PipelineError;
use inference_common::video::FrameSink;

const MIN_BIT_RATE: usize = 400_000;

/// Encodes RGB frames as MPEG-4 part 2 (`mp4v`) into a container picked from
/// the output file extension.
///
/// The container trailer is written by `finish`, or on drop if the caller
/// never got to it.
pub struct VideoWriter {
    path: PathBuf,
    octx: format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: Scaler,
    stream_index: usize,
    width: u32,
    height: u32,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    next_pts: i64,
    finished: bool,
}

impl VideoWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(PipelineError::create(
                path,
                format!("invalid output format {width}x{height} @ {fps} fps"),
            ));
        }
        crate::init().map_err(|e| PipelineError::create(path, e))?;
        let fail = |e: ffmpeg::Error| PipelineError::create(path, e);

        let mut octx = format::output(&path).map_err(fail)?;
        let codec = ffmpeg::encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| PipelineError::create(path, "mpeg4 encoder is unavailable"))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut ost = octx.add_stream(codec).map_err(fail)?;
        let stream_index = ost.index();
        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(fail)?;

        let time_base = Rational::new(1, fps as i32);
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        encoder.set_bit_rate(bit_rate(width, height, fps));
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_as(codec).map_err(fail)?;
        ost.set_parameters(&encoder);
        ost.set_time_base(time_base);

        octx.write_header().map_err(fail)?;
        // the muxer may have picked its own time base
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(time_base);

        let scaler = Scaler::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(fail)?;

        log::debug!("Created {path:?}: {width}x{height} @ {fps} fps");
        Ok(Self {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            stream_index,
            width,
            height,
            encoder_time_base: time_base,
            stream_time_base,
            next_pts: 0,
            finished: false,
        })
    }

    /// Number of frames handed to the encoder so far.
    pub fn frames_written(&self) -> u64 {
        self.next_pts as u64
    }

    fn write_encoded_packets(&mut self) -> anyhow::Result<()> {
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.stream_index);
            encoded.rescale_ts(self.encoder_time_base, self.stream_time_base);
            encoded
                .write_interleaved(&mut self.octx)
                .context("Failed to write packet")?;
        }
        Ok(())
    }
}

impl FrameSink for VideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        if self.finished {
            bail!("{:?} is already finalized", self.path);
        }
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {:?}, output expects {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            );
        }

        let mut rgb_frame = Video::new(Pixel::RGB24, self.width, self.height);
        let stride = rgb_frame.stride(0);
        let row_len = self.width as usize * 3;
        for (dst, src) in rgb_frame
            .data_mut(0)
            .chunks_mut(stride)
            .zip(frame.as_raw().chunks(row_len))
        {
            dst[..row_len].copy_from_slice(src);
        }

        let mut yuv_frame = Video::empty();
        self.scaler.run(&rgb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv_frame)
            .context("Failed to send frame to encoder")?;
        self.write_encoded_packets()
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof()?;
        self.write_encoded_packets()?;
        self.octx
            .write_trailer()
            .with_context(|| format!("Failed to finalize {:?}", self.path))?;
        log::debug!("Finalized {:?} with {} frames", self.path, self.next_pts);
        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("{e:#}");
        }
    }
}

fn bit_rate(width: u32, height: u32, fps: u32) -> usize {
    (width as usize * height as usize * fps as usize / 8).max(MIN_BIT_RATE)
}
