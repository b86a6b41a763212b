use std::path::{Path, PathBuf};

use anyhow::Context as _;
use ffmpeg::format::{self, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{Packet, Rational};
use image::RgbImage;
use inference_common::error::PipelineError;
use inference_common::video::{FrameSource, VideoInfo};

/// Used when a stream does not report any usable frame rate.
pub const FALLBACK_FPS: u32 = 30;

/// Decodes the best video stream of a file into RGB frames.
///
/// The demuxer, decoder and scaler are freed when the reader is dropped.
pub struct VideoReader {
    path: PathBuf,
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Scaler,
    stream_index: usize,
    info: VideoInfo,
    eof_sent: bool,
}

impl VideoReader {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        crate::init().map_err(|e| PipelineError::open(path, e))?;

        let ictx = format::input(&path).map_err(|e| PipelineError::open(path, e))?;
        let input = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| PipelineError::open(path, "no video stream"))?;
        let stream_index = input.index();

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(input.parameters())
            .map_err(|e| PipelineError::open(path, e))?;
        let decoder = context_decoder
            .decoder()
            .video()
            .map_err(|e| PipelineError::open(path, e))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(PipelineError::open(path, "video stream has no dimensions"));
        }

        let fps = stream_fps(input.avg_frame_rate(), input.rate()).unwrap_or_else(|| {
            log::warn!("{path:?} reports no frame rate, assuming {FALLBACK_FPS}");
            FALLBACK_FPS
        });
        let stream_secs = (input.duration() > 0)
            .then(|| input.duration() as f64 * f64::from(input.time_base()));
        let container_secs = (ictx.duration() > 0)
            .then(|| ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));
        let total_frames = frame_count(input.frames(), stream_secs.or(container_secs), fps);

        let scaler = Scaler::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::open(path, e))?;

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames,
        };
        log::debug!("Opened {path:?}: {info:?}");

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            scaler,
            stream_index,
            info,
            eof_sent: false,
        })
    }

    fn to_rgb_image(&mut self, decoded: &Video) -> anyhow::Result<RgbImage> {
        let mut rgb_frame = Video::empty();
        self.scaler.run(decoded, &mut rgb_frame)?;

        // rows may be padded past width * 3
        let (width, height) = (rgb_frame.width(), rgb_frame.height());
        let stride = rgb_frame.stride(0);
        let row_len = width as usize * 3;
        let mut raw = Vec::with_capacity(row_len * height as usize);
        for row in rgb_frame.data(0).chunks(stride).take(height as usize) {
            raw.extend_from_slice(&row[..row_len]);
        }
        RgbImage::from_raw(width, height, raw).context("Decoded frame has unexpected size")
    }
}

impl FrameSource for VideoReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        let mut decoded = Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.to_rgb_image(&decoded).map(Some),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {}
                Err(e) => return Err(e).context("Decoder failed"),
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) if packet.stream() == self.stream_index => {
                    match self.decoder.send_packet(&packet) {
                        Ok(()) => {}
                        Err(ffmpeg::Error::InvalidData) => {
                            log::warn!("Skipping corrupt packet in {:?}", self.path);
                        }
                        Err(e) => return Err(e).context("Failed to send packet to decoder"),
                    }
                }
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Err(e) => return Err(e).context("Failed to read packet"),
            }
        }
    }
}

/// Integer frame rate, preferring the average rate over the base rate.
fn stream_fps(avg_frame_rate: Rational, base_rate: Rational) -> Option<u32> {
    [avg_frame_rate, base_rate]
        .into_iter()
        .filter(|r| r.numerator() > 0 && r.denominator() > 0)
        .map(|r| (f64::from(r) as u32).max(1))
        .next()
}

/// The container's frame count when it has one, else an estimate from duration.
fn frame_count(reported: i64, duration_secs: Option<f64>, fps: u32) -> Option<u64> {
    if reported > 0 {
        return Some(reported as u64);
    }
    duration_secs
        .map(|secs| (secs * fps as f64).round())
        .filter(|n| *n >= 1.0)
        .map(|n| n as u64)
}
