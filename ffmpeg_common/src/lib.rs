//! Video decoding/encoding with ffmpeg, exposed as frame sources and sinks.

extern crate ffmpeg_next as ffmpeg;

pub mod decode;
pub mod encode;

pub use decode::VideoReader;
pub use encode::VideoWriter;

/// Initializes ffmpeg and quiets its own logging. Safe to call repeatedly.
pub fn init() -> Result<(), ffmpeg::Error> {
    ffmpeg::init()?;
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}
