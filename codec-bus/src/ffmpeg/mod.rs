//! FFmpeg-backed demuxer source and decoder engine.

mod decoder;
mod hw;
mod input;

pub use decoder::FfmpegDecoder;
pub use hw::find_hw_decoder;
pub use input::FfmpegSource;

/// Registers FFmpeg components. Call once at startup before opening files.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub(crate) const MICROS: ffmpeg_next::Rational = ffmpeg_next::Rational(1, 1_000_000);

#[cfg(test)]
#[path = "ffmpeg_test.rs"]
mod ffmpeg_test;
