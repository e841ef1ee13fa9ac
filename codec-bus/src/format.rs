use std::fmt::{Display, Formatter};

use crate::color::ColorFormat;

pub const MIME_VIDEO_RAW: &str = "video/raw";
pub const MIME_AUDIO_RAW: &str = "audio/raw";
pub const MIME_VIDEO_AVC: &str = "video/avc";
pub const MIME_VIDEO_HEVC: &str = "video/hevc";

/// Whether a session consumes compressed data or produces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecMode {
    Decoder,
    Encoder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Immutable description of a media stream.
///
/// Built once at configuration time; a device that renegotiates mid-stream
/// hands out a new value rather than mutating the old one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MediaFormat {
    mime: String,
    kind: TrackKind,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    // bps
    bitrate: Option<u64>,
    // frames per second, video only
    frame_rate: Option<u32>,
    max_input_size: Option<usize>,
    color_format: Option<ColorFormat>,
}

impl MediaFormat {
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            kind: TrackKind::Video,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            bitrate: None,
            frame_rate: None,
            max_input_size: None,
            color_format: None,
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime: mime.into(),
            kind: TrackKind::Audio,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            bitrate: None,
            frame_rate: None,
            max_input_size: None,
            color_format: None,
        }
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = Some(size);
        self
    }

    pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
        self.color_format = Some(color_format);
        self
    }

    /// Same stream parameters with a new picture size.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bitrate(&self) -> Option<u64> {
        self.bitrate
    }

    pub fn frame_rate(&self) -> Option<u32> {
        self.frame_rate
    }

    pub fn max_input_size(&self) -> Option<usize> {
        self.max_input_size
    }

    pub fn color_format(&self) -> Option<ColorFormat> {
        self.color_format
    }

    /// Size of one raw frame, if the color format and geometry pin it down.
    pub fn frame_size(&self) -> Option<usize> {
        self.color_format
            .and_then(|c| c.frame_size(self.width, self.height))
    }
}

impl Display for MediaFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TrackKind::Video => write!(f, "{} {}x{}", self.mime, self.width, self.height)?,
            TrackKind::Audio => write!(
                f,
                "{} {}Hz {}ch",
                self.mime, self.sample_rate, self.channels
            )?,
        }
        if let Some(fps) = self.frame_rate {
            write!(f, " @{}fps", fps)?;
        }
        if let Some(bitrate) = self.bitrate {
            write!(f, " {}bps", bitrate)?;
        }
        if let Some(color) = self.color_format {
            write!(f, " {}", color)?;
        }
        Ok(())
    }
}
