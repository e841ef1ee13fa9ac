use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use codec_bus::{color::ColorFormat, exchange::ExchangeConfig, pipeline::PipelineSettings};
use serde::{Deserialize, Serialize};

use crate::media::stream::RawSinkSource;

/// Synthetic resolution switch, applied from `at_frame` on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub at_frame: u64,
    pub width: u32,
    pub height: u32,
}

/// Input configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Container file, decoded with FFmpeg (needs the `ffmpeg` feature)
    File {
        path: String,
        #[serde(default = "default_true")]
        prefer_hardware: bool,
    },
    /// Generated frame-counter video run through the passthrough engine
    Synthetic {
        width: u32,
        height: u32,
        fps: u32,
        frames: u64,
        #[serde(default)]
        resize: Option<Resize>,
    },
}

fn default_true() -> bool {
    true
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig::Synthetic {
            width: 320,
            height: 240,
            fps: 30,
            frames: 90,
            resize: None,
        }
    }
}

/// Output destination
#[derive(Clone)]
pub enum OutputDest {
    /// Log each available frame and render it
    Log,
    /// Raw frame data sink
    RawFrame { sink: Arc<RawSinkSource> },
}

/// Pipeline configuration
pub struct PipeConfig {
    pub input: InputConfig,
    pub outputs: Vec<OutputDest>,
    pub exchange: ExchangeConfig,
    pub settings: PipelineSettings,
}

/// One decoded frame handed to a raw frame sink.
#[derive(Clone, Debug, Default)]
pub struct VideoRawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub color_format: Option<ColorFormat>,
    pub pts_us: i64,
    pub is_key: bool,
}

impl VideoRawFrame {
    /// Luma plane of a planar or semi-planar YUV frame.
    pub fn luma(&self) -> Option<&[u8]> {
        let size = self.width as usize * self.height as usize;
        self.data.get(..size)
    }
}

impl Display for VideoRawFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoRawFrame {{ {}x{}, pts: {}us, data: {} }}",
            self.width,
            self.height,
            self.pts_us,
            self.data.len()
        )
    }
}
