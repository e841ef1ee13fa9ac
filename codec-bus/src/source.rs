use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    color::ColorFormat,
    format::{MIME_VIDEO_RAW, MediaFormat},
    slot::BufferFlags,
};

/// Describes a sample written into an input buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

/// Producer of raw media samples feeding a session's input side.
pub trait MediaSource: Send + 'static {
    /// Format of the samples this source yields.
    fn format(&self) -> MediaFormat;

    /// Writes the next sample into `buf`. Returns `None` once exhausted.
    fn read_sample(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<SampleInfo>>;
}

impl<T: MediaSource + ?Sized> MediaSource for Box<T> {
    fn format(&self) -> MediaFormat {
        (**self).format()
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<SampleInfo>> {
        (**self).read_sample(buf)
    }
}

/// Serves a fixed list of in-memory chunks with evenly spaced timestamps.
pub struct ChunkSource {
    format: MediaFormat,
    chunks: VecDeque<Bytes>,
    frame_duration_us: i64,
    next_pts_us: i64,
}

impl ChunkSource {
    pub fn new(format: MediaFormat, chunks: Vec<Bytes>, frame_duration_us: i64) -> Self {
        Self {
            format,
            chunks: chunks.into(),
            frame_duration_us,
            next_pts_us: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl MediaSource for ChunkSource {
    fn format(&self) -> MediaFormat {
        self.format.clone()
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<SampleInfo>> {
        let Some(chunk) = self.chunks.pop_front() else {
            return Ok(None);
        };
        if chunk.len() > buf.len() {
            return Err(anyhow::anyhow!(
                "chunk of {} bytes does not fit a {} byte buffer",
                chunk.len(),
                buf.len()
            ));
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        let pts_us = self.next_pts_us;
        self.next_pts_us += self.frame_duration_us;
        Ok(Some(SampleInfo {
            size: chunk.len(),
            pts_us,
            flags: BufferFlags::empty(),
        }))
    }
}

/// Synthetic YUV 4:2:0 frames whose content encodes the frame number.
///
/// Bytes 0..4 of each frame hold the frame number (little endian) and the
/// rest of the luma plane is filled with `number % 256`, so a consumer can
/// check ordering and loss without decoding anything.
pub struct FrameCountSource {
    width: u32,
    height: u32,
    fps: u32,
    frames: u64,
    next: u64,
    resize: Option<(u64, u32, u32)>,
}

impl FrameCountSource {
    pub fn new(width: u32, height: u32, fps: u32, frames: u64) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            frames,
            next: 0,
            resize: None,
        }
    }

    /// Frames from `at_frame` on use the new size.
    pub fn with_resolution_change(mut self, at_frame: u64, width: u32, height: u32) -> Self {
        self.resize = Some((at_frame, width, height));
        self
    }

    fn size_for(&self, frame: u64) -> (u32, u32) {
        match self.resize {
            Some((at, w, h)) if frame >= at => (w, h),
            _ => (self.width, self.height),
        }
    }

    /// Format that frames from `frame` on are produced in.
    pub fn format_at(&self, frame: u64) -> MediaFormat {
        let (width, height) = self.size_for(frame);
        MediaFormat::video(MIME_VIDEO_RAW, width, height)
            .with_frame_rate(self.fps)
            .with_color_format(ColorFormat::Yuv420Planar)
    }

    /// Largest frame this source will produce.
    pub fn max_frame_size(&self) -> usize {
        let (w, h) = self.size_for(u64::MAX);
        let first = frame_size(self.width, self.height);
        first.max(frame_size(w, h))
    }

    /// Frame number encoded in a frame produced by this source.
    pub fn frame_number(data: &[u8]) -> Option<u32> {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

fn frame_size(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    luma + luma / 2
}

impl MediaSource for FrameCountSource {
    fn format(&self) -> MediaFormat {
        self.format_at(0)
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> anyhow::Result<Option<SampleInfo>> {
        if self.next >= self.frames {
            return Ok(None);
        }
        let number = self.next;
        let (width, height) = self.size_for(number);
        let size = frame_size(width, height);
        if size > buf.len() {
            return Err(anyhow::anyhow!(
                "frame {} of {} bytes does not fit a {} byte buffer",
                number,
                size,
                buf.len()
            ));
        }
        let luma = width as usize * height as usize;
        buf[..luma].fill((number % 256) as u8);
        buf[luma..size].fill(128);
        let n = size.min(4);
        buf[..n].copy_from_slice(&(number as u32).to_le_bytes()[..n]);

        self.next += 1;
        let flags = if number == 0 || self.resize.map(|(at, _, _)| at) == Some(number) {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::empty()
        };
        Ok(Some(SampleInfo {
            size,
            pts_us: number as i64 * 1_000_000 / self.fps as i64,
            flags,
        }))
    }
}
