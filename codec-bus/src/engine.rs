use bytes::Bytes;

use crate::{
    format::{CodecMode, MediaFormat},
    slot::{BufferFlags, BufferInfo},
};

/// One input buffer as seen by an engine.
pub struct EngineInput<'a> {
    pub data: &'a [u8],
    pub pts_us: i64,
    pub flags: BufferFlags,
}

/// Something an engine produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineOutput {
    Buffer { data: Bytes, info: BufferInfo },
    FormatChanged(MediaFormat),
}

impl EngineOutput {
    pub fn buffer(data: impl Into<Bytes>, pts_us: i64, flags: BufferFlags) -> Self {
        let data = data.into();
        let info = BufferInfo::new(data.len(), pts_us, flags);
        EngineOutput::Buffer { data, info }
    }
}

/// The codec algorithm a device runs.
///
/// Engines are driven from the device worker thread only; they never see the
/// buffer slots themselves.
pub trait CodecEngine: Send + 'static {
    fn name(&self) -> &str;

    /// Prepares the engine and returns the format of its first output.
    fn configure(&mut self, format: &MediaFormat, mode: CodecMode) -> anyhow::Result<MediaFormat>;

    /// Consumes one input buffer.
    fn process(&mut self, input: EngineInput<'_>, out: &mut Vec<EngineOutput>)
    -> anyhow::Result<()>;

    /// Emits whatever is still buffered once input has ended.
    fn drain(&mut self, out: &mut Vec<EngineOutput>) -> anyhow::Result<()>;

    /// Drops all buffered state, keeping the configuration.
    fn reset(&mut self) -> anyhow::Result<()>;
}

/// Copies every input buffer to the output unchanged.
///
/// Optionally switches to a new output format after a given number of
/// frames, the way a decoder reports a mid-stream resolution change.
pub struct PassthroughEngine {
    format: Option<MediaFormat>,
    frames: u64,
    scheduled_change: Option<(u64, MediaFormat)>,
    max_frame_size: Option<usize>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        Self {
            format: None,
            frames: 0,
            scheduled_change: None,
            max_frame_size: None,
        }
    }

    /// Reports `format` before the output of frame number `after_frames`.
    pub fn with_format_change(mut self, after_frames: u64, format: MediaFormat) -> Self {
        self.scheduled_change = Some((after_frames, format));
        self
    }

    /// Rejects input larger than `size`, as a device would on corrupt data.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for PassthroughEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecEngine for PassthroughEngine {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn configure(&mut self, format: &MediaFormat, mode: CodecMode) -> anyhow::Result<MediaFormat> {
        log::debug!("passthrough configured as {:?} for {}", mode, format);
        self.format = Some(format.clone());
        self.frames = 0;
        Ok(format.clone())
    }

    fn process(
        &mut self,
        input: EngineInput<'_>,
        out: &mut Vec<EngineOutput>,
    ) -> anyhow::Result<()> {
        if input.data.is_empty() {
            return Ok(());
        }
        if let Some(max) = self.max_frame_size {
            if input.data.len() > max {
                return Err(anyhow::anyhow!(
                    "frame of {} bytes exceeds {} byte limit",
                    input.data.len(),
                    max
                ));
            }
        }
        if let Some((after, format)) = &self.scheduled_change {
            if self.frames == *after && self.format.as_ref() != Some(format) {
                self.format = Some(format.clone());
                out.push(EngineOutput::FormatChanged(format.clone()));
            }
        }
        self.frames += 1;
        let flags = input.flags & BufferFlags::KEY_FRAME;
        out.push(EngineOutput::buffer(
            Bytes::copy_from_slice(input.data),
            input.pts_us,
            flags,
        ));
        Ok(())
    }

    fn drain(&mut self, _out: &mut Vec<EngineOutput>) -> anyhow::Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
