use crate::{format::MediaFormat, slot::BufferFlags};

/// One output buffer forwarded to a sink. Borrowed from the output slot,
/// which goes back to the device as soon as `on_frame` returns.
#[derive(Debug)]
pub struct OutputFrame<'a> {
    pub index: usize,
    pub data: &'a [u8],
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl OutputFrame<'_> {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_key(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }
}

/// Consumer of a session's output side.
pub trait MediaSink: Send + 'static {
    /// Called before the first buffer in `format` is forwarded.
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()>;

    /// Consumes one buffer. Return `true` to have it rendered on release.
    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool>;

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: MediaSink + ?Sized> MediaSink for Box<T> {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        (**self).on_format_changed(format)
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        (**self).on_frame(frame)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        (**self).on_end_of_stream()
    }
}

/// Logs every frame that becomes available and renders it.
#[derive(Default)]
pub struct LogSink {
    frames: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl MediaSink for LogSink {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        log::info!("output format changed to {}", format);
        Ok(())
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        self.frames += 1;
        log::info!(
            "frame available, index={}, pts={}us, size={}",
            frame.index,
            frame.pts_us,
            frame.data.len()
        );
        Ok(true)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        log::info!("end of stream after {} frames", self.frames);
        Ok(())
    }
}
