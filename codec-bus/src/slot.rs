use bytes::BytesMut;

bitflags::bitflags! {
    /// Per-buffer flags. Values match the MediaCodec `BUFFER_FLAG_*` bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const KEY_FRAME = 0x1;
        const CODEC_CONFIG = 0x2;
        const END_OF_STREAM = 0x4;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotOwner {
    Device,
    Application,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotSide {
    Input,
    Output,
}

/// Metadata describing the payload of a filled buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(size: usize, pts_us: i64, flags: BufferFlags) -> Self {
        Self {
            size,
            pts_us,
            flags,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

/// Snapshot of one buffer slot as the exchange sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSlot {
    pub index: usize,
    pub side: SlotSide,
    pub capacity: usize,
    /// False while the slot's contents are stale (never filled, or flushed).
    pub valid: bool,
    pub info: BufferInfo,
    pub owner: SlotOwner,
}

/// An input buffer lent to the application.
///
/// The payload storage moves with the handle: while the application holds an
/// `InputSlot` the device has no copy of it, and handing it back goes through
/// `submit_input`.
#[derive(Debug)]
pub struct InputSlot {
    pub(crate) index: usize,
    pub(crate) exchange_id: u64,
    pub(crate) epoch: u64,
    pub(crate) buffer: BytesMut,
}

impl InputSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// Copies `data` to the start of the buffer, returning the bytes written.
    /// Returns `None` when `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> Option<usize> {
        if data.len() > self.buffer.len() {
            return None;
        }
        self.buffer[..data.len()].copy_from_slice(data);
        Some(data.len())
    }
}

/// A filled output buffer lent to the application.
#[derive(Debug)]
pub struct OutputSlot {
    pub(crate) index: usize,
    pub(crate) exchange_id: u64,
    pub(crate) epoch: u64,
    pub(crate) buffer: BytesMut,
    pub(crate) info: BufferInfo,
}

impl OutputSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> BufferInfo {
        self.info
    }

    pub fn size(&self) -> usize {
        self.info.size
    }

    pub fn pts_us(&self) -> i64 {
        self.info.pts_us
    }

    pub fn flags(&self) -> BufferFlags {
        self.info.flags
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.info.is_end_of_stream()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.info.size]
    }
}
