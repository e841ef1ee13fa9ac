//! Buffer-exchange codec sessions: an application fills input slots, a device
//! worker runs them through a codec engine and hands back output slots.

pub mod color;
pub mod device;
pub mod engine;
pub mod error;
pub mod exchange;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod slot;
pub mod source;

pub use error::CodecError;
