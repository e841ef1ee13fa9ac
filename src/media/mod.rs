//! Application side of a codec pipeline:
//!
//! ```text
//! InputConfig ──► MediaSource ──► CodecSession ──► FanoutSink ─┬─► LogSink
//!                                 (engine per input)            └─► RawSinkSource ─► Stream
//! ```

pub mod pipe;
pub mod stream;
pub mod types;
