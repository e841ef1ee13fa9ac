use futures::Stream;
use std::{
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use crate::media::types::VideoRawFrame;

/// Channel carrying frames from a pipeline's output context to async
/// consumers. The stream ends once the producer calls `finish`.
pub struct RawSinkSource {
    writer: Mutex<Option<tokio::sync::mpsc::Sender<VideoRawFrame>>>,
    inner: Mutex<tokio::sync::mpsc::Receiver<VideoRawFrame>>,
}

impl RawSinkSource {
    pub fn new() -> Self {
        Self::with_capacity(32)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (writer, receiver) = tokio::sync::mpsc::channel(buffer_size);
        Self {
            writer: Mutex::new(Some(writer)),
            inner: Mutex::new(receiver),
        }
    }

    fn writer(&self) -> Option<tokio::sync::mpsc::Sender<VideoRawFrame>> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Blocks until there is room for `frame`. Must not be called from an
    /// async context. Returns false once the sink is finished or no longer
    /// read.
    pub fn push_blocking(&self, frame: VideoRawFrame) -> bool {
        match self.writer() {
            Some(writer) => writer.blocking_send(frame).is_ok(),
            None => false,
        }
    }

    /// Closes the channel; readers see the end of the stream after the
    /// frames already queued.
    pub fn finish(&self) {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Returns a stream that yields VideoRawFrame. Use this when you have `Arc<RawSinkSource>`.
    pub fn as_stream(this: Arc<Self>) -> RawSinkSourceStream {
        RawSinkSourceStream(this)
    }
}

impl Default for RawSinkSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper to use `Arc<RawSinkSource>` as Stream (orphan rule workaround).
pub struct RawSinkSourceStream(pub Arc<RawSinkSource>);

impl Stream for RawSinkSourceStream {
    type Item = VideoRawFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut guard = self.0.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.poll_recv(cx)
    }
}
