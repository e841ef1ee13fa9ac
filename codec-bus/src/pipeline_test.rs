use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;

use super::*;
use crate::{
    engine::{CodecEngine, EngineInput, EngineOutput, PassthroughEngine},
    exchange::ExchangeConfig,
    format::{CodecMode, MIME_VIDEO_RAW, MediaFormat},
    sink::LogSink,
    slot::{SlotOwner, SlotSide},
    source::{ChunkSource, FrameCountSource},
};

fn pool(capacity: usize) -> ExchangeConfig {
    ExchangeConfig {
        input_slots: 3,
        output_slots: 3,
        input_capacity: capacity,
        output_capacity: capacity,
    }
}

fn configured(engine: impl CodecEngine, format: MediaFormat, capacity: usize) -> Arc<CodecSession> {
    let session = CodecSession::with_config(Box::new(engine), pool(capacity));
    session.configure(format, CodecMode::Decoder).unwrap();
    Arc::new(session)
}

fn settings(timeout_ms: u64, max_retries: u32) -> PipelineSettings {
    PipelineSettings {
        timeout: Duration::from_millis(timeout_ms),
        max_retries,
    }
}

fn codec_error(err: &anyhow::Error) -> Option<&CodecError> {
    err.downcast_ref::<CodecError>()
}

/// Records what the output context forwards, checking frame sizes against
/// the format last announced.
#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<String>>>,
    format: Option<MediaFormat>,
    ended: Arc<Mutex<u32>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn ended(&self) -> u32 {
        *self.ended.lock().unwrap()
    }
}

impl MediaSink for RecordingSink {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("format {}x{}", format.width(), format.height()));
        self.format = Some(format.clone());
        Ok(())
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("frame before any format"))?;
        if let Some(expected) = format.frame_size() {
            anyhow::ensure!(
                frame.data.len() == expected,
                "frame of {} bytes in {}",
                frame.data.len(),
                format
            );
        }
        let label = match FrameCountSource::frame_number(frame.data) {
            Some(n) if format.frame_size().is_some() => n.to_string(),
            _ => String::from_utf8_lossy(frame.data).into_owned(),
        };
        self.events.lock().unwrap().push(label);
        Ok(true)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        *self.ended.lock().unwrap() += 1;
        Ok(())
    }
}

/// Passthrough that takes a while per frame.
struct SlowEngine {
    inner: PassthroughEngine,
    delay: Duration,
}

impl CodecEngine for SlowEngine {
    fn name(&self) -> &str {
        "slow"
    }

    fn configure(&mut self, format: &MediaFormat, mode: CodecMode) -> anyhow::Result<MediaFormat> {
        self.inner.configure(format, mode)
    }

    fn process(
        &mut self,
        input: EngineInput<'_>,
        out: &mut Vec<EngineOutput>,
    ) -> anyhow::Result<()> {
        std::thread::sleep(self.delay);
        self.inner.process(input, out)
    }

    fn drain(&mut self, out: &mut Vec<EngineOutput>) -> anyhow::Result<()> {
        self.inner.drain(out)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.inner.reset()
    }
}

fn chunks(count: usize) -> Vec<Bytes> {
    (0..count).map(|i| Bytes::from(format!("chunk-{}", i))).collect()
}

#[tokio::test]
async fn test_chunks_reach_sink_with_single_end_of_stream() -> anyhow::Result<()> {
    let format = MediaFormat::video(MIME_VIDEO_RAW, 16, 16);
    let session = configured(PassthroughEngine::new(), format.clone(), 64);
    let pipeline = Pipeline::new(Arc::clone(&session), settings(50, 100));
    let sink = RecordingSink::default();

    let report = pipeline
        .run(ChunkSource::new(format, chunks(10), 33_333), sink.clone())
        .await?;

    assert_eq!(report.inputs_submitted, 11);
    assert_eq!(report.frames_forwarded, 10);
    assert_eq!(report.frames_rendered, 10);
    assert_eq!(report.format_changes, 1);
    assert!(report.end_of_stream);
    assert_eq!(sink.ended(), 1);

    let mut expected = vec!["format 16x16".to_string()];
    expected.extend((0..10).map(|i| format!("chunk-{}", i)));
    assert_eq!(sink.events(), expected);

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.owned_by(SlotSide::Input, SlotOwner::Application), 0);
    assert_eq!(session.owned_by(SlotSide::Output, SlotOwner::Application), 0);
    Ok(())
}

#[tokio::test]
async fn test_resolution_change_is_reported_before_new_frames() -> anyhow::Result<()> {
    let source = FrameCountSource::new(4, 4, 30, 6).with_resolution_change(3, 8, 8);
    let engine = PassthroughEngine::new().with_format_change(3, source.format_at(3));
    let session = configured(engine, source.format(), source.max_frame_size());
    let pipeline = Pipeline::new(session, settings(50, 100));
    let sink = RecordingSink::default();

    let report = pipeline.run(source, sink.clone()).await?;

    assert_eq!(report.format_changes, 2);
    assert_eq!(report.frames_forwarded, 6);
    assert_eq!(
        sink.events(),
        vec!["format 4x4", "0", "1", "2", "format 8x8", "3", "4", "5"]
    );
    Ok(())
}

#[tokio::test]
async fn test_cancellation_stops_the_session() {
    let source = FrameCountSource::new(4, 4, 30, 10_000);
    let engine = SlowEngine {
        inner: PassthroughEngine::new(),
        delay: Duration::from_millis(5),
    };
    let session = configured(engine, source.format(), source.max_frame_size());
    let pipeline = Pipeline::new(Arc::clone(&session), settings(50, 100));

    let token = pipeline.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = pipeline
        .run(source, RecordingSink::default())
        .await
        .unwrap_err();
    assert_eq!(codec_error(&err), Some(&CodecError::Cancelled));
    assert!(pipeline.is_cancelled());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_retry_cap_surfaces_timeout() {
    let format = MediaFormat::video(MIME_VIDEO_RAW, 16, 16);
    let engine = SlowEngine {
        inner: PassthroughEngine::new(),
        delay: Duration::from_millis(500),
    };
    let session = configured(engine, format.clone(), 64);
    let pipeline = Pipeline::new(Arc::clone(&session), settings(5, 3));

    let err = pipeline
        .run(ChunkSource::new(format, chunks(10), 1), RecordingSink::default())
        .await
        .unwrap_err();
    assert_eq!(codec_error(&err), Some(&CodecError::Timeout));
    assert!(!session.state().is_active());
}

#[tokio::test]
async fn test_device_failure_is_surfaced() {
    let format = MediaFormat::video(MIME_VIDEO_RAW, 16, 16);
    let engine = PassthroughEngine::new().with_max_frame_size(2);
    let session = configured(engine, format.clone(), 64);
    let pipeline = Pipeline::new(Arc::clone(&session), settings(50, 100));

    let err = pipeline
        .run(ChunkSource::new(format, chunks(3), 1), RecordingSink::default())
        .await
        .unwrap_err();
    assert!(
        matches!(codec_error(&err), Some(CodecError::DeviceFailure(_))),
        "unexpected error: {:#}",
        err
    );
    assert_eq!(session.state(), SessionState::Released);
}

#[tokio::test]
async fn test_failed_device_is_released_before_run() {
    let format = MediaFormat::video(MIME_VIDEO_RAW, 16, 16);
    let engine = PassthroughEngine::new().with_max_frame_size(2);
    let session = configured(engine, format.clone(), 64);
    session.start().unwrap();
    let mut slot = session.acquire_input(Duration::from_secs(1)).unwrap();
    slot.write(b"too big").unwrap();
    session.submit_input(slot, 7, 0, false).unwrap();
    // let the worker trip over the frame without anyone observing it
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pipeline = Pipeline::new(Arc::clone(&session), settings(50, 100));
    let err = pipeline
        .run(ChunkSource::new(format, chunks(1), 1), LogSink::new())
        .await
        .unwrap_err();
    assert!(matches!(
        codec_error(&err),
        Some(CodecError::InvalidState {
            state: SessionState::Released,
            ..
        })
    ));
    assert_eq!(session.state(), SessionState::Released);
}

#[tokio::test]
async fn test_unconfigured_session_is_rejected() {
    let session = Arc::new(CodecSession::new(Box::new(PassthroughEngine::new())));
    let pipeline = Pipeline::new(session, PipelineSettings::default());
    let format = MediaFormat::video(MIME_VIDEO_RAW, 2, 2);

    let err = pipeline
        .run(ChunkSource::new(format, chunks(1), 1), LogSink::new())
        .await
        .unwrap_err();
    assert!(matches!(
        codec_error(&err),
        Some(CodecError::InvalidState {
            state: SessionState::Unconfigured,
            ..
        })
    ));
}
