use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use super::*;
use crate::{
    engine::CodecEngine,
    format::{CodecMode, MIME_VIDEO_RAW, MediaFormat},
    pipeline::{Pipeline, PipelineSettings},
    session::{CodecSession, SessionState},
    sink::{MediaSink, OutputFrame},
    slot::BufferFlags,
    source::MediaSource,
};

/// Path to scripts/test.mp4 relative to the workspace root (parent of codec-bus).
fn test_mp4_path() -> Option<PathBuf> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()?
        .join("scripts")
        .join("test.mp4");
    if path.exists() {
        Some(path)
    } else {
        eprintln!("skip: {} not found", path.display());
        None
    }
}

#[derive(Default)]
struct Counts {
    formats: Vec<MediaFormat>,
    frames: u64,
    end_of_stream: u32,
}

#[derive(Clone, Default)]
struct CountingSink {
    counts: Arc<Mutex<Counts>>,
}

impl MediaSink for CountingSink {
    fn on_format_changed(&mut self, format: &MediaFormat) -> anyhow::Result<()> {
        self.counts.lock().unwrap().formats.push(format.clone());
        Ok(())
    }

    fn on_frame(&mut self, frame: &OutputFrame<'_>) -> anyhow::Result<bool> {
        assert!(!frame.data.is_empty());
        self.counts.lock().unwrap().frames += 1;
        Ok(true)
    }

    fn on_end_of_stream(&mut self) -> anyhow::Result<()> {
        self.counts.lock().unwrap().end_of_stream += 1;
        Ok(())
    }
}

/// Requires scripts/test.mp4 (~5s, 10fps).
#[test]
fn test_source_reads_first_video_track() -> anyhow::Result<()> {
    let Some(path) = test_mp4_path() else {
        return Ok(());
    };
    init()?;
    let mut source = FfmpegSource::open(&path.to_string_lossy())?;
    let format = source.format();
    assert!(format.width() > 0 && format.height() > 0);
    assert_ne!(format.mime(), MIME_VIDEO_RAW);
    let capacity = format.max_input_size().unwrap_or(1024 * 1024);

    let mut buf = vec![0u8; capacity];
    let mut samples = 0u64;
    let mut max_pts_us = 0i64;
    let mut first_is_key = None;
    while let Some(sample) = source.read_sample(&mut buf)? {
        assert!(sample.size > 0);
        first_is_key.get_or_insert(sample.flags.contains(BufferFlags::KEY_FRAME));
        max_pts_us = max_pts_us.max(sample.pts_us);
        samples += 1;
    }
    assert!(samples > 0);
    assert_eq!(first_is_key, Some(true));
    // timestamps are microseconds: a few seconds of video, not stream ticks
    assert!(max_pts_us >= 1_000_000, "max pts {}", max_pts_us);
    assert!(max_pts_us < 60_000_000, "max pts {}", max_pts_us);
    Ok(())
}

#[test]
fn test_decoder_prefers_hardware_and_falls_back() -> anyhow::Result<()> {
    let Some(path) = test_mp4_path() else {
        return Ok(());
    };
    init()?;
    let source = FfmpegSource::open(&path.to_string_lossy())?;
    let input = source.format();

    let mut software = FfmpegDecoder::new(&source).with_hardware(false);
    let expected = software.configure(&input, CodecMode::Decoder)?;
    assert_eq!(expected.mime(), MIME_VIDEO_RAW);
    assert_eq!((expected.width(), expected.height()), (input.width(), input.height()));

    // opens whether or not a hardware decoder is present
    let mut preferred = FfmpegDecoder::new(&source);
    let output = preferred.configure(&input, CodecMode::Decoder)?;
    assert_eq!((output.width(), output.height()), (input.width(), input.height()));

    let mut encoder = FfmpegDecoder::new(&source);
    assert!(encoder.configure(&input, CodecMode::Encoder).is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_decode_file_end_to_end() -> anyhow::Result<()> {
    let Some(path) = test_mp4_path() else {
        return Ok(());
    };
    init()?;
    let url = path.to_string_lossy().into_owned();
    let mut samples = 0u64;
    {
        let mut counter = FfmpegSource::open(&url)?;
        let mut buf = vec![0u8; counter.format().max_input_size().unwrap_or(1024 * 1024)];
        while counter.read_sample(&mut buf)?.is_some() {
            samples += 1;
        }
    }

    let source = FfmpegSource::open(&url)?;
    let input = source.format();
    let decoder = FfmpegDecoder::new(&source).with_hardware(false);
    let session = Arc::new(CodecSession::new(Box::new(decoder)));
    session.configure(input.clone(), CodecMode::Decoder)?;

    let sink = CountingSink::default();
    let settings = PipelineSettings {
        timeout: Duration::from_millis(50),
        max_retries: 200,
    };
    let report = Pipeline::new(Arc::clone(&session), settings)
        .run(source, sink.clone())
        .await?;

    let counts = sink.counts.lock().unwrap();
    // constant geometry: only the initial format is reported
    assert_eq!(counts.formats.len(), 1);
    assert_eq!(report.format_changes, 1);
    assert_eq!(
        (counts.formats[0].width(), counts.formats[0].height()),
        (input.width(), input.height())
    );
    assert_eq!(counts.end_of_stream, 1);
    assert!(report.end_of_stream);
    assert!(counts.frames > 0 && counts.frames <= samples);
    assert_eq!(report.frames_forwarded, counts.frames);
    assert_eq!(session.state(), SessionState::Stopped);
    Ok(())
}
