use std::sync::Arc;

use codec_bus::{CodecError, source::FrameCountSource};
use futures::StreamExt;

use super::{Pipe, dest_name};
use crate::media::{
    stream::RawSinkSource,
    types::{InputConfig, OutputDest, PipeConfig, Resize, VideoRawFrame},
};

fn synthetic(width: u32, height: u32, fps: u32, frames: u64) -> InputConfig {
    InputConfig::Synthetic {
        width,
        height,
        fps,
        frames,
        resize: None,
    }
}

async fn collect(frames: Arc<RawSinkSource>) -> Vec<VideoRawFrame> {
    RawSinkSource::as_stream(frames).collect().await
}

// ------------------------------------------------------------------------
// PipeConfigBuilder Tests
// ------------------------------------------------------------------------

#[test]
fn test_builder_inputs() {
    let config = PipeConfig::builder().input_file("test_video.mp4").build();
    match &config.input {
        InputConfig::File {
            path,
            prefer_hardware,
        } => {
            assert_eq!(path, "test_video.mp4");
            assert!(prefer_hardware);
        }
        _ => panic!("Expected File input"),
    }

    let config = PipeConfig::builder().input(synthetic(64, 48, 25, 10)).build();
    assert_eq!(
        config.input,
        InputConfig::Synthetic {
            width: 64,
            height: 48,
            fps: 25,
            frames: 10,
            resize: None,
        }
    );

    let config = PipeConfig::builder().build();
    assert_eq!(config.input, InputConfig::default());
    assert!(config.outputs.is_empty());
}

#[test]
fn test_builder_outputs() {
    let sink = Arc::new(RawSinkSource::new());
    let config = PipeConfig::builder()
        .add_log_output()
        .add_raw_frame_output(Arc::clone(&sink))
        .build();

    let names: Vec<_> = config.outputs.iter().map(dest_name).collect();
    assert_eq!(names, vec!["log", "raw_frame"]);
    match &config.outputs[1] {
        OutputDest::RawFrame { sink: s } => assert!(Arc::ptr_eq(s, &sink)),
        _ => panic!("Expected RawFrame output"),
    }
}

// ------------------------------------------------------------------------
// Pipe Tests
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synthetic_frames_reach_raw_sink_in_order() -> anyhow::Result<()> {
    let frames = Arc::new(RawSinkSource::new());
    let reader = tokio::spawn(collect(Arc::clone(&frames)));
    let pipe = Pipe::new(
        PipeConfig::builder()
            .input(synthetic(16, 8, 10, 12))
            .add_raw_frame_output(frames)
            .build(),
    );

    let report = pipe.run().await?;
    let received = reader.await?;

    assert_eq!(report.frames_forwarded, 12);
    assert_eq!(report.frames_rendered, 12);
    assert!(report.end_of_stream);
    assert!(!pipe.is_started());

    let numbers: Vec<_> = received
        .iter()
        .map(|f| FrameCountSource::frame_number(&f.data).unwrap())
        .collect();
    assert_eq!(numbers, (0..12).collect::<Vec<u32>>());
    assert!(received.iter().all(|f| f.width == 16 && f.height == 8));
    assert!(received[0].is_key);
    assert_eq!(received[3].pts_us, 300_000);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synthetic_resize_updates_frame_geometry() -> anyhow::Result<()> {
    let frames = Arc::new(RawSinkSource::new());
    let reader = tokio::spawn(collect(Arc::clone(&frames)));
    let pipe = Pipe::new(
        PipeConfig::builder()
            .input(InputConfig::Synthetic {
                width: 8,
                height: 8,
                fps: 30,
                frames: 4,
                resize: Some(Resize {
                    at_frame: 2,
                    width: 16,
                    height: 16,
                }),
            })
            .add_log_output()
            .add_raw_frame_output(frames)
            .build(),
    );

    let report = pipe.run().await?;
    let received = reader.await?;

    assert_eq!(report.format_changes, 2);
    let sizes: Vec<_> = received
        .iter()
        .map(|f| (f.width, f.data.len(), f.luma().map(|l| l[l.len() - 1])))
        .collect();
    assert_eq!(
        sizes,
        vec![
            (8, 96, Some(0)),
            (8, 96, Some(1)),
            (16, 384, Some(2)),
            (16, 384, Some(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_pipe_reports_cancellation() {
    let pipe = Pipe::new(
        PipeConfig::builder()
            .input(synthetic(8, 8, 30, 1_000_000))
            .add_log_output()
            .build(),
    );
    pipe.cancel();
    assert!(pipe.is_cancelled());

    let err = pipe.run().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<CodecError>(),
        Some(&CodecError::Cancelled)
    );
    assert!(!pipe.is_started());
}

#[cfg(not(feature = "ffmpeg"))]
#[tokio::test]
async fn test_file_input_needs_ffmpeg() {
    let frames = Arc::new(RawSinkSource::new());
    let pipe = Pipe::new(
        PipeConfig::builder()
            .input_file("clip.mp4")
            .add_raw_frame_output(Arc::clone(&frames))
            .build(),
    );
    let err = pipe.run().await.unwrap_err();
    assert!(format!("{:#}", err).contains("without ffmpeg support"));
}
